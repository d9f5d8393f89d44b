use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use subrec_core::{Client, ConsentUpdate, ContactField, NewUser, Subscriber, SubscriberKind, User};
use tracing::{info, instrument};

use crate::{Predicate, RecordStore, StoreError};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // Never put the DSN in a span, it may carry credentials.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("connected to db");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn select<'a>(columns: &str, table: &str, filter: &Predicate) -> QueryBuilder<'a, Postgres> {
        let mut qb = QueryBuilder::new(format!("SELECT {columns} FROM {table} WHERE "));
        filter.push_sql(&mut qb);
        qb
    }
}

fn subscriber_from_row(kind: SubscriberKind, row: &PgRow) -> Result<Subscriber, sqlx::Error> {
    Ok(Subscriber {
        id: row.try_get("id")?,
        kind,
        key: row.try_get("contact_key")?,
        gdpr_consent: row.try_get("gdpr_consent")?,
        created: row.try_get("created")?,
    })
}

fn client_from_row(row: &PgRow) -> Result<Client, sqlx::Error> {
    Ok(Client {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        created: row.try_get("created")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        gdpr_consent: row.try_get("gdpr_consent")?,
        created: row.try_get("created")?,
    })
}

#[async_trait]
impl RecordStore for PgStore {
    async fn subscribers(
        &self,
        kind: SubscriberKind,
        filter: &Predicate,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let columns = format!(
            "id, {} AS contact_key, gdpr_consent, created",
            kind.key_field().column()
        );
        let mut qb = Self::select(&columns, kind.table(), filter);
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| subscriber_from_row(kind, row))
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    async fn clients(&self, filter: &Predicate) -> Result<Vec<Client>, StoreError> {
        let mut qb = Self::select("id, email, phone, created", "client", filter);
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(client_from_row)
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    async fn users(&self, filter: &Predicate) -> Result<Vec<User>, StoreError> {
        let mut qb = Self::select("id, email, phone, gdpr_consent, created", "users", filter);
        qb.push(" ORDER BY id");
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(user_from_row)
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    async fn user_exists(&self, filter: &Predicate) -> Result<bool, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT EXISTS (SELECT 1 FROM users WHERE ");
        filter.push_sql(&mut qb);
        qb.push(")");
        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<bool, _>(0)?)
    }

    async fn user_values(
        &self,
        field: ContactField,
        filter: &Predicate,
    ) -> Result<Vec<String>, StoreError> {
        let mut qb = Self::select(field.column(), "users", filter);
        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| row.try_get::<String, _>(0))
            .collect::<Result<_, _>>()
            .map_err(StoreError::from)
    }

    async fn count_users(&self) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn bulk_create_users(&self, users: &[NewUser]) -> Result<usize, StoreError> {
        if users.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO users (email, phone, gdpr_consent) ");
        qb.push_values(users, |mut b, u| {
            b.push_bind(&u.email)
                .push_bind(&u.phone)
                .push_bind(u.gdpr_consent);
        });
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }

    async fn bulk_update_consent(&self, updates: &[ConsentUpdate]) -> Result<usize, StoreError> {
        if updates.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("UPDATE users AS u SET gdpr_consent = v.gdpr_consent FROM (");
        qb.push_values(updates, |mut b, c| {
            b.push_bind(c.user_id).push_bind(c.gdpr_consent);
        });
        qb.push(") AS v(id, gdpr_consent) WHERE u.id = v.id");
        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}
