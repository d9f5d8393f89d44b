use async_trait::async_trait;
use chrono::{DateTime, Utc};
use subrec_core::{Client, ConsentUpdate, ContactField, NewUser, Subscriber, SubscriberKind, User};
use tokio::sync::Mutex;

use crate::{Predicate, RecordStore, StoreError};

/// In-process store with the same query semantics as [`crate::PgStore`].
///
/// Uniqueness of subscriber keys and client emails is not enforced; callers
/// seeding fixtures are expected to respect it, and tests rely on being able to
/// break it deliberately.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    subscribers: Vec<Subscriber>,
    clients: Vec<Client>,
    users: Vec<User>,
}

impl Tables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_subscriber(
        &self,
        kind: SubscriberKind,
        key: impl Into<String>,
        gdpr_consent: bool,
        created: DateTime<Utc>,
    ) -> Subscriber {
        let mut tables = self.tables.lock().await;
        let row = Subscriber {
            id: tables.allocate_id(),
            kind,
            key: key.into(),
            gdpr_consent,
            created,
        };
        tables.subscribers.push(row.clone());
        row
    }

    pub async fn insert_client(
        &self,
        email: impl Into<String>,
        phone: impl Into<String>,
        created: DateTime<Utc>,
    ) -> Client {
        let mut tables = self.tables.lock().await;
        let row = Client {
            id: tables.allocate_id(),
            email: email.into(),
            phone: phone.into(),
            created,
        };
        tables.clients.push(row.clone());
        row
    }

    pub async fn insert_user(
        &self,
        email: impl Into<String>,
        phone: impl Into<String>,
        gdpr_consent: bool,
        created: DateTime<Utc>,
    ) -> User {
        let mut tables = self.tables.lock().await;
        let row = User {
            id: tables.allocate_id(),
            email: email.into(),
            phone: phone.into(),
            gdpr_consent,
            created,
        };
        tables.users.push(row.clone());
        row
    }

    pub async fn user(&self, id: i64) -> Option<User> {
        let tables = self.tables.lock().await;
        tables.users.iter().find(|u| u.id == id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn subscribers(
        &self,
        kind: SubscriberKind,
        filter: &Predicate,
    ) -> Result<Vec<Subscriber>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .subscribers
            .iter()
            .filter(|s| s.kind == kind && filter.matches(*s))
            .cloned()
            .collect())
    }

    async fn clients(&self, filter: &Predicate) -> Result<Vec<Client>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .clients
            .iter()
            .filter(|c| filter.matches(*c))
            .cloned()
            .collect())
    }

    async fn users(&self, filter: &Predicate) -> Result<Vec<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .filter(|u| filter.matches(*u))
            .cloned()
            .collect())
    }

    async fn user_exists(&self, filter: &Predicate) -> Result<bool, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().any(|u| filter.matches(u)))
    }

    async fn user_values(
        &self,
        field: ContactField,
        filter: &Predicate,
    ) -> Result<Vec<String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .filter(|u| filter.matches(*u))
            .map(|u| u.field(field).to_string())
            .collect())
    }

    async fn count_users(&self) -> Result<usize, StoreError> {
        Ok(self.tables.lock().await.users.len())
    }

    async fn bulk_create_users(&self, users: &[NewUser]) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock().await;
        let created = Utc::now();
        for new in users {
            let id = tables.allocate_id();
            tables.users.push(User {
                id,
                email: new.email.clone(),
                phone: new.phone.clone(),
                gdpr_consent: new.gdpr_consent,
                created,
            });
        }
        Ok(users.len())
    }

    async fn bulk_update_consent(&self, updates: &[ConsentUpdate]) -> Result<usize, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut touched = 0;
        for update in updates {
            if let Some(user) = tables.users.iter_mut().find(|u| u.id == update.user_id) {
                user.gdpr_consent = update.gdpr_consent;
                touched += 1;
            }
        }
        Ok(touched)
    }
}
