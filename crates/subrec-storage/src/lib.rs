//! Record store abstraction, its Postgres and in-memory backends, and the
//! conflict report writer.

mod memory;
mod postgres;
mod query;
mod report;

use async_trait::async_trait;
use subrec_core::{Client, ConsentUpdate, ContactField, NewUser, Subscriber, SubscriberKind, User};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use query::Predicate;
pub use report::ConflictReport;

pub const CRATE_NAME: &str = "subrec-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("expected at most one row in {table}, found {count}")]
    MultipleRecords { table: &'static str, count: usize },
}

/// Outcome of an exact-match lookup that is allowed to find nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Missing,
    One(T),
    Many(usize),
}

impl<T> Lookup<T> {
    pub fn from_rows(mut rows: Vec<T>) -> Self {
        match rows.len() {
            0 => Lookup::Missing,
            1 => Lookup::One(rows.remove(0)),
            n => Lookup::Many(n),
        }
    }

    /// Collapse to an `Option`, treating several matches as a broken uniqueness
    /// invariant of `table`.
    pub fn unique(self, table: &'static str) -> Result<Option<T>, StoreError> {
        match self {
            Lookup::Missing => Ok(None),
            Lookup::One(row) => Ok(Some(row)),
            Lookup::Many(count) => Err(StoreError::MultipleRecords { table, count }),
        }
    }
}

/// Read and bulk-write access to the subscriber, client and user tables.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn subscribers(
        &self,
        kind: SubscriberKind,
        filter: &Predicate,
    ) -> Result<Vec<Subscriber>, StoreError>;

    async fn clients(&self, filter: &Predicate) -> Result<Vec<Client>, StoreError>;

    async fn users(&self, filter: &Predicate) -> Result<Vec<User>, StoreError>;

    async fn user_exists(&self, filter: &Predicate) -> Result<bool, StoreError>;

    /// Values of one contact column over the users matching `filter`.
    async fn user_values(
        &self,
        field: ContactField,
        filter: &Predicate,
    ) -> Result<Vec<String>, StoreError>;

    async fn count_users(&self) -> Result<usize, StoreError>;

    /// Insert all rows with a single multi-row write.
    async fn bulk_create_users(&self, users: &[NewUser]) -> Result<usize, StoreError>;

    /// Overwrite `gdpr_consent` for all listed users with a single write.
    async fn bulk_update_consent(&self, updates: &[ConsentUpdate]) -> Result<usize, StoreError>;

    async fn get_subscriber(
        &self,
        kind: SubscriberKind,
        filter: &Predicate,
    ) -> Result<Lookup<Subscriber>, StoreError> {
        Ok(Lookup::from_rows(self.subscribers(kind, filter).await?))
    }

    async fn get_client(&self, filter: &Predicate) -> Result<Lookup<Client>, StoreError> {
        Ok(Lookup::from_rows(self.clients(filter).await?))
    }
}
