//! Persistence for subscriptions and the confirmation email outbox.
//!
//! Repositories are written once per backend against a handle that may be a
//! plain connection or an open transaction. Callers never see the handle: they
//! receive a `&mut dyn Repositories` scoped to either a connection
//! ([`Database::with_connection`]) or a transaction
//! ([`Database::with_transaction`]).

mod models;
mod postgres_database;
pub mod schema;
mod sqlite_database;
mod unit_of_work;

pub use models::{
    DeliveryTask, Frequency, NewDeliveryTask, NewSubscription, Subscription, UnknownFrequency,
    MAX_DELIVERY_ATTEMPTS,
};
pub use postgres_database::PostgresDatabase;
pub use sqlite_database::SqliteDatabase;
pub use unit_of_work::UnitOfWork;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

pub trait SubscriptionStore {
    /// Whether any subscription exists for this (email, city) pair.
    fn subscription_exists(&mut self, email: &str, city: &str) -> Result<bool>;

    /// Inserts an unconfirmed subscription and returns its id.
    fn create_subscription(&mut self, subscription: &NewSubscription) -> Result<i64>;

    /// Marks the subscription confirmed. Returns the number of matched rows.
    fn confirm_subscription(&mut self, token: Uuid) -> Result<u64>;

    /// Deletes the subscription. Returns the number of deleted rows.
    fn delete_subscription(&mut self, token: Uuid) -> Result<u64>;

    fn find_subscription_by_token(&mut self, token: Uuid) -> Result<Option<Subscription>>;

    fn find_subscriptions_by_email(&mut self, email: &str) -> Result<Vec<Subscription>>;

    fn confirmed_subscriptions(&mut self, frequency: Frequency) -> Result<Vec<Subscription>>;
}

pub trait DeliveryTaskStore {
    /// Inserts a fresh task (not completed, zero attempts) and returns its id.
    fn enqueue_delivery_task(&mut self, task: &NewDeliveryTask) -> Result<i64>;

    /// Returns every claimable task, locked for the rest of the enclosing
    /// transaction. Rows locked by a concurrent claim are skipped.
    fn claim_due_delivery_tasks(&mut self, now: DateTime<Utc>) -> Result<Vec<DeliveryTask>>;

    /// Persists `completed`, `attempts` and `next_eligible_at` by id.
    fn update_delivery_task(&mut self, task: &DeliveryTask) -> Result<()>;

    fn find_delivery_tasks_by_token(&mut self, token: Uuid) -> Result<Vec<DeliveryTask>>;
}

/// Every repository available within one storage scope.
pub trait Repositories: SubscriptionStore + DeliveryTaskStore {}

impl<T: SubscriptionStore + DeliveryTaskStore> Repositories for T {}

/// What a transaction scope should do once its work returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Commit,
    Rollback,
}

/// A storage backend.
///
/// Both scopes are synchronous and must be entered from a blocking context.
/// If `work` panics inside [`Database::with_transaction`] the transaction is
/// rolled back before the panic resumes.
pub trait Database: Send + Sync {
    fn backend_name(&self) -> &'static str;

    fn with_connection(&self, work: &mut dyn FnMut(&mut dyn Repositories)) -> Result<()>;

    fn with_transaction(&self, work: &mut dyn FnMut(&mut dyn Repositories) -> TxOutcome)
        -> Result<()>;
}

/// Opens the backend named by `url`.
///
/// `postgres://` and `postgresql://` URLs open a pooled PostgreSQL database,
/// `sqlite://<path>` opens (or creates) a SQLite file and `sqlite::memory:` an
/// in-memory SQLite database.
pub fn open_database(url: &str, pool_size: u32, apply_schema: bool) -> Result<Arc<dyn Database>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let db = PostgresDatabase::connect(url, pool_size)?;
        if apply_schema {
            db.apply_schema()?;
        }
        Ok(Arc::new(db))
    } else if url == "sqlite::memory:" {
        Ok(Arc::new(SqliteDatabase::in_memory()?))
    } else if let Some(path) = url.strip_prefix("sqlite://") {
        Ok(Arc::new(SqliteDatabase::open(path)?))
    } else {
        bail!("Unsupported database url '{}'", url)
    }
}
