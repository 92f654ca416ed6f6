//! Weather Notifier Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod background_jobs;
pub mod clock;
pub mod config;
pub mod mail;
pub mod outbox;
pub mod reports;
pub mod server;
pub mod store;
pub mod subscription;
pub mod weather;

// Re-export commonly used types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use server::{run_server, RequestsLoggingLevel};
pub use store::{open_database, Database, UnitOfWork};
pub use subscription::SubscriptionService;
