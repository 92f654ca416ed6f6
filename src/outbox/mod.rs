//! Confirmation email outbox.
//!
//! Subscribing writes a delivery task in the same transaction as the
//! subscription. [`ConfirmationDeliveryWorker`] later claims due tasks with a
//! row lock, sends the emails and records the outcome with exponential
//! backoff on failure.

mod confirmation_worker;
mod retry_policy;

pub use confirmation_worker::{ConfirmationDeliveryWorker, DeliveryRunSummary};
pub use retry_policy::RetryPolicy;
