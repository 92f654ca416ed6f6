//! Subscription lifecycle: subscribe, confirm, unsubscribe.

mod service;

pub use service::{SubscribeRequest, SubscriptionError, SubscriptionService};
