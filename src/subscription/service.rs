use crate::clock::Clock;
use crate::store::{Frequency, NewDeliveryTask, NewSubscription, UnitOfWork};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Email is already subscribed to this city")]
    Conflict,

    #[error("Subscription not found")]
    NotFound,

    #[error("Storage error: {0}")]
    Persistence(#[from] anyhow::Error),
}

/// Raw subscribe input as received from a client.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscribeRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub frequency: String,
}

struct ValidSubscribeRequest {
    email: String,
    city: String,
    frequency: Frequency,
}

fn validate(request: &SubscribeRequest) -> Result<ValidSubscribeRequest, SubscriptionError> {
    let email = request.email.trim();
    let city = request.city.trim();
    let frequency = request.frequency.trim();

    if email.is_empty() {
        return Err(SubscriptionError::Validation("email is required".to_string()));
    }
    if !email.contains('@') || email.chars().any(char::is_whitespace) {
        return Err(SubscriptionError::Validation(format!(
            "'{}' is not an email address",
            email
        )));
    }
    if city.is_empty() {
        return Err(SubscriptionError::Validation("city is required".to_string()));
    }
    if frequency.is_empty() {
        return Err(SubscriptionError::Validation("frequency is required".to_string()));
    }
    let frequency = frequency
        .parse::<Frequency>()
        .map_err(|e| SubscriptionError::Validation(e.to_string()))?;

    Ok(ValidSubscribeRequest {
        email: email.to_string(),
        city: city.to_string(),
        frequency,
    })
}

fn parse_token(token: &str) -> Result<Uuid, SubscriptionError> {
    Uuid::parse_str(token.trim())
        .map_err(|_| SubscriptionError::Validation(format!("'{}' is not a valid token", token)))
}

#[derive(Clone)]
pub struct SubscriptionService {
    uow: UnitOfWork,
    clock: Arc<dyn Clock>,
}

impl SubscriptionService {
    pub fn new(uow: UnitOfWork, clock: Arc<dyn Clock>) -> Self {
        Self { uow, clock }
    }

    /// Creates an unconfirmed subscription together with its confirmation
    /// email task and returns the new token.
    ///
    /// The duplicate check runs before the transaction, so two concurrent
    /// requests for the same (email, city) can both succeed.
    pub fn subscribe(&self, request: &SubscribeRequest) -> Result<Uuid, SubscriptionError> {
        let request = validate(request)?;

        let exists = self
            .uow
            .read(|repos| repos.subscription_exists(&request.email, &request.city))?;
        if exists {
            return Err(SubscriptionError::Conflict);
        }

        let token = Uuid::new_v4();
        let now = self.clock.now();
        self.uow.execute(|repos| -> Result<(), SubscriptionError> {
            repos.create_subscription(&NewSubscription {
                token,
                email: request.email.clone(),
                city: request.city.clone(),
                frequency: request.frequency,
            })?;
            repos.enqueue_delivery_task(&NewDeliveryTask {
                to_address: request.email.clone(),
                token,
                next_eligible_at: now,
            })?;
            Ok(())
        })?;

        info!(
            "New {} subscription for {} in {}",
            request.frequency, request.email, request.city
        );
        Ok(token)
    }

    pub fn confirm(&self, token: &str) -> Result<(), SubscriptionError> {
        let token = parse_token(token)?;
        let updated = self.uow.read(|repos| repos.confirm_subscription(token))?;
        if updated == 0 {
            return Err(SubscriptionError::NotFound);
        }
        info!("Subscription {} confirmed", token);
        Ok(())
    }

    pub fn unsubscribe(&self, token: &str) -> Result<(), SubscriptionError> {
        let token = parse_token(token)?;
        let deleted = self.uow.read(|repos| repos.delete_subscription(token))?;
        if deleted == 0 {
            return Err(SubscriptionError::NotFound);
        }
        info!("Subscription {} removed", token);
        Ok(())
    }
}
