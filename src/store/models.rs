use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// A delivery task is never handed out again once it reached this many attempts.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 3;

/// How often a subscriber receives weather reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Hourly,
    Daily,
}

impl Frequency {
    pub const ALL: [Frequency; 2] = [Frequency::Hourly, Frequency::Daily];

    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Hourly => "hourly",
            Frequency::Daily => "daily",
        }
    }

    /// Human readable span covered by one report, used in email bodies.
    pub fn report_period(&self) -> &'static str {
        match self {
            Frequency::Hourly => "1 hour",
            Frequency::Daily => "24 hours",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown frequency '{0}'")]
pub struct UnknownFrequency(pub String);

impl FromStr for Frequency {
    type Err = UnknownFrequency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Frequency::Hourly),
            "daily" => Ok(Frequency::Daily),
            other => Err(UnknownFrequency(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: i64,
    pub token: Uuid,
    pub confirmed: bool,
    pub email: String,
    pub city: String,
    pub frequency: Frequency,
}

#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub token: Uuid,
    pub email: String,
    pub city: String,
    pub frequency: Frequency,
}

/// Outbox row for one pending confirmation email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTask {
    pub id: i64,
    pub to_address: String,
    pub token: Uuid,
    pub completed: bool,
    pub attempts: i32,
    pub next_eligible_at: DateTime<Utc>,
}

impl DeliveryTask {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.next_eligible_at <= now && self.attempts < MAX_DELIVERY_ATTEMPTS
    }

    /// True for a task that failed every allowed attempt and will never be claimed again.
    pub fn is_exhausted(&self) -> bool {
        !self.completed && self.attempts >= MAX_DELIVERY_ATTEMPTS
    }
}

#[derive(Debug, Clone)]
pub struct NewDeliveryTask {
    pub to_address: String,
    pub token: Uuid,
    pub next_eligible_at: DateTime<Utc>,
}
