use super::models::{
    DeliveryTask, Frequency, NewDeliveryTask, NewSubscription, Subscription, MAX_DELIVERY_ATTEMPTS,
};
use super::schema::apply_postgres_schema;
use super::{Database, DeliveryTaskStore, Repositories, SubscriptionStore, TxOutcome};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use postgres::{Client, GenericClient, NoTls, Row};
use r2d2_postgres::PostgresConnectionManager;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

const SUBSCRIPTION_COLUMNS: &str = "s.id, s.token, s.confirmed, s.email, s.city, f.name";
const DELIVERY_TASK_COLUMNS: &str = "id, to_address, token, completed, attempts, next_try_after";

pub struct PostgresDatabase {
    pool: r2d2::Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresDatabase {
    pub fn connect(url: &str, pool_size: u32) -> Result<Self> {
        let config: postgres::Config = url.parse().context("Invalid PostgreSQL url")?;
        let manager = PostgresConnectionManager::new(config, NoTls);
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .context("Failed to connect to PostgreSQL")?;
        info!("Connected to PostgreSQL (pool size {})", pool_size.max(1));
        Ok(Self { pool })
    }

    pub fn apply_schema(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get a database connection")?;
        apply_postgres_schema(&mut conn)
    }
}

impl Database for PostgresDatabase {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn with_connection(&self, work: &mut dyn FnMut(&mut dyn Repositories)) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get a database connection")?;
        let client: &mut Client = &mut conn;
        work(&mut PgRepositories::new(client));
        Ok(())
    }

    fn with_transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn Repositories) -> TxOutcome,
    ) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .context("Failed to get a database connection")?;
        let mut tx = conn.transaction().context("Failed to begin transaction")?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            work(&mut PgRepositories::new(&mut tx))
        }));

        match outcome {
            Ok(TxOutcome::Commit) => tx.commit().context("Failed to commit transaction"),
            Ok(TxOutcome::Rollback) => tx.rollback().context("Failed to roll back transaction"),
            Err(payload) => {
                if let Err(err) = tx.rollback() {
                    warn!("Rollback after panic failed: {}", err);
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

/// Repositories over either a pooled `Client` or an open `Transaction`.
pub struct PgRepositories<'c, C: GenericClient> {
    client: &'c mut C,
}

impl<'c, C: GenericClient> PgRepositories<'c, C> {
    pub fn new(client: &'c mut C) -> Self {
        Self { client }
    }
}

fn row_to_subscription(row: &Row) -> Result<Subscription> {
    let frequency: String = row.try_get(5)?;
    Ok(Subscription {
        id: row.try_get(0)?,
        token: row.try_get(1)?,
        confirmed: row.try_get(2)?,
        email: row.try_get(3)?,
        city: row.try_get(4)?,
        frequency: frequency.parse::<Frequency>()?,
    })
}

fn row_to_delivery_task(row: &Row) -> Result<DeliveryTask> {
    Ok(DeliveryTask {
        id: row.try_get(0)?,
        to_address: row.try_get(1)?,
        token: row.try_get(2)?,
        completed: row.try_get(3)?,
        attempts: row.try_get(4)?,
        next_eligible_at: row.try_get::<_, DateTime<Utc>>(5)?,
    })
}

impl<C: GenericClient> SubscriptionStore for PgRepositories<'_, C> {
    fn subscription_exists(&mut self, email: &str, city: &str) -> Result<bool> {
        let row = self.client.query_one(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE email = $1 AND city = $2)",
            &[&email, &city],
        )?;
        Ok(row.try_get(0)?)
    }

    fn create_subscription(&mut self, subscription: &NewSubscription) -> Result<i64> {
        let row = self.client.query_opt(
            "INSERT INTO subscriptions (token, confirmed, email, city, frequency_id)
             SELECT $1, FALSE, $2, $3, id FROM frequencies WHERE name = $4
             RETURNING id",
            &[
                &subscription.token,
                &subscription.email,
                &subscription.city,
                &subscription.frequency.as_str(),
            ],
        )?;
        match row {
            Some(row) => Ok(row.try_get(0)?),
            None => bail!(
                "Frequency '{}' is missing from the frequencies table",
                subscription.frequency
            ),
        }
    }

    fn confirm_subscription(&mut self, token: Uuid) -> Result<u64> {
        Ok(self.client.execute(
            "UPDATE subscriptions SET confirmed = TRUE WHERE token = $1",
            &[&token],
        )?)
    }

    fn delete_subscription(&mut self, token: Uuid) -> Result<u64> {
        Ok(self
            .client
            .execute("DELETE FROM subscriptions WHERE token = $1", &[&token])?)
    }

    fn find_subscription_by_token(&mut self, token: Uuid) -> Result<Option<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions s JOIN frequencies f ON f.id = s.frequency_id
             WHERE s.token = $1",
            SUBSCRIPTION_COLUMNS
        );
        self.client
            .query_opt(query.as_str(), &[&token])?
            .map(|row| row_to_subscription(&row))
            .transpose()
    }

    fn find_subscriptions_by_email(&mut self, email: &str) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions s JOIN frequencies f ON f.id = s.frequency_id
             WHERE s.email = $1 ORDER BY s.id",
            SUBSCRIPTION_COLUMNS
        );
        self.client
            .query(query.as_str(), &[&email])?
            .iter()
            .map(row_to_subscription)
            .collect()
    }

    fn confirmed_subscriptions(&mut self, frequency: Frequency) -> Result<Vec<Subscription>> {
        let query = format!(
            "SELECT {} FROM subscriptions s JOIN frequencies f ON f.id = s.frequency_id
             WHERE f.name = $1 AND s.confirmed = TRUE ORDER BY s.id",
            SUBSCRIPTION_COLUMNS
        );
        self.client
            .query(query.as_str(), &[&frequency.as_str()])?
            .iter()
            .map(row_to_subscription)
            .collect()
    }
}

impl<C: GenericClient> DeliveryTaskStore for PgRepositories<'_, C> {
    fn enqueue_delivery_task(&mut self, task: &NewDeliveryTask) -> Result<i64> {
        let row = self.client.query_one(
            "INSERT INTO pending_confirmation_emails (to_address, token, next_try_after)
             VALUES ($1, $2, $3) RETURNING id",
            &[&task.to_address, &task.token, &task.next_eligible_at],
        )?;
        Ok(row.try_get(0)?)
    }

    fn claim_due_delivery_tasks(&mut self, now: DateTime<Utc>) -> Result<Vec<DeliveryTask>> {
        let query = format!(
            "SELECT {} FROM pending_confirmation_emails
             WHERE completed = FALSE AND next_try_after <= $1 AND attempts < $2
             ORDER BY id
             FOR UPDATE SKIP LOCKED",
            DELIVERY_TASK_COLUMNS
        );
        self.client
            .query(query.as_str(), &[&now, &MAX_DELIVERY_ATTEMPTS])?
            .iter()
            .map(row_to_delivery_task)
            .collect()
    }

    fn update_delivery_task(&mut self, task: &DeliveryTask) -> Result<()> {
        let updated = self.client.execute(
            "UPDATE pending_confirmation_emails
             SET completed = $1, attempts = $2, next_try_after = $3
             WHERE id = $4",
            &[
                &task.completed,
                &task.attempts,
                &task.next_eligible_at,
                &task.id,
            ],
        )?;
        if updated == 0 {
            bail!("Delivery task {} does not exist", task.id);
        }
        Ok(())
    }

    fn find_delivery_tasks_by_token(&mut self, token: Uuid) -> Result<Vec<DeliveryTask>> {
        let query = format!(
            "SELECT {} FROM pending_confirmation_emails WHERE token = $1 ORDER BY id",
            DELIVERY_TASK_COLUMNS
        );
        self.client
            .query(query.as_str(), &[&token])?
            .iter()
            .map(row_to_delivery_task)
            .collect()
    }
}
