use super::models::{
    DeliveryTask, Frequency, NewDeliveryTask, NewSubscription, Subscription, MAX_DELIVERY_ATTEMPTS,
};
use super::schema::apply_sqlite_schema;
use super::{Database, DeliveryTaskStore, Repositories, SubscriptionStore, TxOutcome};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const SUBSCRIPTION_COLUMNS: &str = "s.id, s.token, s.confirmed, s.email, s.city, f.name";
const DELIVERY_TASK_COLUMNS: &str = "id, to_address, token, completed, attempts, next_try_after";

/// Number of connections serving `with_connection` scopes of a file database.
const READ_POOL_SIZE: usize = 4;

/// Embedded backend.
///
/// A file database runs in WAL mode with one write connection and a small
/// pool of connections for plain scopes. Every transaction is
/// `BEGIN IMMEDIATE` on the write connection and holds its mutex until it
/// ends, so concurrent claims are serialized rather than skipped. Plain reads
/// on the pool see the last committed state and never wait for an open
/// transaction. Plain writes on the pool still need SQLite's single write
/// lock and wait for it up to the busy timeout.
///
/// An in-memory database cannot be shared between connections, so it serves
/// every scope from the write connection.
pub struct SqliteDatabase {
    write_conn: Arc<Mutex<Connection>>,
    read_pool: Vec<Arc<Mutex<Connection>>>,
    read_index: AtomicUsize,
}

impl SqliteDatabase {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        info!("Opening SQLite database at {:?}", path);
        let mut write_conn = Connection::open(path).context("Failed to open SQLite database")?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        configure_connection(&write_conn)?;
        apply_sqlite_schema(&mut write_conn)?;

        let mut read_pool = Vec::with_capacity(READ_POOL_SIZE);
        for _ in 0..READ_POOL_SIZE {
            let read_conn = Connection::open(path).context("Failed to open SQLite database")?;
            configure_connection(&read_conn)?;
            read_pool.push(Arc::new(Mutex::new(read_conn)));
        }

        Ok(Self {
            write_conn: Arc::new(Mutex::new(write_conn)),
            read_pool,
            read_index: AtomicUsize::new(0),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().context("Failed to open SQLite database")?;
        configure_connection(&conn)?;
        apply_sqlite_schema(&mut conn)?;
        Ok(Self {
            write_conn: Arc::new(Mutex::new(conn)),
            read_pool: Vec::new(),
            read_index: AtomicUsize::new(0),
        })
    }

    fn read_conn(&self) -> &Mutex<Connection> {
        if self.read_pool.is_empty() {
            return &self.write_conn;
        }
        let index = self.read_index.fetch_add(1, Ordering::Relaxed) % self.read_pool.len();
        &self.read_pool[index]
    }
}

fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute("PRAGMA foreign_keys = ON;", [])?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    // A panic inside a transaction scope poisons the mutex after the
    // rollback already happened, so the connection is still usable.
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Database for SqliteDatabase {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    fn with_connection(&self, work: &mut dyn FnMut(&mut dyn Repositories)) -> Result<()> {
        let conn = lock(self.read_conn());
        work(&mut SqliteRepositories::new(&conn));
        Ok(())
    }

    fn with_transaction(
        &self,
        work: &mut dyn FnMut(&mut dyn Repositories) -> TxOutcome,
    ) -> Result<()> {
        let mut conn = lock(&self.write_conn);
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let outcome =
            panic::catch_unwind(AssertUnwindSafe(|| work(&mut SqliteRepositories::new(&tx))));

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

/// Repositories over a connection; an open `rusqlite::Transaction` derefs to one.
pub struct SqliteRepositories<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteRepositories<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }
}

fn parse_token(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Stored token '{}' is not a UUID", raw))
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .with_context(|| format!("Stored timestamp {} is out of range", millis))
}

fn row_to_subscription(row: &rusqlite::Row) -> Result<Subscription> {
    let token: String = row.get(1)?;
    let frequency: String = row.get(5)?;
    Ok(Subscription {
        id: row.get(0)?,
        token: parse_token(&token)?,
        confirmed: row.get(2)?,
        email: row.get(3)?,
        city: row.get(4)?,
        frequency: frequency.parse::<Frequency>()?,
    })
}

fn row_to_delivery_task(row: &rusqlite::Row) -> Result<DeliveryTask> {
    let token: String = row.get(2)?;
    Ok(DeliveryTask {
        id: row.get(0)?,
        to_address: row.get(1)?,
        token: parse_token(&token)?,
        completed: row.get(3)?,
        attempts: row.get(4)?,
        next_eligible_at: millis_to_datetime(row.get(5)?)?,
    })
}

impl SqliteRepositories<'_> {
    fn query_subscriptions(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions s JOIN frequencies f ON f.id = s.frequency_id
             WHERE {} ORDER BY s.id",
            SUBSCRIPTION_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params)?;
        let mut subscriptions = Vec::new();
        while let Some(row) = rows.next()? {
            subscriptions.push(row_to_subscription(row)?);
        }
        Ok(subscriptions)
    }

    fn query_delivery_tasks(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<DeliveryTask>> {
        let sql = format!(
            "SELECT {} FROM pending_confirmation_emails WHERE {} ORDER BY id",
            DELIVERY_TASK_COLUMNS, where_clause
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params)?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(row_to_delivery_task(row)?);
        }
        Ok(tasks)
    }
}

impl SubscriptionStore for SqliteRepositories<'_> {
    fn subscription_exists(&mut self, email: &str, city: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE email = ?1 AND city = ?2)",
            params![email, city],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn create_subscription(&mut self, subscription: &NewSubscription) -> Result<i64> {
        let inserted = self.conn.execute(
            "INSERT INTO subscriptions (token, confirmed, email, city, frequency_id)
             SELECT ?1, 0, ?2, ?3, id FROM frequencies WHERE name = ?4",
            params![
                subscription.token.to_string(),
                subscription.email,
                subscription.city,
                subscription.frequency.as_str(),
            ],
        )?;
        if inserted == 0 {
            bail!(
                "Frequency '{}' is missing from the frequencies table",
                subscription.frequency
            );
        }
        Ok(self.conn.last_insert_rowid())
    }

    fn confirm_subscription(&mut self, token: Uuid) -> Result<u64> {
        let updated = self.conn.execute(
            "UPDATE subscriptions SET confirmed = 1 WHERE token = ?1",
            params![token.to_string()],
        )?;
        Ok(updated as u64)
    }

    fn delete_subscription(&mut self, token: Uuid) -> Result<u64> {
        let deleted = self.conn.execute(
            "DELETE FROM subscriptions WHERE token = ?1",
            params![token.to_string()],
        )?;
        Ok(deleted as u64)
    }

    fn find_subscription_by_token(&mut self, token: Uuid) -> Result<Option<Subscription>> {
        let sql = format!(
            "SELECT {} FROM subscriptions s JOIN frequencies f ON f.id = s.frequency_id
             WHERE s.token = ?1",
            SUBSCRIPTION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![token.to_string()])?;
        let subscription = rows.next()?.map(row_to_subscription).transpose()?;
        Ok(subscription)
    }

    fn find_subscriptions_by_email(&mut self, email: &str) -> Result<Vec<Subscription>> {
        self.query_subscriptions("s.email = ?1", &[&email])
    }

    fn confirmed_subscriptions(&mut self, frequency: Frequency) -> Result<Vec<Subscription>> {
        self.query_subscriptions("f.name = ?1 AND s.confirmed = 1", &[&frequency.as_str()])
    }
}

impl DeliveryTaskStore for SqliteRepositories<'_> {
    fn enqueue_delivery_task(&mut self, task: &NewDeliveryTask) -> Result<i64> {
        self.conn.execute(
            "INSERT INTO pending_confirmation_emails (to_address, token, next_try_after)
             VALUES (?1, ?2, ?3)",
            params![
                task.to_address,
                task.token.to_string(),
                task.next_eligible_at.timestamp_millis(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn claim_due_delivery_tasks(&mut self, now: DateTime<Utc>) -> Result<Vec<DeliveryTask>> {
        self.query_delivery_tasks(
            "completed = 0 AND next_try_after <= ?1 AND attempts < ?2",
            &[&now.timestamp_millis(), &MAX_DELIVERY_ATTEMPTS],
        )
    }

    fn update_delivery_task(&mut self, task: &DeliveryTask) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE pending_confirmation_emails
             SET completed = ?1, attempts = ?2, next_try_after = ?3
             WHERE id = ?4",
            params![
                task.completed,
                task.attempts,
                task.next_eligible_at.timestamp_millis(),
                task.id,
            ],
        )?;
        if updated == 0 {
            bail!("Delivery task {} does not exist", task.id);
        }
        Ok(())
    }

    fn find_delivery_tasks_by_token(&mut self, token: Uuid) -> Result<Vec<DeliveryTask>> {
        let token = token.to_string();
        self.query_delivery_tasks("token = ?1", &[&token])
    }
}

impl SqliteDatabase {
    /// Number of rows in a table, for diagnostics and tests.
    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let conn = lock(&self.write_conn);
        let count = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                row.get(0)
            })
            .optional()?
            .unwrap_or(0);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::sync::Barrier;
    use std::thread;

    fn new_subscription(email: &str, city: &str, frequency: Frequency) -> NewSubscription {
        NewSubscription {
            token: Uuid::new_v4(),
            email: email.to_string(),
            city: city.to_string(),
            frequency,
        }
    }

    fn new_task(token: Uuid, next_eligible_at: DateTime<Utc>) -> NewDeliveryTask {
        NewDeliveryTask {
            to_address: "user@example.com".to_string(),
            token,
            next_eligible_at,
        }
    }

    fn read<T>(db: &SqliteDatabase, f: impl FnOnce(&mut dyn Repositories) -> Result<T>) -> T {
        let mut f = Some(f);
        let mut out = None;
        db.with_connection(&mut |repos| {
            if let Some(f) = f.take() {
                out = Some(f(repos));
            }
        })
        .unwrap();
        out.unwrap().unwrap()
    }

    #[test]
    fn creates_and_finds_subscription() {
        let db = SqliteDatabase::in_memory().unwrap();
        let sub = new_subscription("a@example.com", "Kyiv", Frequency::Daily);
        let token = sub.token;

        let id = read(&db, |repos| repos.create_subscription(&sub));
        let found = read(&db, |repos| repos.find_subscription_by_token(token)).unwrap();

        assert_eq!(found.id, id);
        assert_eq!(found.email, "a@example.com");
        assert_eq!(found.city, "Kyiv");
        assert_eq!(found.frequency, Frequency::Daily);
        assert!(!found.confirmed);
        assert!(read(&db, |repos| repos.subscription_exists("a@example.com", "Kyiv")));
        assert!(!read(&db, |repos| repos.subscription_exists("a@example.com", "Lviv")));
    }

    #[test]
    fn confirm_and_delete_report_matched_rows() {
        let db = SqliteDatabase::in_memory().unwrap();
        let sub = new_subscription("a@example.com", "Kyiv", Frequency::Hourly);
        let token = sub.token;
        read(&db, |repos| repos.create_subscription(&sub));

        assert_eq!(read(&db, |repos| repos.confirm_subscription(token)), 1);
        assert_eq!(read(&db, |repos| repos.confirm_subscription(Uuid::new_v4())), 0);
        assert!(read(&db, |repos| repos.find_subscription_by_token(token))
            .unwrap()
            .confirmed);

        assert_eq!(read(&db, |repos| repos.delete_subscription(token)), 1);
        assert_eq!(read(&db, |repos| repos.delete_subscription(token)), 0);
        assert!(read(&db, |repos| repos.find_subscription_by_token(token)).is_none());
    }

    #[test]
    fn confirmed_subscriptions_filters_by_frequency_and_confirmation() {
        let db = SqliteDatabase::in_memory().unwrap();
        let daily = new_subscription("a@example.com", "Kyiv", Frequency::Daily);
        let hourly = new_subscription("b@example.com", "Kyiv", Frequency::Hourly);
        let unconfirmed = new_subscription("c@example.com", "Lviv", Frequency::Daily);
        for sub in [&daily, &hourly, &unconfirmed] {
            read(&db, |repos| repos.create_subscription(sub));
        }
        read(&db, |repos| repos.confirm_subscription(daily.token));
        read(&db, |repos| repos.confirm_subscription(hourly.token));

        let result = read(&db, |repos| repos.confirmed_subscriptions(Frequency::Daily));
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].token, daily.token);
    }

    #[test]
    fn storage_accepts_duplicate_email_city_pairs() {
        let db = SqliteDatabase::in_memory().unwrap();
        read(&db, |repos| {
            repos.create_subscription(&new_subscription("a@example.com", "Kyiv", Frequency::Daily))
        });
        read(&db, |repos| {
            repos.create_subscription(&new_subscription("a@example.com", "Kyiv", Frequency::Hourly))
        });
        let subs = read(&db, |repos| repos.find_subscriptions_by_email("a@example.com"));
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn claim_returns_only_claimable_tasks() {
        let db = SqliteDatabase::in_memory().unwrap();
        let now = Utc::now();
        let due = Uuid::new_v4();
        let future = Uuid::new_v4();
        let exhausted = Uuid::new_v4();
        let done = Uuid::new_v4();

        read(&db, |repos| {
            repos.enqueue_delivery_task(&new_task(due, now))?;
            repos.enqueue_delivery_task(&new_task(future, now + ChronoDuration::minutes(5)))?;
            let exhausted_id = repos.enqueue_delivery_task(&new_task(exhausted, now))?;
            let done_id = repos.enqueue_delivery_task(&new_task(done, now))?;
            let mut task = repos.find_delivery_tasks_by_token(exhausted)?.remove(0);
            assert_eq!(task.id, exhausted_id);
            task.attempts = MAX_DELIVERY_ATTEMPTS;
            repos.update_delivery_task(&task)?;
            let mut task = repos.find_delivery_tasks_by_token(done)?.remove(0);
            assert_eq!(task.id, done_id);
            task.completed = true;
            task.attempts = 1;
            repos.update_delivery_task(&task)
        });

        let claimed = read(&db, |repos| repos.claim_due_delivery_tasks(now));
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].token, due);
        assert_eq!(claimed[0].attempts, 0);
        assert!(!claimed[0].completed);
    }

    #[test]
    fn timestamps_survive_storage_with_millisecond_precision() {
        let db = SqliteDatabase::in_memory().unwrap();
        let token = Uuid::new_v4();
        let at = DateTime::from_timestamp_millis(1_700_000_123_456).unwrap();
        read(&db, |repos| repos.enqueue_delivery_task(&new_task(token, at)));
        let task = read(&db, |repos| repos.find_delivery_tasks_by_token(token)).remove(0);
        assert_eq!(task.next_eligible_at, at);
    }

    #[test]
    fn update_of_missing_task_fails() {
        let db = SqliteDatabase::in_memory().unwrap();
        let task = DeliveryTask {
            id: 42,
            to_address: "x@example.com".to_string(),
            token: Uuid::new_v4(),
            completed: true,
            attempts: 1,
            next_eligible_at: Utc::now(),
        };
        let mut result = None;
        db.with_connection(&mut |repos| result = Some(repos.update_delivery_task(&task)))
            .unwrap();
        assert!(result.unwrap().is_err());
    }

    #[test]
    fn rollback_outcome_discards_writes() {
        let db = SqliteDatabase::in_memory().unwrap();
        let sub = new_subscription("a@example.com", "Kyiv", Frequency::Daily);
        db.with_transaction(&mut |repos| {
            repos.create_subscription(&sub).unwrap();
            TxOutcome::Rollback
        })
        .unwrap();
        assert_eq!(db.count_rows("subscriptions").unwrap(), 0);
    }

    #[test]
    fn panic_inside_transaction_rolls_back_and_resumes() {
        let db = SqliteDatabase::in_memory().unwrap();
        let sub = new_subscription("a@example.com", "Kyiv", Frequency::Daily);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _ = db.with_transaction(&mut |repos| {
                repos.create_subscription(&sub).unwrap();
                panic!("boom");
            });
        }));

        assert!(result.is_err());
        assert_eq!(db.count_rows("subscriptions").unwrap(), 0);
        // The connection is still usable afterwards.
        db.with_transaction(&mut |repos| {
            repos.create_subscription(&sub).unwrap();
            TxOutcome::Commit
        })
        .unwrap();
        assert_eq!(db.count_rows("subscriptions").unwrap(), 1);
    }

    #[test]
    fn concurrent_claims_never_share_tasks() {
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(SqliteDatabase::open(dir.path().join("claims.db")).unwrap());
        let now = Utc::now();
        read(&db, |repos| {
            for _ in 0..20 {
                repos.enqueue_delivery_task(&new_task(Uuid::new_v4(), now))?;
            }
            Ok(())
        });

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = Arc::clone(&db);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut claimed_ids = Vec::new();
                    db.with_transaction(&mut |repos| {
                        let tasks = repos.claim_due_delivery_tasks(now).unwrap();
                        for mut task in tasks {
                            task.completed = true;
                            task.attempts += 1;
                            repos.update_delivery_task(&task).unwrap();
                            claimed_ids.push(task.id);
                        }
                        TxOutcome::Commit
                    })
                    .unwrap();
                    claimed_ids
                })
            })
            .collect();

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(total, 20);
        assert_eq!(all.len(), 20);
    }
}
