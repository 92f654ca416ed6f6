//! Test server lifecycle management
//!
//! Each test gets an isolated server over its own SQLite file, with an
//! in-memory mailbox, a static weather provider and a manual clock. The
//! background workers are not scheduled; tests run them directly.

use super::constants::*;
use super::fixtures::{create_test_db, kyiv_weather, lviv_weather};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use uuid::Uuid;
use weather_notifier::clock::ManualClock;
use weather_notifier::mail::{EmailComposer, InMemoryMailbox};
use weather_notifier::outbox::{ConfirmationDeliveryWorker, DeliveryRunSummary, RetryPolicy};
use weather_notifier::reports::{FanOutSummary, ReportFanOut};
use weather_notifier::server::{make_app, RequestsLoggingLevel, ServerConfig, ServerState};
use weather_notifier::store::{DeliveryTask, Frequency, SqliteDatabase, Subscription, UnitOfWork};
use weather_notifier::subscription::SubscriptionService;
use weather_notifier::weather::StaticWeatherProvider;

/// Test server instance with an isolated database
///
/// When dropped, the server gracefully shuts down and the temp directory is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    pub port: u16,

    pub db: Arc<SqliteDatabase>,
    pub mailbox: Arc<InMemoryMailbox>,
    pub weather: Arc<StaticWeatherProvider>,
    pub clock: Arc<ManualClock>,

    uow: UnitOfWork,
    confirmation_worker: Arc<ConfirmationDeliveryWorker>,
    fanout: Arc<ReportFanOut>,

    // Private fields - keep resources alive until drop
    _temp_db_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the database cannot be created, the port cannot be bound or
    /// the server doesn't become ready within timeout.
    pub async fn spawn() -> Self {
        let (temp_db_dir, db_path) = create_test_db().expect("Failed to create test database");
        let db = Arc::new(SqliteDatabase::open(&db_path).expect("Failed to open test database"));
        let uow = UnitOfWork::new(db.clone());

        let mailbox = Arc::new(InMemoryMailbox::new());
        let weather = Arc::new(
            StaticWeatherProvider::new()
                .with_city(KYIV, kyiv_weather())
                .with_city(LVIV, lviv_weather()),
        );
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 5, 20, 9, 0, 0).unwrap(),
        ));
        let composer = EmailComposer::new(TEST_PUBLIC_BASE_URL);

        let confirmation_worker = Arc::new(ConfirmationDeliveryWorker::new(
            uow.clone(),
            mailbox.clone(),
            composer.clone(),
            clock.clone(),
            RetryPolicy::default(),
        ));
        let fanout = Arc::new(ReportFanOut::new(
            uow.clone(),
            weather.clone(),
            mailbox.clone(),
            composer,
            clock.clone(),
        ));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        };
        let state = ServerState::new(
            config,
            SubscriptionService::new(uow.clone(), clock.clone()),
            weather.clone(),
        );
        let app = make_app(state);

        // Spawn server in background task with graceful shutdown
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            db,
            mailbox,
            weather,
            clock,
            uow,
            confirmation_worker,
            fanout,
            _temp_db_dir: temp_db_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    /// Waits for the server to become ready by polling the status endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }

    /// Runs one confirmation delivery pass, the way the scheduled job does
    pub async fn deliver_confirmations(&self) -> DeliveryRunSummary {
        let worker = self.confirmation_worker.clone();
        tokio::task::spawn_blocking(move || worker.run_once())
            .await
            .expect("Delivery task panicked")
            .expect("Delivery run failed")
    }

    /// Runs one report fan-out for `frequency`
    pub async fn send_reports(&self, frequency: Frequency) -> FanOutSummary {
        let fanout = self.fanout.clone();
        tokio::task::spawn_blocking(move || fanout.run(frequency))
            .await
            .expect("Fan-out task panicked")
            .expect("Fan-out run failed")
    }

    pub fn subscriptions_of(&self, email: &str) -> Vec<Subscription> {
        self.uow
            .read(|repos| repos.find_subscriptions_by_email(email))
            .expect("Failed to read subscriptions")
    }

    /// Token of the only subscription `email` has for `city`
    pub fn token_of(&self, email: &str, city: &str) -> Uuid {
        self.subscriptions_of(email)
            .into_iter()
            .find(|s| s.city == city)
            .map(|s| s.token)
            .unwrap_or_else(|| panic!("No subscription for {} in {}", email, city))
    }

    pub fn delivery_tasks_of(&self, token: Uuid) -> Vec<DeliveryTask> {
        self.uow
            .read(|repos| repos.find_delivery_tasks_by_token(token))
            .expect("Failed to read delivery tasks")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir is cleaned up automatically
    }
}
