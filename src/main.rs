use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weather_notifier::background_jobs::jobs::{ConfirmationDeliveryJob, WeatherReportJob};
use weather_notifier::background_jobs::JobScheduler;
use weather_notifier::clock::{Clock, SystemClock};
use weather_notifier::config::{AppConfig, CliConfig, FileConfig};
use weather_notifier::mail::{EmailComposer, MailTransport, SmtpMailTransport};
use weather_notifier::outbox::{ConfirmationDeliveryWorker, RetryPolicy};
use weather_notifier::reports::ReportFanOut;
use weather_notifier::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig, ServerState};
use weather_notifier::store::{open_database, Frequency, UnitOfWork};
use weather_notifier::subscription::SubscriptionService;
use weather_notifier::weather::{WeatherApiClient, WeatherProvider};

#[derive(Parser, Debug)]
#[command(version, about = "Weather subscription and report service")]
struct CliArgs {
    /// Path to a TOML config file. Values in it override flags and env vars.
    #[clap(long, env = "WAPP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Public base URL of this service, used for links in emails.
    #[clap(long, env = "WAPP_BASE_URL")]
    pub base_url: Option<String>,

    /// The address to bind to.
    #[clap(long, env = "WAPP_SERVER_ADDRESS", default_value = "127.0.0.1")]
    pub address: String,

    /// The port to listen on.
    #[clap(short, long, env = "WAPP_SERVER_PORT", default_value_t = 8080)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, env = "WAPP_METRICS_PORT", default_value_t = 9091)]
    pub metrics_port: u16,

    /// Requests taking longer than this many seconds get a 408.
    #[clap(long, default_value_t = 10)]
    pub request_timeout_sec: u64,

    /// How long to wait for in-flight work on shutdown, in seconds.
    #[clap(long, default_value_t = 10)]
    pub shutdown_grace_sec: u64,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// postgres://, sqlite://<path> or sqlite::memory:
    #[clap(long, env = "WAPP_DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of pooled PostgreSQL connections.
    #[clap(long, default_value_t = 10)]
    pub db_pool_size: u32,

    /// Create or upgrade the PostgreSQL schema at startup.
    #[clap(long, env = "WAPP_DB_APPLY_MIGRATIONS", default_value_t = false, action = clap::ArgAction::Set)]
    pub apply_schema: bool,

    /// Minutes between confirmation email delivery runs.
    #[clap(long, env = "WAPP_EMAIL_CONFIRMATION_INTERVAL", default_value_t = 1)]
    pub email_confirmation_interval_min: u64,

    /// weatherapi.com API key.
    #[clap(long, env = "WAPP_WEATHER_API_KEY")]
    pub weather_api_key: Option<String>,

    /// Timeout in seconds for weather API requests.
    #[clap(long, env = "WAPP_WEATHER_API_HTTP_TIMEOUT", default_value_t = 3)]
    pub weather_http_timeout_sec: u64,

    #[clap(long, env = "WAPP_EMAIL_HOST", default_value = "smtp.gmail.com")]
    pub email_host: String,

    #[clap(long, env = "WAPP_EMAIL_PORT", default_value_t = 587)]
    pub email_port: u16,

    #[clap(long, env = "WAPP_EMAIL_USERNAME")]
    pub email_username: Option<String>,

    #[clap(long, env = "WAPP_EMAIL_PASSWORD", hide_env_values = true)]
    pub email_password: Option<String>,

    /// Sender address, e.g. "Weather <weather@example.com>".
    #[clap(long, env = "WAPP_EMAIL_FROM")]
    pub email_from: Option<String>,

    /// Use STARTTLS when talking to the SMTP relay.
    #[clap(long, env = "WAPP_EMAIL_SSL", default_value_t = true, action = clap::ArgAction::Set)]
    pub email_ssl: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            base_url: self.base_url.clone(),
            address: self.address.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            request_timeout_sec: self.request_timeout_sec,
            shutdown_grace_sec: self.shutdown_grace_sec,
            logging_level: self.logging_level.clone(),
            database_url: self.database_url.clone(),
            db_pool_size: self.db_pool_size,
            apply_schema: self.apply_schema,
            email_confirmation_interval_min: self.email_confirmation_interval_min,
            weather_api_key: self.weather_api_key.clone(),
            weather_http_timeout_sec: self.weather_http_timeout_sec,
            email_host: self.email_host.clone(),
            email_port: self.email_port,
            email_username: self.email_username.clone(),
            email_password: self.email_password.clone(),
            email_from: self.email_from.clone(),
            email_ssl: self.email_ssl,
        }
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config file {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let app_config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let db_settings = app_config.database.clone();
    let database = tokio::task::spawn_blocking(move || {
        open_database(
            &db_settings.url,
            db_settings.pool_size,
            db_settings.apply_schema,
        )
    })
    .await
    .context("Database setup task failed")??;
    info!("Using {} storage backend", database.backend_name());

    let uow = UnitOfWork::new(database);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // The blocking HTTP client owns its own runtime, so build it off the async workers
    let weather_settings = app_config.weather_api.clone();
    let weather: Arc<dyn WeatherProvider> = Arc::new(
        tokio::task::spawn_blocking(move || WeatherApiClient::new(&weather_settings))
            .await
            .context("Weather client setup task failed")??,
    );
    let mailer: Arc<dyn MailTransport> = Arc::new(
        SmtpMailTransport::new(&app_config.smtp).context("Failed to configure SMTP transport")?,
    );
    let composer = EmailComposer::new(&app_config.base_url);

    let shutdown_token = CancellationToken::new();

    let mut scheduler = JobScheduler::new(shutdown_token.child_token(), app_config.shutdown_grace);
    let confirmation_worker = ConfirmationDeliveryWorker::new(
        uow.clone(),
        mailer.clone(),
        composer.clone(),
        clock.clone(),
        RetryPolicy::default(),
    );
    scheduler
        .register_job(Arc::new(ConfirmationDeliveryJob::new(
            confirmation_worker,
            app_config.jobs.confirmation_interval,
        )))
        .await;

    let fanout = Arc::new(ReportFanOut::new(
        uow.clone(),
        weather.clone(),
        mailer,
        composer,
        clock.clone(),
    ));
    for (frequency, interval) in [
        (Frequency::Hourly, app_config.jobs.hourly_report_interval),
        (Frequency::Daily, app_config.jobs.daily_report_interval),
    ] {
        scheduler
            .register_job(Arc::new(WeatherReportJob::new(
                fanout.clone(),
                frequency,
                interval,
            )))
            .await;
    }
    let scheduler_handle = scheduler.start();

    let server_config = ServerConfig {
        requests_logging_level: app_config.logging_level.clone(),
        port: app_config.port,
        request_timeout: app_config.request_timeout,
    };
    let state = ServerState::new(
        server_config,
        SubscriptionService::new(uow, clock),
        weather,
    );
    let mut server = tokio::spawn(run_server(
        state,
        app_config.address,
        app_config.metrics_port,
        shutdown_token.clone(),
    ));

    let finished_early = tokio::select! {
        result = &mut server => Some(result),
        _ = shutdown_signal() => None,
    };
    shutdown_token.cancel();

    let server_result = match finished_early {
        Some(result) => result,
        None => match tokio::time::timeout(app_config.shutdown_grace, server).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "HTTP server did not stop within {:?}",
                    app_config.shutdown_grace
                );
                Ok(Ok(()))
            }
        },
    };

    scheduler_handle.stop().await;

    server_result.context("HTTP server task failed")??;
    info!("Shutdown complete");
    Ok(())
}
