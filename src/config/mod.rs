mod file_config;

pub use file_config::{EmailConfig, FileConfig, JobsConfig};

use crate::mail::SmtpSettings;
use crate::server::RequestsLoggingLevel;
use crate::weather::WeatherApiSettings;
use anyhow::{anyhow, bail, Result};
use clap::ValueEnum;
use std::net::IpAddr;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub base_url: Option<String>,
    pub address: String,
    pub port: u16,
    pub metrics_port: u16,
    pub request_timeout_sec: u64,
    pub shutdown_grace_sec: u64,
    pub logging_level: RequestsLoggingLevel,
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub apply_schema: bool,
    pub email_confirmation_interval_min: u64,
    pub weather_api_key: Option<String>,
    pub weather_http_timeout_sec: u64,
    pub email_host: String,
    pub email_port: u16,
    pub email_username: Option<String>,
    pub email_password: Option<String>,
    pub email_from: Option<String>,
    pub email_ssl: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Public address used in email links.
    pub base_url: String,
    pub address: IpAddr,
    pub port: u16,
    pub metrics_port: u16,
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
    pub logging_level: RequestsLoggingLevel,

    pub database: DatabaseSettings,
    pub smtp: SmtpSettings,
    pub weather_api: WeatherApiSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: String,
    pub pool_size: u32,
    pub apply_schema: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobsSettings {
    pub confirmation_interval: Duration,
    pub hourly_report_interval: Duration,
    pub daily_report_interval: Duration,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            confirmation_interval: minutes(1),
            hourly_report_interval: minutes(60),
            daily_report_interval: minutes(24 * 60),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

fn required(value: Option<String>, name: &str, flag: &str, env: &str) -> Result<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            anyhow!(
                "{} must be specified via {}, {} or in config file",
                name,
                flag,
                env
            )
        })
}

fn positive_minutes(value: u64, name: &str) -> Result<Duration> {
    if value == 0 {
        bail!("{} must be at least one minute", name);
    }
    Ok(minutes(value))
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let base_url = required(
            file.base_url.or_else(|| cli.base_url.clone()),
            "base_url",
            "--base-url",
            "WAPP_BASE_URL",
        )?;

        let address_str = file.address.unwrap_or_else(|| cli.address.clone());
        let address: IpAddr = address_str
            .parse()
            .map_err(|_| anyhow!("Invalid bind address: {}", address_str))?;
        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        if port != 0 && port == metrics_port {
            bail!("port and metrics_port must differ (both are {})", port);
        }

        let request_timeout =
            Duration::from_secs(file.request_timeout_sec.unwrap_or(cli.request_timeout_sec));
        let shutdown_grace =
            Duration::from_secs(file.shutdown_grace_sec.unwrap_or(cli.shutdown_grace_sec));

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let database = DatabaseSettings {
            url: required(
                file.database_url.or_else(|| cli.database_url.clone()),
                "database_url",
                "--database-url",
                "WAPP_DATABASE_URL",
            )?,
            pool_size: file.db_pool_size.unwrap_or(cli.db_pool_size),
            apply_schema: file.apply_schema.unwrap_or(cli.apply_schema),
        };
        if database.pool_size == 0 {
            bail!("db_pool_size must be at least 1");
        }

        let weather_defaults = WeatherApiSettings::default();
        let weather_api = WeatherApiSettings {
            api_key: required(
                file.weather_api_key.or_else(|| cli.weather_api_key.clone()),
                "weather_api_key",
                "--weather-api-key",
                "WAPP_WEATHER_API_KEY",
            )?,
            base_url: file
                .weather_api_base_url
                .unwrap_or(weather_defaults.base_url),
            timeout: Duration::from_secs(
                file.weather_http_timeout_sec
                    .unwrap_or(cli.weather_http_timeout_sec),
            ),
        };

        let email = file.email.unwrap_or_default();
        let smtp = SmtpSettings {
            host: email.host.unwrap_or_else(|| cli.email_host.clone()),
            port: email.port.unwrap_or(cli.email_port),
            username: required(
                email.username.or_else(|| cli.email_username.clone()),
                "email username",
                "--email-username",
                "WAPP_EMAIL_USERNAME",
            )?,
            password: required(
                email.password.or_else(|| cli.email_password.clone()),
                "email password",
                "--email-password",
                "WAPP_EMAIL_PASSWORD",
            )?,
            from: required(
                email.from.or_else(|| cli.email_from.clone()),
                "email sender",
                "--email-from",
                "WAPP_EMAIL_FROM",
            )?,
            use_tls: email.use_tls.unwrap_or(cli.email_ssl),
        };

        let jobs_file = file.jobs.unwrap_or_default();
        let defaults = JobsSettings::default();
        let jobs = JobsSettings {
            confirmation_interval: positive_minutes(
                jobs_file
                    .confirmation_interval_min
                    .unwrap_or(cli.email_confirmation_interval_min),
                "confirmation interval",
            )?,
            hourly_report_interval: match jobs_file.hourly_report_interval_min {
                Some(min) => positive_minutes(min, "hourly report interval")?,
                None => defaults.hourly_report_interval,
            },
            daily_report_interval: match jobs_file.daily_report_interval_min {
                Some(min) => positive_minutes(min, "daily report interval")?,
                None => defaults.daily_report_interval,
            },
        };

        Ok(Self {
            base_url,
            address,
            port,
            metrics_port,
            request_timeout,
            shutdown_grace,
            logging_level,
            database,
            smtp,
            weather_api,
            jobs,
        })
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
