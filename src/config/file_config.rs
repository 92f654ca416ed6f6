use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Optional TOML config. Every field present here overrides its CLI/env
/// counterpart.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Server
    pub base_url: Option<String>,
    pub address: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub request_timeout_sec: Option<u64>,
    pub shutdown_grace_sec: Option<u64>,
    pub logging_level: Option<String>,

    // Database
    pub database_url: Option<String>,
    pub db_pool_size: Option<u32>,
    pub apply_schema: Option<bool>,

    // Weather API
    pub weather_api_key: Option<String>,
    pub weather_api_base_url: Option<String>,
    pub weather_http_timeout_sec: Option<u64>,

    // Feature configs
    pub email: Option<EmailConfig>,
    pub jobs: Option<JobsConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EmailConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub use_tls: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub confirmation_interval_min: Option<u64>,
    pub hourly_report_interval_min: Option<u64>,
    pub daily_report_interval_min: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
