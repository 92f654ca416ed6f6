use super::RequestsLoggingLevel;
use std::time::Duration;

#[derive(Clone)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    /// Requests still running after this long are answered with 408.
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 8080,
            request_timeout: Duration::from_secs(10),
        }
    }
}
