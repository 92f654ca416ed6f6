//! Current weather lookups.

mod memory;
mod weather_api;

pub use memory::StaticWeatherProvider;
pub use weather_api::{WeatherApiClient, WeatherApiSettings};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    /// Degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    pub condition: String,
}

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("City '{0}' not found")]
    CityNotFound(String),

    #[error("Weather provider error {code}: {message}")]
    Provider { code: i64, message: String },

    #[error("Weather request failed: {0}")]
    Http(String),
}

/// Source of current weather. Calls block.
pub trait WeatherProvider: Send + Sync {
    fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError>;
}
