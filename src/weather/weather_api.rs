//! weatherapi.com client.

use super::{WeatherError, WeatherProvider, WeatherSnapshot};
use anyhow::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const CITY_NOT_FOUND_CODE: i64 = 1006;

#[derive(Debug, Clone)]
pub struct WeatherApiSettings {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for WeatherApiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "http://api.weatherapi.com/v1".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

pub struct WeatherApiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Deserialize)]
struct CurrentResponse {
    current: Current,
}

#[derive(Deserialize)]
struct Current {
    temp_c: f64,
    humidity: f64,
    condition: Condition,
}

#[derive(Deserialize)]
struct Condition {
    text: String,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: i64,
    message: String,
}

impl WeatherApiClient {
    pub fn new(settings: &WeatherApiSettings) -> Result<Self> {
        let client = Client::builder().timeout(settings.timeout).build()?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl WeatherProvider for WeatherApiClient {
    fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
        let url = format!("{}/current.json", self.base_url);
        debug!("Fetching current weather for {}", city);

        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str()), ("q", city)])
            .send()
            .map_err(|e| WeatherError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: ErrorResponse = response.json().map_err(|e| {
                WeatherError::Http(format!("status {} with unreadable body: {}", status, e))
            })?;
            if body.error.code == CITY_NOT_FOUND_CODE {
                return Err(WeatherError::CityNotFound(city.to_string()));
            }
            return Err(WeatherError::Provider {
                code: body.error.code,
                message: body.error.message,
            });
        }

        let body: CurrentResponse = response
            .json()
            .map_err(|e| WeatherError::Http(format!("unreadable weather response: {}", e)))?;

        Ok(WeatherSnapshot {
            temperature: body.current.temp_c,
            humidity: body.current.humidity,
            condition: body.current.condition.text,
        })
    }
}
