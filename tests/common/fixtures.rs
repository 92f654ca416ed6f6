//! Test fixture creation

use super::constants::*;
use anyhow::Result;
use std::path::PathBuf;
use tempfile::TempDir;
use weather_notifier::weather::WeatherSnapshot;

/// Creates an empty directory for a file backed SQLite database.
///
/// Returns the directory guard and the database path inside it.
pub fn create_test_db() -> Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let db_path = dir.path().join("weather.db");
    Ok((dir, db_path))
}

pub fn kyiv_weather() -> WeatherSnapshot {
    WeatherSnapshot {
        temperature: KYIV_TEMPERATURE,
        humidity: KYIV_HUMIDITY,
        condition: KYIV_CONDITION.to_string(),
    }
}

pub fn lviv_weather() -> WeatherSnapshot {
    WeatherSnapshot {
        temperature: 14.0,
        humidity: 80.0,
        condition: "Light rain".to_string(),
    }
}
