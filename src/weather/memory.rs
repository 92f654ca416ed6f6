use super::{WeatherError, WeatherProvider, WeatherSnapshot};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    cities: HashMap<String, WeatherSnapshot>,
    unavailable: HashSet<String>,
    lookups: Vec<String>,
}

/// Serves fixed weather per city; unknown cities are reported as not found.
#[derive(Default)]
pub struct StaticWeatherProvider {
    state: Mutex<State>,
}

impl StaticWeatherProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn with_city(self, city: &str, snapshot: WeatherSnapshot) -> Self {
        self.set_city(city, snapshot);
        self
    }

    pub fn set_city(&self, city: &str, snapshot: WeatherSnapshot) {
        self.state().cities.insert(city.to_string(), snapshot);
    }

    /// Makes lookups for `city` fail with a provider error.
    pub fn set_unavailable(&self, city: &str) {
        self.state().unavailable.insert(city.to_string());
    }

    /// Every city looked up so far, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.state().lookups.clone()
    }
}

impl WeatherProvider for StaticWeatherProvider {
    fn current_weather(&self, city: &str) -> Result<WeatherSnapshot, WeatherError> {
        let mut state = self.state();
        state.lookups.push(city.to_string());
        if state.unavailable.contains(city) {
            return Err(WeatherError::Provider {
                code: 9999,
                message: "service unavailable".to_string(),
            });
        }
        state
            .cities
            .get(city)
            .cloned()
            .ok_or_else(|| WeatherError::CityNotFound(city.to_string()))
    }
}
