use axum::extract::FromRef;

use crate::subscription::SubscriptionService;
use crate::weather::WeatherProvider;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedWeatherProvider = Arc<dyn WeatherProvider>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub subscriptions: SubscriptionService,
    pub weather: GuardedWeatherProvider,
}

impl ServerState {
    pub fn new(
        config: ServerConfig,
        subscriptions: SubscriptionService,
        weather: GuardedWeatherProvider,
    ) -> Self {
        Self {
            config,
            start_time: Instant::now(),
            subscriptions,
            weather,
        }
    }
}

impl FromRef<ServerState> for SubscriptionService {
    fn from_ref(input: &ServerState) -> Self {
        input.subscriptions.clone()
    }
}

impl FromRef<ServerState> for GuardedWeatherProvider {
    fn from_ref(input: &ServerState) -> Self {
        input.weather.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
