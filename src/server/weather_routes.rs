//! Current weather endpoint.

use super::metrics;
use super::state::{GuardedWeatherProvider, ServerState};
use crate::weather::{WeatherError, WeatherSnapshot};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

#[derive(Deserialize, Debug)]
struct WeatherQuery {
    city: Option<String>,
}

#[derive(Serialize, Debug)]
struct WeatherResponse {
    temperature: f64,
    humidity: f64,
    description: String,
}

impl From<WeatherSnapshot> for WeatherResponse {
    fn from(snapshot: WeatherSnapshot) -> Self {
        Self {
            temperature: snapshot.temperature,
            humidity: snapshot.humidity,
            description: snapshot.condition,
        }
    }
}

async fn get_weather(
    State(weather): State<GuardedWeatherProvider>,
    Query(query): Query<WeatherQuery>,
) -> Response {
    let city = match query.city.as_deref().map(str::trim) {
        Some(city) if !city.is_empty() => city.to_string(),
        _ => return (StatusCode::BAD_REQUEST, "city is required").into_response(),
    };

    let lookup_city = city.clone();
    let result =
        tokio::task::spawn_blocking(move || weather.current_weather(&lookup_city)).await;

    match result {
        Ok(Ok(snapshot)) => {
            metrics::record_weather_lookup("ok");
            Json(WeatherResponse::from(snapshot)).into_response()
        }
        Ok(Err(WeatherError::CityNotFound(_))) => {
            metrics::record_weather_lookup("not_found");
            debug!("Weather requested for unknown city {}", city);
            StatusCode::NOT_FOUND.into_response()
        }
        Ok(Err(err)) => {
            metrics::record_weather_lookup("error");
            metrics::record_error("weather_provider", "/weather");
            error!("Weather lookup for {} failed: {}", city, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            metrics::record_error("join", "/weather");
            error!("Weather lookup task failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn make_weather_routes(state: ServerState) -> Router {
    Router::new()
        .route("/weather", get(get_weather))
        .with_state(state)
}
