//! Subscribe, confirm and unsubscribe endpoints.

use super::metrics;
use super::state::ServerState;
use crate::subscription::{SubscribeRequest, SubscriptionError, SubscriptionService};
use anyhow::anyhow;
use axum::{
    extract::{FromRequest, Path, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use tracing::error;

impl IntoResponse for SubscriptionError {
    fn into_response(self) -> Response {
        match self {
            SubscriptionError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            SubscriptionError::Conflict => (StatusCode::CONFLICT, self.to_string()).into_response(),
            SubscriptionError::NotFound => {
                (StatusCode::NOT_FOUND, self.to_string()).into_response()
            }
            SubscriptionError::Persistence(err) => {
                error!("Subscription storage error: {:#}", err);
                metrics::record_error("persistence", "subscription");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

/// Runs a blocking service call on the blocking pool.
async fn run_blocking<T, F>(work: F) -> Result<T, SubscriptionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, SubscriptionError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| SubscriptionError::Persistence(anyhow!("Blocking task failed: {}", e)))?
}

fn is_json(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false)
}

/// Accepts the subscribe fields either as a JSON object or as a form.
async fn read_subscribe_request(request: Request) -> Result<SubscribeRequest, Response> {
    if is_json(&request) {
        Json::<SubscribeRequest>::from_request(request, &())
            .await
            .map(|Json(body)| body)
            .map_err(|rejection| (StatusCode::BAD_REQUEST, rejection.body_text()).into_response())
    } else {
        Form::<SubscribeRequest>::from_request(request, &())
            .await
            .map(|Form(body)| body)
            .map_err(|rejection| (StatusCode::BAD_REQUEST, rejection.body_text()).into_response())
    }
}

async fn subscribe(State(service): State<SubscriptionService>, request: Request) -> Response {
    let body = match read_subscribe_request(request).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    match run_blocking(move || service.subscribe(&body)).await {
        Ok(_token) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn confirm(
    State(service): State<SubscriptionService>,
    Path(token): Path<String>,
) -> Response {
    match run_blocking(move || service.confirm(&token)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn unsubscribe(
    State(service): State<SubscriptionService>,
    Path(token): Path<String>,
) -> Response {
    match run_blocking(move || service.unsubscribe(&token)).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn make_subscription_routes(state: ServerState) -> Router {
    Router::new()
        .route("/subscribe", post(subscribe))
        .route("/confirm/{token}", get(confirm))
        .route("/unsubscribe/{token}", get(unsubscribe))
        .with_state(state)
}
