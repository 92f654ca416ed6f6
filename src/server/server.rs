use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use super::metrics::metrics_handler;
use super::state::ServerState;
use super::subscription_routes::make_subscription_routes;
use super::weather_routes::make_weather_routes;
use super::log_requests;

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn make_app(state: ServerState) -> Router {
    let home_router: Router = Router::new()
        .route("/", get(home))
        .with_state(state.clone());

    home_router
        .merge(make_subscription_routes(state.clone()))
        .merge(make_weather_routes(state.clone()))
        .layer(TimeoutLayer::new(state.config.request_timeout))
        .layer(middleware::from_fn_with_state(
            state.config.clone(),
            log_requests,
        ))
}

pub fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the API and the metrics endpoint until `shutdown_token` is
/// cancelled, then lets in-flight requests finish.
pub async fn run_server(
    state: ServerState,
    address: IpAddr,
    metrics_port: u16,
    shutdown_token: CancellationToken,
) -> Result<()> {
    let port = state.config.port;
    let app = make_app(state);

    let listener = TcpListener::bind(SocketAddr::new(address, port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", address, port))?;
    let metrics_listener = TcpListener::bind(SocketAddr::new(address, metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}:{}", address, metrics_port))?;

    let metrics_shutdown = shutdown_token.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await
    });

    info!("Ready to serve at {}:{}!", address, port);
    info!("Metrics available at port {}!", metrics_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_token.cancelled_owned())
        .await
        .context("HTTP server failed")?;

    match metrics_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server failed: {}", e),
        Err(e) => error!("Metrics server task failed: {}", e),
    }

    info!("HTTP server stopped");
    Ok(())
}
