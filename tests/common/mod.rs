//! Common test infrastructure
//!
//! Everything end-to-end tests need: an isolated server, an HTTP client and
//! the fixture values both agree on.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestClient, TestServer, KYIV};
//! use reqwest::StatusCode;
//!
//! #[tokio::test]
//! async fn test_get_weather() {
//!     let server = TestServer::spawn().await;
//!     let client = TestClient::new(server.base_url.clone());
//!
//!     let response = client.get_weather(KYIV).await;
//!     assert_eq!(response.status(), StatusCode::OK);
//! }
//! ```

mod client;
mod constants;
mod fixtures;
mod server;

// Public API - this is what tests import
pub use client::{first_link, TestClient};
pub use constants::*;
pub use server::TestServer;

// Keep fixtures internal - only accessed via TestServer::spawn()
#[allow(unused_imports)]
pub(crate) use fixtures::{create_test_db, kyiv_weather, lviv_weather};
