//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per endpoint. When routes or request
//! formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Status
    // ========================================================================

    pub async fn get_home(&self) -> Response {
        self.client
            .get(format!("{}/", self.base_url))
            .send()
            .await
            .expect("Home request failed")
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    /// POST /subscribe as a form, the way the HTML page submits it
    pub async fn subscribe(&self, email: &str, city: &str, frequency: &str) -> Response {
        self.client
            .post(format!("{}/subscribe", self.base_url))
            .form(&[("email", email), ("city", city), ("frequency", frequency)])
            .send()
            .await
            .expect("Subscribe request failed")
    }

    /// POST /subscribe with a JSON body
    pub async fn subscribe_json(&self, email: &str, city: &str, frequency: &str) -> Response {
        self.client
            .post(format!("{}/subscribe", self.base_url))
            .json(&json!({
                "email": email,
                "city": city,
                "frequency": frequency,
            }))
            .send()
            .await
            .expect("Subscribe request failed")
    }

    /// POST /subscribe with arbitrary form fields
    pub async fn subscribe_raw(&self, fields: &[(&str, &str)]) -> Response {
        self.client
            .post(format!("{}/subscribe", self.base_url))
            .form(fields)
            .send()
            .await
            .expect("Subscribe request failed")
    }

    pub async fn confirm(&self, token: &str) -> Response {
        self.client
            .get(format!("{}/confirm/{}", self.base_url, token))
            .send()
            .await
            .expect("Confirm request failed")
    }

    pub async fn unsubscribe(&self, token: &str) -> Response {
        self.client
            .get(format!("{}/unsubscribe/{}", self.base_url, token))
            .send()
            .await
            .expect("Unsubscribe request failed")
    }

    /// Follows a link taken from an email body
    pub async fn follow_link(&self, url: &str) -> Response {
        let path = url
            .strip_prefix(TEST_PUBLIC_BASE_URL)
            .expect("Link does not point at the test base URL");
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Link request failed")
    }

    // ========================================================================
    // Weather
    // ========================================================================

    pub async fn get_weather(&self, city: &str) -> Response {
        self.client
            .get(format!("{}/weather", self.base_url))
            .query(&[("city", city)])
            .send()
            .await
            .expect("Weather request failed")
    }

    pub async fn get_weather_without_city(&self) -> Response {
        self.client
            .get(format!("{}/weather", self.base_url))
            .send()
            .await
            .expect("Weather request failed")
    }
}

/// First `href` target in an HTML email body
pub fn first_link(html: &str) -> String {
    let start = html.find("href=\"").expect("Email has no link") + "href=\"".len();
    let end = html[start..].find('"').expect("Unterminated href") + start;
    html[start..end].to_string()
}
