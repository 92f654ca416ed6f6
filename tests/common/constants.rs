//! Shared constants for end-to-end tests
//!
//! When fixture data changes, update only this file.

// ============================================================================
// Subscribers
// ============================================================================

pub const SUBSCRIBER_1_EMAIL: &str = "olena@example.com";

pub const SUBSCRIBER_2_EMAIL: &str = "taras@example.com";

pub const SUBSCRIBER_3_EMAIL: &str = "iryna@example.com";

/// Base URL put into email links by the test composer
pub const TEST_PUBLIC_BASE_URL: &str = "http://weather.test";

// ============================================================================
// Weather fixtures
// ============================================================================

/// City with weather known to the static provider
pub const KYIV: &str = "Kyiv";

/// Second known city
pub const LVIV: &str = "Lviv";

/// City the static provider reports as not found
pub const UNKNOWN_CITY: &str = "Atlantis";

pub const KYIV_TEMPERATURE: f64 = 18.5;

pub const KYIV_HUMIDITY: f64 = 62.0;

pub const KYIV_CONDITION: &str = "Partly cloudy";

// ============================================================================
// Test Timeouts and Configuration
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server ready (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
