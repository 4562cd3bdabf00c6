//! Runtime configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`), with defaults suitable for a local session.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Top-level configuration.
///
/// Loaded once at startup via [`NotifyConfig::from_env`].
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Interface the delivery endpoint binds to.
    pub listen_host: IpAddr,

    /// Port the backend uses to reach the delivery endpoint.
    pub delivery_port: u16,

    /// Seconds until the backend may drop a subscription (0 = never).
    pub subscription_timeout_secs: u32,

    /// Capacity of the inbound raw payload queue.
    pub inbox_capacity: usize,

    /// Capacity of each subscription's event queue.
    pub subscription_queue_capacity: usize,

    /// Per-request timeout on the delivery endpoint.
    pub request_timeout_secs: u64,

    /// Pause between demo phases so pushed events can drain.
    pub demo_event_wait_ms: u64,

    /// Emit logs as JSON lines instead of human-readable text.
    pub log_json: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::from([0, 0, 0, 0]),
            delivery_port: 5468,
            subscription_timeout_secs: 0,
            inbox_capacity: 1024,
            subscription_queue_capacity: 256,
            request_timeout_secs: 10,
            demo_event_wait_ms: 500,
            log_json: false,
        }
    }
}

impl NotifyConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is missing or unparsable.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_HOST` is set but is not an IP address.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let listen_host: IpAddr = match std::env::var("LISTEN_HOST") {
            Ok(host) => host.parse()?,
            Err(_) => defaults.listen_host,
        };

        Ok(Self {
            listen_host,
            delivery_port: parse_env("DELIVERY_PORT", defaults.delivery_port),
            subscription_timeout_secs: parse_env(
                "SUBSCRIPTION_TIMEOUT_SECS",
                defaults.subscription_timeout_secs,
            ),
            inbox_capacity: parse_env("INBOX_CAPACITY", defaults.inbox_capacity),
            subscription_queue_capacity: parse_env(
                "SUBSCRIPTION_QUEUE_CAPACITY",
                defaults.subscription_queue_capacity,
            ),
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            demo_event_wait_ms: parse_env("DEMO_EVENT_WAIT_MS", defaults.demo_event_wait_ms),
            log_json: parse_env_bool("LOG_JSON", defaults.log_json),
        })
    }

    /// Socket address of the delivery endpoint.
    #[must_use]
    pub const fn delivery_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.delivery_port)
    }

    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Reads `key` and parses it with `parse`; missing or unparsable values
/// yield `default`.
fn env_or<T>(key: &str, default: T, parse: impl FnOnce(&str) -> Option<T>) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| parse(raw.trim()))
        .unwrap_or(default)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_or(key, default, |raw| raw.parse().ok())
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    env_or(key, default, parse_bool)
}

/// Accepts `true`/`1` and `false`/`0`, ignoring ASCII case.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}
