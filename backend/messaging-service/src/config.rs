use dotenvy::dotenv;
use std::env;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Messages per user per sliding window
    pub messages_per_window: usize,
    /// All other API mutations per user per sliding window
    pub requests_per_window: usize,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            messages_per_window: 30,
            requests_per_window: 120,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// Bounded outbound queue depth per live connection. A subscriber whose
    /// queue is full when an event is published gets disconnected.
    pub ws_send_queue_capacity: usize,
    pub rate_limit: RateLimitConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, crate::error::AppError> {
        dotenv().ok();
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:messaging.db?mode=rwc".into());
        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3000);
        let ws_send_queue_capacity = env::var("WS_SEND_QUEUE_CAPACITY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(64);

        let defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig {
            messages_per_window: env::var("RATE_LIMIT_MESSAGES_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.messages_per_window),
            requests_per_window: env::var("RATE_LIMIT_REQUESTS_PER_WINDOW")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.requests_per_window),
            window_secs: env::var("RATE_LIMIT_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.window_secs),
        };

        Ok(Self {
            database_url,
            port,
            ws_send_queue_capacity,
            rate_limit,
        })
    }

    pub fn test_defaults() -> Self {
        Self {
            database_url: "sqlite::memory:".into(),
            port: 3000,
            ws_send_queue_capacity: 8,
            rate_limit: RateLimitConfig::default(),
        }
    }
}
