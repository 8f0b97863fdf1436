//! Transport-boundary rate limiting.
//!
//! Sliding window per (principal, action). Lives entirely at the HTTP and
//! WebSocket edge; the messaging core itself never rate-limits. The limiter
//! is an injected component on `AppState`, not a process-global.

use axum::extract::State;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RateLimitConfig;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionType {
    SendMessage,
    Mutation,
}

impl ActionType {
    fn classify(method: &axum::http::Method, path: &str) -> Option<Self> {
        if method == axum::http::Method::GET {
            return None;
        }
        if path.ends_with("/messages") {
            return Some(ActionType::SendMessage);
        }
        Some(ActionType::Mutation)
    }
}

#[derive(Debug)]
pub struct RateLimitError {
    pub retry_after_secs: u64,
}

pub struct RateLimiter {
    windows: Mutex<HashMap<(Uuid, ActionType), VecDeque<Instant>>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn limit_for(&self, action: ActionType) -> usize {
        match action {
            ActionType::SendMessage => self.config.messages_per_window,
            ActionType::Mutation => self.config.requests_per_window,
        }
    }

    /// Record one action if the window has room, otherwise reject with a
    /// retry-after hint. Expired entries are evicted on the way in, and an
    /// emptied window drops its key entirely.
    pub async fn check(&self, user_id: Uuid, action: ActionType) -> Result<(), RateLimitError> {
        let window_duration = Duration::from_secs(self.config.window_secs);
        let limit = self.limit_for(action);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;

        // Evict other keys whose windows have fully expired.
        windows.retain(|_, window| {
            window
                .back()
                .map(|last| now.duration_since(*last) <= window_duration)
                .unwrap_or(false)
        });

        let window = windows.entry((user_id, action)).or_default();
        while let Some(&front) = window.front() {
            if now.duration_since(front) > window_duration {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= limit {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = window_duration
                .saturating_sub(now.duration_since(oldest))
                .as_secs();
            return Err(RateLimitError {
                retry_after_secs: retry_after.max(1),
            });
        }

        window.push_back(now);
        Ok(())
    }
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    let action = ActionType::classify(req.method(), req.uri().path());
    if let (Some(action), Some(user_id)) = (action, req.extensions().get::<Uuid>().copied()) {
        state
            .rate_limiter
            .check(user_id, action)
            .await
            .map_err(|e| AppError::RateLimited {
                retry_after_secs: e.retry_after_secs,
            })?;
    }
    Ok(next.run(req).await)
}
