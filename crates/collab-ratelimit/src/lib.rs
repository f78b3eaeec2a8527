#![forbid(unsafe_code)]

//! **collab-ratelimit** – per-recipient sliding-window throttle for notification fan-out.
//!
//! Notification delivery must not flood a recipient with chat messages when an
//! upstream burst of events (a large rebase, a noisy CI run) produces many
//! notification-worthy changes in a short span. This crate wraps a
//! [`collab_store_core::RateLimitRepository`] with the decision logic the fan-out
//! worker needs: check the recipient's current window, and either allow the send
//! (recording it) or report the recipient over limit so the caller can
//! acknowledge-and-drop without retrying.

use async_trait::async_trait;
use chrono::Duration;
use collab_store_core::{RateLimitRepository, StorageError};
use collab_types::RateWindow;
use thiserror::Error;
use tracing::debug;

/// Default number of notifications allowed per recipient per window.
pub const DEFAULT_LIMIT: u32 = 10;

/// Default window length for the default limit.
pub fn default_window() -> Duration {
    Duration::seconds(60)
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitResult {
    /// The send is allowed; `remaining` is how many more fit in the current window.
    Allowed {
        /// Remaining capacity in the current window after this send.
        remaining: u32,
    },
    /// The recipient is over limit for the current window.
    Limited {
        /// Number of notifications already recorded in the current window.
        current_usage: u32,
    },
}

impl RateLimitResult {
    /// Whether the operation is allowed to proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Errors surfaced by the rate limiter.
#[derive(Error, Debug)]
pub enum RateLimitError {
    /// The limit or window configuration was invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration for a [`NotificationRateLimiter`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Maximum number of notifications allowed per recipient per window.
    pub limit: u32,
    /// Window duration.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: default_window(),
        }
    }
}

/// Checks and records per-recipient notification throughput against a sliding window.
pub struct NotificationRateLimiter<R>
where
    R: RateLimitRepository,
{
    repo: R,
    config: RateLimitConfig,
}

impl<R> NotificationRateLimiter<R>
where
    R: RateLimitRepository,
{
    /// Create a limiter with the default limit and window.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            config: RateLimitConfig::default(),
        }
    }

    /// Create a limiter with an explicit configuration.
    pub fn with_config(repo: R, config: RateLimitConfig) -> Result<Self, RateLimitError> {
        if config.limit == 0 {
            return Err(RateLimitError::InvalidConfig(
                "limit must be greater than 0".to_string(),
            ));
        }
        if config.window.num_seconds() <= 0 {
            return Err(RateLimitError::InvalidConfig(
                "window duration must be positive".to_string(),
            ));
        }
        Ok(Self { repo, config })
    }

    /// Check the recipient's current window without recording a send.
    pub async fn peek(&self, recipient: &str) -> Result<Option<RateWindow>, RateLimitError> {
        Ok(self.repo.current(recipient).await?)
    }

    /// Check whether `recipient` is under limit; if so, record this send and
    /// return `Allowed`. If the recipient is already at or over `limit`, the
    /// counter is left untouched and `Limited` is returned so the caller can
    /// acknowledge-and-drop the notification without retrying.
    pub async fn check_and_record(&self, recipient: &str) -> Result<RateLimitResult, RateLimitError> {
        let current = self.repo.current(recipient).await?.map(|w| w.counter).unwrap_or(0);

        if current >= self.config.limit {
            debug!(recipient, current, limit = self.config.limit, "recipient over notification rate limit");
            return Ok(RateLimitResult::Limited { current_usage: current });
        }

        let counter = self.repo.increment(recipient, self.config.window).await?;
        Ok(RateLimitResult::Allowed {
            remaining: self.config.limit.saturating_sub(counter),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockRepo {
        windows: Mutex<HashMap<String, RateWindow>>,
    }

    #[async_trait]
    impl RateLimitRepository for MockRepo {
        async fn increment(&self, key: &str, window: Duration) -> Result<u32, StorageError> {
            let mut windows = self.windows.lock().unwrap();
            let now = Utc::now();
            let entry = windows.entry(key.to_string()).or_insert(RateWindow {
                counter: 0,
                expires_at: now + window,
            });
            if entry.expires_at <= now {
                entry.counter = 0;
                entry.expires_at = now + window;
            }
            entry.counter += 1;
            Ok(entry.counter)
        }

        async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
            let windows = self.windows.lock().unwrap();
            Ok(windows.get(key).copied().filter(|w| w.expires_at > Utc::now()))
        }
    }

    #[tokio::test]
    async fn allows_sends_under_limit() {
        let limiter = NotificationRateLimiter::with_config(
            MockRepo::default(),
            RateLimitConfig { limit: 2, window: Duration::seconds(60) },
        )
        .unwrap();

        let first = limiter.check_and_record("alice").await.unwrap();
        assert_eq!(first, RateLimitResult::Allowed { remaining: 1 });

        let second = limiter.check_and_record("alice").await.unwrap();
        assert_eq!(second, RateLimitResult::Allowed { remaining: 0 });
    }

    #[tokio::test]
    async fn blocks_sends_over_limit_without_incrementing() {
        let limiter = NotificationRateLimiter::with_config(
            MockRepo::default(),
            RateLimitConfig { limit: 1, window: Duration::seconds(60) },
        )
        .unwrap();

        assert!(limiter.check_and_record("bob").await.unwrap().is_allowed());
        let blocked = limiter.check_and_record("bob").await.unwrap();
        assert_eq!(blocked, RateLimitResult::Limited { current_usage: 1 });

        let still_blocked = limiter.check_and_record("bob").await.unwrap();
        assert_eq!(still_blocked, RateLimitResult::Limited { current_usage: 1 });
    }

    #[tokio::test]
    async fn recipients_are_tracked_independently() {
        let limiter = NotificationRateLimiter::with_config(
            MockRepo::default(),
            RateLimitConfig { limit: 1, window: Duration::seconds(60) },
        )
        .unwrap();

        assert!(limiter.check_and_record("alice").await.unwrap().is_allowed());
        assert!(limiter.check_and_record("bob").await.unwrap().is_allowed());
    }

    #[test]
    fn rejects_zero_limit() {
        let result = NotificationRateLimiter::with_config(
            MockRepo::default(),
            RateLimitConfig { limit: 0, window: Duration::seconds(60) },
        );
        assert!(matches!(result, Err(RateLimitError::InvalidConfig(_))));
    }
}
