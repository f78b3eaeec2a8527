#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-notify** – rate-limited notification fan-out.
//!
//! Consumes a notification request, checks the recipient's sliding-window
//! rate limit, resolves which channels the recipient wants it on, renders a
//! per-channel message, persists the [`Notification`] record, and delivers
//! it. A recipient over their limit is acknowledged and dropped rather than
//! retried — the caller (the notification worker) must not resend it.
//!
//! The store type parameter is cloned once at construction time to back both
//! the rate limiter and the notification writer; pass an `Arc<Store>` (or any
//! other cheaply-cloneable handle) rather than a bare in-memory store whose
//! clone would fork its data.

use async_trait::async_trait;
use collab_ratelimit::{NotificationRateLimiter, RateLimitConfig, RateLimitError, RateLimitResult};
use collab_store_core::{NotificationRepository, RateLimitRepository, StorageError};
use collab_types::{Notification, Priority};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Delivery channels a notification can be rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationChannel {
    /// A chat platform message (structured block).
    Chat,
    /// An email message.
    Email,
}

/// Resolves which channels a recipient wants notifications delivered on.
#[async_trait]
pub trait RecipientPreferences: Send + Sync {
    /// Channels `recipient` should receive notifications on, in delivery order.
    async fn channels_for(&self, recipient: &str) -> Vec<NotificationChannel>;
}

/// Preference resolver that always delivers to chat only. Used when no
/// preference store is wired up; every recipient exists in chat by construction.
pub struct ChatOnlyPreferences;

#[async_trait]
impl RecipientPreferences for ChatOnlyPreferences {
    async fn channels_for(&self, _recipient: &str) -> Vec<NotificationChannel> {
        vec![NotificationChannel::Chat]
    }
}

/// A rendered, channel-ready message.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    /// Short header line, e.g. a title.
    pub header: String,
    /// Main body text.
    pub body: String,
    /// Optional supporting context (source repo, affected files, ...).
    pub context: Option<String>,
    /// Optional action button label.
    pub action_label: Option<String>,
    /// Optional action button target.
    pub action_url: Option<String>,
}

/// Delivers a rendered message to a recipient on a specific channel. The
/// concrete chat/email client lives outside this crate; this is the capability
/// boundary it implements.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Deliver `message` to `recipient` over `channel`.
    async fn send(&self, recipient: &str, channel: NotificationChannel, message: &ChannelMessage) -> Result<(), String>;
}

/// A notification pending fan-out.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    /// Recipient identifier.
    pub recipient: String,
    /// Owning team.
    pub team: String,
    /// Notification kind, e.g. `"change_impact"`.
    pub kind: String,
    /// Short title.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Optional link back to the originating change.
    pub source_ref: Option<String>,
    /// Delivery priority.
    pub priority: Priority,
}

/// Outcome of attempting to fan out one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FanoutOutcome {
    /// Delivered and persisted.
    Delivered,
    /// Recipient was over their rate limit; acknowledged without delivery.
    RateLimited,
}

/// Errors raised while fanning out a notification.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// The request failed length/format validation.
    #[error("invalid notification: {0}")]
    Invalid(String),
    /// The underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),
    /// The rate limiter's configuration or backend failed.
    #[error("rate limiter error: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Checks, renders, persists, and delivers notifications.
pub struct NotificationFanout<R, P, S>
where
    R: RateLimitRepository + NotificationRepository,
    P: RecipientPreferences,
    S: ChannelSender,
{
    store: R,
    limiter: NotificationRateLimiter<R>,
    preferences: P,
    sender: S,
}

impl<R, P, S> NotificationFanout<R, P, S>
where
    R: RateLimitRepository + NotificationRepository + Clone,
    P: RecipientPreferences,
    S: ChannelSender,
{
    /// Build a fanout worker with the default rate limit (10 per 60s per recipient).
    pub fn new(store: R, preferences: P, sender: S) -> Self {
        let limiter = NotificationRateLimiter::new(store.clone());
        Self { store, limiter, preferences, sender }
    }

    /// Build a fanout worker with an explicit rate limit configuration.
    pub fn with_rate_limit(store: R, config: RateLimitConfig, preferences: P, sender: S) -> Result<Self, NotifyError> {
        let limiter = NotificationRateLimiter::with_config(store.clone(), config)?;
        Ok(Self { store, limiter, preferences, sender })
    }

    /// Check the recipient's rate limit, render, persist, and deliver the
    /// notification. Returns [`FanoutOutcome::RateLimited`] without
    /// persisting or delivering anything when the recipient is over limit.
    pub async fn fan_out(&self, request: NotificationRequest) -> Result<FanoutOutcome, NotifyError> {
        match self.limiter.check_and_record(&request.recipient).await? {
            RateLimitResult::Limited { current_usage } => {
                debug!(recipient = %request.recipient, current_usage, "notification dropped: recipient over rate limit");
                return Ok(FanoutOutcome::RateLimited);
            }
            RateLimitResult::Allowed { .. } => {}
        }

        let notification = Notification::new(
            &request.recipient,
            &request.team,
            &request.kind,
            &request.title,
            &request.body,
            request.source_ref.clone(),
            request.priority,
        )
        .map_err(NotifyError::Invalid)?;

        self.store.insert_notification(&notification).await?;

        let channels = self.preferences.channels_for(&request.recipient).await;
        let message = render(&request);

        let mut delivered_channels = Vec::new();
        for channel in channels {
            match self.sender.send(&request.recipient, channel, &message).await {
                Ok(()) => delivered_channels.push(format!("{:?}", channel).to_lowercase()),
                Err(err) => warn!(recipient = %request.recipient, ?channel, error = %err, "channel delivery failed"),
            }
        }

        info!(recipient = %request.recipient, notification_id = %notification.id, channels = ?delivered_channels, "notification delivered");
        Ok(FanoutOutcome::Delivered)
    }
}

fn render(request: &NotificationRequest) -> ChannelMessage {
    ChannelMessage {
        header: request.title.clone(),
        body: request.body.clone(),
        context: request.source_ref.clone(),
        action_label: request.source_ref.as_ref().map(|_| "View".to_string()),
        action_url: request.source_ref.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use collab_types::RateWindow;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default, Clone)]
    struct MemoryStore {
        inner: std::sync::Arc<Mutex<Inner>>,
    }

    #[derive(Default)]
    struct Inner {
        notifications: Vec<Notification>,
        windows: HashMap<String, RateWindow>,
    }

    #[async_trait]
    impl NotificationRepository for MemoryStore {
        async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
            self.inner.lock().unwrap().notifications.push(notification.clone());
            Ok(())
        }
        async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError> {
            Ok(self.inner.lock().unwrap().notifications.iter().filter(|n| n.recipient == recipient).cloned().collect())
        }
        async fn mark_notification_read(&self, id: uuid::Uuid) -> Result<(), StorageError> {
            let mut inner = self.inner.lock().unwrap();
            match inner.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) => {
                    n.is_read = true;
                    Ok(())
                }
                None => Err(StorageError::NotFound(id.to_string())),
            }
        }
    }

    #[async_trait]
    impl RateLimitRepository for MemoryStore {
        async fn increment(&self, key: &str, window: Duration) -> Result<u32, StorageError> {
            let mut inner = self.inner.lock().unwrap();
            let now: DateTime<Utc> = Utc::now();
            let entry = inner.windows.entry(key.to_string()).or_insert(RateWindow { counter: 0, expires_at: now + window });
            if entry.expires_at <= now {
                entry.counter = 0;
                entry.expires_at = now + window;
            }
            entry.counter += 1;
            Ok(entry.counter)
        }
        async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.windows.get(key).copied().filter(|w| w.expires_at > Utc::now()))
        }
    }

    struct RecordingSender {
        sent: std::sync::Arc<Mutex<Vec<(String, NotificationChannel)>>>,
    }

    #[async_trait]
    impl ChannelSender for RecordingSender {
        async fn send(&self, recipient: &str, channel: NotificationChannel, _message: &ChannelMessage) -> Result<(), String> {
            self.sent.lock().unwrap().push((recipient.to_string(), channel));
            Ok(())
        }
    }

    fn request(recipient: &str) -> NotificationRequest {
        NotificationRequest {
            recipient: recipient.to_string(),
            team: "acme".to_string(),
            kind: "change_impact".to_string(),
            title: "Breaking change".to_string(),
            body: "auth.rs changed its public signature".to_string(),
            source_ref: Some("https://example.com/commit/abc".to_string()),
            priority: Priority::High,
        }
    }

    #[tokio::test]
    async fn delivers_and_persists_under_limit() {
        let sent = std::sync::Arc::new(Mutex::new(Vec::new()));
        let fanout = NotificationFanout::new(MemoryStore::default(), ChatOnlyPreferences, RecordingSender { sent: sent.clone() });

        let outcome = fanout.fan_out(request("alice")).await.unwrap();
        assert_eq!(outcome, FanoutOutcome::Delivered);
        assert_eq!(sent.lock().unwrap().len(), 1);

        let stored = fanout.store.list_notifications_for_recipient("alice").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "Breaking change");
    }

    #[tokio::test]
    async fn drops_without_delivering_when_over_limit() {
        let sent = std::sync::Arc::new(Mutex::new(Vec::new()));
        let config = RateLimitConfig { limit: 1, window: Duration::seconds(60) };
        let fanout = NotificationFanout::with_rate_limit(MemoryStore::default(), config, ChatOnlyPreferences, RecordingSender { sent: sent.clone() }).unwrap();

        assert_eq!(fanout.fan_out(request("bob")).await.unwrap(), FanoutOutcome::Delivered);
        assert_eq!(fanout.fan_out(request("bob")).await.unwrap(), FanoutOutcome::RateLimited);

        assert_eq!(sent.lock().unwrap().len(), 1);
        let stored = fanout.store.list_notifications_for_recipient("bob").await.unwrap();
        assert_eq!(stored.len(), 1, "the rate-limited send must not persist a second notification");
    }
}
