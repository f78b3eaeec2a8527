#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-store-core** – Repository trait abstractions for the
//! collaboration event-processing core.
//!
//! This crate defines storage-agnostic traits for the core's domain
//! entities. Concrete drivers ([`collab-store-memory`](../collab_store_memory),
//! [`collab-store-sled`](../collab_store_sled),
//! [`collab-store-sqlite`](../collab_store_sqlite)) implement these traits;
//! domain crates depend only on the traits here, never on a specific
//! backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_types::{AutomationRule, Notification, Ownership, RateWindow, RawEvent, RuleExecution, Task};
use uuid::Uuid;

/// Errors returned by a repository implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// No record matched the requested key.
    #[error("not found: {0}")]
    NotFound(String),
    /// The concrete backend failed (I/O, serialization, connection loss).
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Persists raw inbound events and tracks whether they have been processed.
///
/// Method names are unique across every trait in this crate (`insert_event`
/// rather than `insert`, etc.) so that a single backend implementing several
/// repositories at once — every concrete driver in this workspace does — can
/// still be called directly without `Trait::method(&store, ...)`
/// disambiguation at every call site.
#[async_trait]
pub trait RawEventRepository: Send + Sync {
    /// Insert a newly received event.
    async fn insert_event(&self, event: &RawEvent) -> Result<(), StorageError>;

    /// Fetch an event by id.
    async fn get_event(&self, id: Uuid) -> Result<Option<RawEvent>, StorageError>;

    /// Record that an event has been fully processed.
    async fn mark_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;
}

/// Stores per-(repo, file, user) ownership rows and their derived scores.
#[async_trait]
pub trait OwnershipRepository: Send + Sync {
    /// Insert or replace a single ownership row.
    async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError>;

    /// Fetch a single owner's row for `repo`/`file`, if one exists.
    async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError>;

    /// List every owner recorded for `repo`/`file`, in no particular order.
    async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError>;
}

/// Stores automation rules and their trigger-matching state.
#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Insert a new rule.
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError>;

    /// Fetch a rule by id.
    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError>;

    /// List every rule belonging to `team`, regardless of status.
    async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError>;

    /// Overwrite a rule's persisted state (status, execution_count, ...).
    async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError>;
}

/// Records the outcome of each automation rule evaluation.
#[async_trait]
pub trait RuleExecutionRepository: Send + Sync {
    /// Insert an execution record.
    async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError>;

    /// List executions for a given rule, most recent first.
    async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError>;
}

/// Stores delivered/pending notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Insert a newly rendered notification.
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError>;

    /// List notifications addressed to `recipient`, most recent first.
    async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError>;

    /// Mark a notification as read.
    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StorageError>;
}

/// Sliding-window rate-limit counters keyed by an opaque string (typically
/// `"{recipient}:{window_start_bucket}"` or similar caller-defined scheme).
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Increment the counter for `key`, creating it with `window` as its
    /// time-to-live if this is the first increment. Returns the counter's
    /// value *after* the increment.
    async fn increment(&self, key: &str, window: chrono::Duration) -> Result<u32, StorageError>;

    /// Read the current counter for `key` without mutating it. Returns
    /// `None` if the key does not exist or has expired.
    async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError>;
}

/// Stores tasks, whether created directly by an action executor or extracted
/// from issue/PR content.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a newly created task.
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError>;

    /// Fetch a task by id.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StorageError>;

    /// Overwrite a task's persisted state (status, assignee, completed_at, ...).
    async fn update_task(&self, task: &Task) -> Result<(), StorageError>;

    /// Count tasks owned by `team` assigned to `user` that are not yet
    /// completed. Used by the task monitor's `all_tasks_completed` trigger.
    async fn count_open_tasks_for_user(&self, team: &str, user: &str) -> Result<u64, StorageError>;

    /// Find a previously extracted task by its source lineage, for dedup on
    /// stream replay.
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Task>, StorageError>;
}

// Blanket impls so callers can share one store instance across several
// consumers (e.g. a rate limiter and a notification writer backed by the
// same `Arc<Store>`) without each needing its own generic parameter.

#[async_trait]
impl<T: RawEventRepository + ?Sized> RawEventRepository for std::sync::Arc<T> {
    async fn insert_event(&self, event: &RawEvent) -> Result<(), StorageError> {
        (**self).insert_event(event).await
    }
    async fn get_event(&self, id: Uuid) -> Result<Option<RawEvent>, StorageError> {
        (**self).get_event(id).await
    }
    async fn mark_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        (**self).mark_event_processed(id, at).await
    }
}

#[async_trait]
impl<T: OwnershipRepository + ?Sized> OwnershipRepository for std::sync::Arc<T> {
    async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError> {
        (**self).upsert_ownership(ownership).await
    }
    async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError> {
        (**self).get_ownership(repo, file, user).await
    }
    async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError> {
        (**self).list_owners(repo, file).await
    }
}

#[async_trait]
impl<T: RuleRepository + ?Sized> RuleRepository for std::sync::Arc<T> {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        (**self).insert_rule(rule).await
    }
    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        (**self).get_rule(id).await
    }
    async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError> {
        (**self).list_rules_for_team(team).await
    }
    async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        (**self).update_rule(rule).await
    }
}

#[async_trait]
impl<T: RuleExecutionRepository + ?Sized> RuleExecutionRepository for std::sync::Arc<T> {
    async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError> {
        (**self).insert_execution(execution).await
    }
    async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError> {
        (**self).list_executions_for_rule(rule_id).await
    }
}

#[async_trait]
impl<T: NotificationRepository + ?Sized> NotificationRepository for std::sync::Arc<T> {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        (**self).insert_notification(notification).await
    }
    async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError> {
        (**self).list_notifications_for_recipient(recipient).await
    }
    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StorageError> {
        (**self).mark_notification_read(id).await
    }
}

#[async_trait]
impl<T: RateLimitRepository + ?Sized> RateLimitRepository for std::sync::Arc<T> {
    async fn increment(&self, key: &str, window: chrono::Duration) -> Result<u32, StorageError> {
        (**self).increment(key, window).await
    }
    async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
        (**self).current(key).await
    }
}

#[async_trait]
impl<T: TaskRepository + ?Sized> TaskRepository for std::sync::Arc<T> {
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        (**self).insert_task(task).await
    }
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        (**self).get_task(id).await
    }
    async fn update_task(&self, task: &Task) -> Result<(), StorageError> {
        (**self).update_task(task).await
    }
    async fn count_open_tasks_for_user(&self, team: &str, user: &str) -> Result<u64, StorageError> {
        (**self).count_open_tasks_for_user(team, user).await
    }
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Task>, StorageError> {
        (**self).find_by_source(source, source_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_error_messages_are_descriptive() {
        let err = StorageError::NotFound("raw_event:1234".to_string());
        assert_eq!(err.to_string(), "not found: raw_event:1234");
    }
}
