#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-store-memory** – In-memory repository implementations.
//!
//! A single [`MemoryStore`] backs all of `collab-store-core`'s repository
//! traits. It is the default backend for tests and single-process
//! development; all data is lost when the process terminates. See
//! `collab-store-sled` and `collab-store-sqlite` for durable drivers.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use collab_store_core::{
    NotificationRepository, OwnershipRepository, RateLimitRepository, RawEventRepository,
    RuleExecutionRepository, RuleRepository, StorageError, TaskRepository,
};
use collab_types::{AutomationRule, Notification, Ownership, RateWindow, RawEvent, RuleExecution, Task, TaskStatus};
use dashmap::DashMap;
use uuid::Uuid;

/// In-memory, non-persistent store backing every repository trait.
#[derive(Debug, Default)]
pub struct MemoryStore {
    raw_events: DashMap<Uuid, RawEvent>,
    ownership: DashMap<(String, String, String), Ownership>,
    rules: DashMap<Uuid, AutomationRule>,
    rule_executions: DashMap<Uuid, Vec<RuleExecution>>,
    notifications: DashMap<Uuid, Notification>,
    rate_windows: DashMap<String, RateWindow>,
    tasks: DashMap<Uuid, Task>,
}

impl MemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RawEventRepository for MemoryStore {
    async fn insert_event(&self, event: &RawEvent) -> Result<(), StorageError> {
        self.raw_events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<RawEvent>, StorageError> {
        Ok(self.raw_events.get(&id).map(|e| e.clone()))
    }

    async fn mark_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut event = self
            .raw_events
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("raw_event:{id}")))?;
        event.mark_processed(at);
        Ok(())
    }
}

#[async_trait]
impl OwnershipRepository for MemoryStore {
    async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError> {
        let key = (
            ownership.repo.clone(),
            ownership.file.clone(),
            ownership.user.clone(),
        );
        self.ownership.insert(key, ownership.clone());
        Ok(())
    }

    async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError> {
        let key = (repo.to_string(), file.to_string(), user.to_string());
        Ok(self.ownership.get(&key).map(|o| o.clone()))
    }

    async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError> {
        Ok(self
            .ownership
            .iter()
            .filter(|entry| entry.key().0 == repo && entry.key().1 == file)
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[async_trait]
impl RuleRepository for MemoryStore {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        Ok(self.rules.get(&id).map(|r| r.clone()))
    }

    async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError> {
        Ok(self
            .rules
            .iter()
            .filter(|entry| entry.value().team == team)
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        if !self.rules.contains_key(&rule.id) {
            return Err(StorageError::NotFound(format!("rule:{}", rule.id)));
        }
        self.rules.insert(rule.id, rule.clone());
        Ok(())
    }
}

#[async_trait]
impl RuleExecutionRepository for MemoryStore {
    async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError> {
        self.rule_executions
            .entry(execution.rule_id)
            .or_default()
            .push(execution.clone());
        Ok(())
    }

    async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError> {
        let mut executions = self
            .rule_executions
            .get(&rule_id)
            .map(|v| v.clone())
            .unwrap_or_default();
        executions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(executions)
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        self.notifications.insert(notification.id, notification.clone());
        Ok(())
    }

    async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .iter()
            .filter(|entry| entry.value().recipient == recipient)
            .map(|entry| entry.value().clone())
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StorageError> {
        let mut notification = self
            .notifications
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("notification:{id}")))?;
        notification.is_read = true;
        Ok(())
    }
}

#[async_trait]
impl RateLimitRepository for MemoryStore {
    async fn increment(&self, key: &str, window: ChronoDuration) -> Result<u32, StorageError> {
        let now = Utc::now();
        let mut entry = self
            .rate_windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow { counter: 0, expires_at: now + window });

        if entry.expires_at <= now {
            entry.counter = 0;
            entry.expires_at = now + window;
        }
        entry.counter += 1;
        Ok(entry.counter)
    }

    async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
        let now = Utc::now();
        Ok(self.rate_windows.get(key).and_then(|entry| {
            if entry.expires_at > now {
                Some(*entry)
            } else {
                None
            }
        }))
    }
}

#[async_trait]
impl TaskRepository for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        Ok(self.tasks.get(&id).map(|t| t.clone()))
    }

    async fn update_task(&self, task: &Task) -> Result<(), StorageError> {
        if !self.tasks.contains_key(&task.id) {
            return Err(StorageError::NotFound(format!("task:{}", task.id)));
        }
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn count_open_tasks_for_user(&self, team: &str, user: &str) -> Result<u64, StorageError> {
        Ok(self
            .tasks
            .iter()
            .filter(|entry| {
                let task = entry.value();
                task.team == team && task.assigned_to.as_deref() == Some(user) && task.status != TaskStatus::Completed
            })
            .count() as u64)
    }

    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Task>, StorageError> {
        Ok(self
            .tasks
            .iter()
            .find(|entry| entry.value().source == source && entry.value().source_id.as_deref() == Some(source_id))
            .map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_types::{ExecutionStatus, Priority, RuleStatus};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn sample_event() -> RawEvent {
        RawEvent::new("git", "push", "acme/widgets", "alice", json!({"ref": "refs/heads/main"}))
    }

    fn sample_ownership(user: &str, score: f64) -> Ownership {
        let now = Utc::now();
        Ownership {
            repo: "acme/widgets".into(),
            file: "src/lib.rs".into(),
            user: user.into(),
            commits: 1,
            lines_added: 10,
            lines_removed: 0,
            first_commit_at: now,
            last_commit_at: now,
            score,
            recent_score: score,
        }
    }

    fn sample_rule() -> AutomationRule {
        AutomationRule {
            id: Uuid::new_v4(),
            team: "acme".into(),
            trigger_type: "task_completed".into(),
            trigger_conditions: HashMap::new(),
            action_type: "notify_user".into(),
            action_params: HashMap::new(),
            status: RuleStatus::Active,
            is_one_time: false,
            execution_count: 0,
        }
    }

    #[tokio::test]
    async fn raw_event_round_trips_and_marks_processed() {
        let store = MemoryStore::new();
        let event = sample_event();
        store.insert_event(&event).await.unwrap();

        let fetched = store.get_event(event.id).await.unwrap().unwrap();
        assert!(fetched.processed_at.is_none());

        store.mark_event_processed(event.id, Utc::now()).await.unwrap();
        let fetched = store.get_event(event.id).await.unwrap().unwrap();
        assert!(fetched.processed_at.is_some());
    }

    #[tokio::test]
    async fn get_on_unknown_event_returns_none() {
        let store = MemoryStore::new();
        assert!(store.get_event(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ownership_lists_all_owners_of_a_file() {
        let store = MemoryStore::new();
        store.upsert_ownership(&sample_ownership("alice", 0.7)).await.unwrap();
        store.upsert_ownership(&sample_ownership("bob", 0.3)).await.unwrap();

        let owners = store.list_owners("acme/widgets", "src/lib.rs").await.unwrap();
        assert_eq!(owners.len(), 2);
    }

    #[tokio::test]
    async fn ownership_upsert_replaces_existing_row() {
        let store = MemoryStore::new();
        store.upsert_ownership(&sample_ownership("alice", 0.2)).await.unwrap();
        store.upsert_ownership(&sample_ownership("alice", 0.9)).await.unwrap();

        let row = store.get_ownership("acme/widgets", "src/lib.rs", "alice").await.unwrap().unwrap();
        assert_eq!(row.score, 0.9);
    }

    #[tokio::test]
    async fn rule_update_rejects_unknown_rule() {
        let store = MemoryStore::new();
        let result = store.update_rule(&sample_rule()).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn rule_execution_history_is_most_recent_first() {
        let store = MemoryStore::new();
        let rule = sample_rule();
        store.insert_rule(&rule).await.unwrap();

        let first = RuleExecution {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            trigger_snapshot: Value::Null,
            status: ExecutionStatus::Success,
            actions_performed: vec![],
            error: None,
            timestamp: Utc::now(),
        };
        let second = RuleExecution {
            timestamp: first.timestamp + ChronoDuration::seconds(1),
            id: Uuid::new_v4(),
            ..first.clone()
        };
        store.insert_execution(&first).await.unwrap();
        store.insert_execution(&second).await.unwrap();

        let history = store.list_executions_for_rule(rule.id).await.unwrap();
        assert_eq!(history[0].id, second.id);
    }

    #[tokio::test]
    async fn notification_mark_read_is_idempotent() {
        let store = MemoryStore::new();
        let notification = Notification::new("alice", "acme", "change_impact", "t", "b", None, Priority::Normal).unwrap();
        store.insert_notification(&notification).await.unwrap();

        store.mark_notification_read(notification.id).await.unwrap();
        store.mark_notification_read(notification.id).await.unwrap();

        let listed = store.list_notifications_for_recipient("alice").await.unwrap();
        assert!(listed[0].is_read);
    }

    #[tokio::test]
    async fn rate_limit_resets_after_window_expires() {
        let store = MemoryStore::new();
        let short_window = ChronoDuration::milliseconds(50);

        let first = store.increment("alice:notify", short_window).await.unwrap();
        assert_eq!(first, 1);
        let second = store.increment("alice:notify", short_window).await.unwrap();
        assert_eq!(second, 2);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let after_expiry = store.increment("alice:notify", short_window).await.unwrap();
        assert_eq!(after_expiry, 1, "counter must reset once its window has expired");
    }

    #[tokio::test]
    async fn current_returns_none_once_expired() {
        let store = MemoryStore::new();
        let short_window = ChronoDuration::milliseconds(20);
        store.increment("alice:notify", short_window).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert!(store.current("alice:notify").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn count_open_tasks_excludes_completed_and_other_users() {
        let store = MemoryStore::new();
        let mut open = Task::new("acme", "fix bug", "alice", Priority::Normal, "manual", None);
        open.assigned_to = Some("bob".into());
        let mut done = Task::new("acme", "old bug", "alice", Priority::Normal, "manual", None);
        done.assigned_to = Some("bob".into());
        done.status = collab_types::TaskStatus::Completed;

        store.insert_task(&open).await.unwrap();
        store.insert_task(&done).await.unwrap();

        assert_eq!(store.count_open_tasks_for_user("acme", "bob").await.unwrap(), 1);
        assert_eq!(store.count_open_tasks_for_user("acme", "carol").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn find_by_source_dedupes_extracted_tasks() {
        let store = MemoryStore::new();
        let task = Task::new("acme", "follow up", "alice", Priority::Normal, "issue", Some("42".into()));
        store.insert_task(&task).await.unwrap();

        let found = store.find_by_source("issue", "42").await.unwrap().unwrap();
        assert_eq!(found.id, task.id);
        assert!(store.find_by_source("issue", "43").await.unwrap().is_none());
    }
}
