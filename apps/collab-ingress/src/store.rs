//! Runtime-selected storage backend.
//!
//! `collab-store-sqlite` backs the relationally-shaped entities (raw events,
//! rules, executions, notifications); `collab-store-sled` backs the
//! hot-path keyed lookups (ownership, rate-limit windows). A single-process
//! development deployment can use `collab-store-memory` for everything
//! instead. [`Store`] is a thin enum dispatching each repository trait to
//! whichever concrete backend owns that entity, so the rest of the
//! application is written once against the trait boundary.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use collab_store_core::{
    NotificationRepository, OwnershipRepository, RateLimitRepository, RawEventRepository,
    RuleExecutionRepository, RuleRepository, StorageError, TaskRepository,
};
use collab_store_memory::MemoryStore;
use collab_store_sled::SledStore;
use collab_store_sqlite::SqliteStore;
use collab_types::{AutomationRule, Notification, Ownership, RateWindow, RawEvent, RuleExecution, Task};
use uuid::Uuid;

/// The selected backend, cheap to clone (each variant holds only `Arc`s).
///
/// Neither `collab-store-sqlite` nor `collab-store-sled` implements
/// [`TaskRepository`] yet (task persistence was added after both drivers);
/// the composite backend keeps tasks in an in-memory side table until one
/// of them grows a real implementation. This is a known, flagged gap, not a
/// silent one: a process restart loses task state under the composite
/// backend.
#[derive(Clone)]
pub enum Store {
    /// All entities in one non-persistent in-memory store.
    Memory(Arc<MemoryStore>),
    /// Relational entities in SQLite, keyed lookups in sled, tasks in memory.
    Composite {
        /// Backs raw events, rules, rule executions, notifications.
        sqlite: Arc<SqliteStore>,
        /// Backs ownership rows and rate-limit windows.
        sled: Arc<SledStore>,
        /// Backs tasks, pending a durable driver.
        tasks: Arc<MemoryStore>,
    },
}

impl Store {
    /// Build the in-memory backend.
    pub fn memory() -> Self {
        Store::Memory(Arc::new(MemoryStore::new()))
    }

    /// Open the persistent backend: a SQLite database at `sqlite_path` and a
    /// sled tree at `sled_path`.
    pub async fn open(sqlite_path: impl AsRef<Path>, sled_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let sqlite = SqliteStore::open(sqlite_path).await?;
        let sled = SledStore::open(sled_path)?;
        Ok(Store::Composite { sqlite: Arc::new(sqlite), sled: Arc::new(sled), tasks: Arc::new(MemoryStore::new()) })
    }
}

#[async_trait]
impl RawEventRepository for Store {
    async fn insert_event(&self, event: &RawEvent) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.insert_event(event).await,
            Store::Composite { sqlite, .. } => sqlite.insert_event(event).await,
        }
    }
    async fn get_event(&self, id: Uuid) -> Result<Option<RawEvent>, StorageError> {
        match self {
            Store::Memory(s) => s.get_event(id).await,
            Store::Composite { sqlite, .. } => sqlite.get_event(id).await,
        }
    }
    async fn mark_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.mark_event_processed(id, at).await,
            Store::Composite { sqlite, .. } => sqlite.mark_event_processed(id, at).await,
        }
    }
}

#[async_trait]
impl OwnershipRepository for Store {
    async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.upsert_ownership(ownership).await,
            Store::Composite { sled, .. } => sled.upsert_ownership(ownership).await,
        }
    }
    async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError> {
        match self {
            Store::Memory(s) => s.get_ownership(repo, file, user).await,
            Store::Composite { sled, .. } => sled.get_ownership(repo, file, user).await,
        }
    }
    async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError> {
        match self {
            Store::Memory(s) => s.list_owners(repo, file).await,
            Store::Composite { sled, .. } => sled.list_owners(repo, file).await,
        }
    }
}

#[async_trait]
impl RuleRepository for Store {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.insert_rule(rule).await,
            Store::Composite { sqlite, .. } => sqlite.insert_rule(rule).await,
        }
    }
    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        match self {
            Store::Memory(s) => s.get_rule(id).await,
            Store::Composite { sqlite, .. } => sqlite.get_rule(id).await,
        }
    }
    async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError> {
        match self {
            Store::Memory(s) => s.list_rules_for_team(team).await,
            Store::Composite { sqlite, .. } => sqlite.list_rules_for_team(team).await,
        }
    }
    async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.update_rule(rule).await,
            Store::Composite { sqlite, .. } => sqlite.update_rule(rule).await,
        }
    }
}

#[async_trait]
impl RuleExecutionRepository for Store {
    async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.insert_execution(execution).await,
            Store::Composite { sqlite, .. } => sqlite.insert_execution(execution).await,
        }
    }
    async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError> {
        match self {
            Store::Memory(s) => s.list_executions_for_rule(rule_id).await,
            Store::Composite { sqlite, .. } => sqlite.list_executions_for_rule(rule_id).await,
        }
    }
}

#[async_trait]
impl NotificationRepository for Store {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.insert_notification(notification).await,
            Store::Composite { sqlite, .. } => sqlite.insert_notification(notification).await,
        }
    }
    async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError> {
        match self {
            Store::Memory(s) => s.list_notifications_for_recipient(recipient).await,
            Store::Composite { sqlite, .. } => sqlite.list_notifications_for_recipient(recipient).await,
        }
    }
    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.mark_notification_read(id).await,
            Store::Composite { sqlite, .. } => sqlite.mark_notification_read(id).await,
        }
    }
}

#[async_trait]
impl TaskRepository for Store {
    async fn insert_task(&self, task: &Task) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.insert_task(task).await,
            Store::Composite { tasks, .. } => tasks.insert_task(task).await,
        }
    }
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StorageError> {
        match self {
            Store::Memory(s) => s.get_task(id).await,
            Store::Composite { tasks, .. } => tasks.get_task(id).await,
        }
    }
    async fn update_task(&self, task: &Task) -> Result<(), StorageError> {
        match self {
            Store::Memory(s) => s.update_task(task).await,
            Store::Composite { tasks, .. } => tasks.update_task(task).await,
        }
    }
    async fn count_open_tasks_for_user(&self, team: &str, user: &str) -> Result<u64, StorageError> {
        match self {
            Store::Memory(s) => s.count_open_tasks_for_user(team, user).await,
            Store::Composite { tasks, .. } => tasks.count_open_tasks_for_user(team, user).await,
        }
    }
    async fn find_by_source(&self, source: &str, source_id: &str) -> Result<Option<Task>, StorageError> {
        match self {
            Store::Memory(s) => s.find_by_source(source, source_id).await,
            Store::Composite { tasks, .. } => tasks.find_by_source(source, source_id).await,
        }
    }
}

#[async_trait]
impl RateLimitRepository for Store {
    async fn increment(&self, key: &str, window: Duration) -> Result<u32, StorageError> {
        match self {
            Store::Memory(s) => s.increment(key, window).await,
            Store::Composite { sled, .. } => sled.increment(key, window).await,
        }
    }
    async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
        match self {
            Store::Memory(s) => s.current(key).await,
            Store::Composite { sled, .. } => sled.current(key).await,
        }
    }
}
