#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-store-sqlite** – SQLite-based persistent storage driver.
//!
//! Backs the relationally-shaped entities: raw inbound events, automation
//! rules, rule executions, and notifications. Each table stores its row as a
//! JSON blob alongside the columns the repositories actually query by,
//! mirroring how a document gets a thin relational index rather than a fully
//! normalized schema.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_store_core::{
    NotificationRepository, RawEventRepository, RuleExecutionRepository, RuleRepository,
    StorageError,
};
use collab_types::{AutomationRule, Notification, RawEvent, RuleExecution};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

fn backend_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// A persistent storage backend using SQLite, reachable through sqlx.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens or creates a SQLite database at `path`, running migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        let pool = SqlitePool::connect(&database_url).await.map_err(backend_err)?;
        Self::from_pool(pool).await
    }

    /// Opens an in-memory database. Useful for tests.
    pub async fn in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePool::connect("sqlite::memory:").await.map_err(backend_err)?;
        Self::from_pool(pool).await
    }

    /// Wraps an already-open pool, running migrations against it.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_events (
                id TEXT PRIMARY KEY,
                repo TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS automation_rules (
                id TEXT PRIMARY KEY,
                team TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rule_executions (
                id TEXT PRIMARY KEY,
                rule_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                recipient TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            ) STRICT
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rules_team ON automation_rules(team)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_executions_rule ON rule_executions(rule_id)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient)")
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        Ok(())
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RawEventRepository for SqliteStore {
    async fn insert_event(&self, event: &RawEvent) -> Result<(), StorageError> {
        let data = serde_json::to_string(event).map_err(backend_err)?;
        sqlx::query("INSERT OR REPLACE INTO raw_events (id, repo, data) VALUES (?, ?, ?)")
            .bind(event.id.to_string())
            .bind(&event.repo)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_event(&self, id: Uuid) -> Result<Option<RawEvent>, StorageError> {
        let row = sqlx::query("SELECT data FROM raw_events WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| {
            let data: String = r.get("data");
            serde_json::from_str(&data).map_err(backend_err)
        })
        .transpose()
    }

    async fn mark_event_processed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        let mut event = self
            .get_event(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("raw_event:{id}")))?;
        event.mark_processed(at);
        self.insert_event(&event).await
    }
}

#[async_trait]
impl RuleRepository for SqliteStore {
    async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        let data = serde_json::to_string(rule).map_err(backend_err)?;
        sqlx::query("INSERT OR REPLACE INTO automation_rules (id, team, data) VALUES (?, ?, ?)")
            .bind(rule.id.to_string())
            .bind(&rule.team)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
        let row = sqlx::query("SELECT data FROM automation_rules WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?;
        row.map(|r| {
            let data: String = r.get("data");
            serde_json::from_str(&data).map_err(backend_err)
        })
        .transpose()
    }

    async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError> {
        let rows = sqlx::query("SELECT data FROM automation_rules WHERE team = ?")
            .bind(team)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                serde_json::from_str(&data).map_err(backend_err)
            })
            .collect()
    }

    async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
        if self.get_rule(rule.id).await?.is_none() {
            return Err(StorageError::NotFound(format!("rule:{}", rule.id)));
        }
        self.insert_rule(rule).await
    }
}

#[async_trait]
impl RuleExecutionRepository for SqliteStore {
    async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError> {
        let data = serde_json::to_string(execution).map_err(backend_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO rule_executions (id, rule_id, timestamp, data) VALUES (?, ?, ?, ?)",
        )
        .bind(execution.id.to_string())
        .bind(execution.rule_id.to_string())
        .bind(execution.timestamp.to_rfc3339())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError> {
        let rows = sqlx::query(
            "SELECT data FROM rule_executions WHERE rule_id = ? ORDER BY timestamp DESC",
        )
        .bind(rule_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                serde_json::from_str(&data).map_err(backend_err)
            })
            .collect()
    }
}

#[async_trait]
impl NotificationRepository for SqliteStore {
    async fn insert_notification(&self, notification: &Notification) -> Result<(), StorageError> {
        let data = serde_json::to_string(notification).map_err(backend_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO notifications (id, recipient, created_at, data) VALUES (?, ?, ?, ?)",
        )
        .bind(notification.id.to_string())
        .bind(&notification.recipient)
        .bind(notification.created_at.to_rfc3339())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn list_notifications_for_recipient(&self, recipient: &str) -> Result<Vec<Notification>, StorageError> {
        let rows = sqlx::query(
            "SELECT data FROM notifications WHERE recipient = ? ORDER BY created_at DESC",
        )
        .bind(recipient)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        rows.into_iter()
            .map(|r| {
                let data: String = r.get("data");
                serde_json::from_str(&data).map_err(backend_err)
            })
            .collect()
    }

    async fn mark_notification_read(&self, id: Uuid) -> Result<(), StorageError> {
        let row = sqlx::query("SELECT data FROM notifications WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .ok_or_else(|| StorageError::NotFound(format!("notification:{id}")))?;
        let data: String = row.get("data");
        let mut notification: Notification = serde_json::from_str(&data).map_err(backend_err)?;
        notification.is_read = true;
        self.insert_notification(&notification).await
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
        let store = SqliteStore::in_memory().await.unwrap();
        let event = sample_event();
        store.insert_event(&event).await.unwrap();

        store.mark_event_processed(event.id, Utc::now()).await.unwrap();
        let fetched = store.get_event(event.id).await.unwrap().unwrap();
        assert!(fetched.processed_at.is_some());
    }

    #[tokio::test]
    async fn rule_list_for_team_filters_by_team() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut other_team_rule = sample_rule();
        other_team_rule.team = "globex".into();
        store.insert_rule(&sample_rule()).await.unwrap();
        store.insert_rule(&other_team_rule).await.unwrap();

        let rules = store.list_rules_for_team("acme").await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].team, "acme");
    }

    #[tokio::test]
    async fn rule_update_rejects_unknown_rule() {
        let store = SqliteStore::in_memory().await.unwrap();
        let result = store.update_rule(&sample_rule()).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn rule_execution_history_is_most_recent_first() {
        let store = SqliteStore::in_memory().await.unwrap();
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
            id: Uuid::new_v4(),
            timestamp: first.timestamp + chrono::Duration::seconds(1),
            ..first.clone()
        };
        store.insert_execution(&first).await.unwrap();
        store.insert_execution(&second).await.unwrap();

        let history = store.list_executions_for_rule(rule.id).await.unwrap();
        assert_eq!(history[0].id, second.id);
    }

    #[tokio::test]
    async fn notification_mark_read_persists() {
        let store = SqliteStore::in_memory().await.unwrap();
        let notification = Notification::new("alice", "acme", "change_impact", "t", "b", None, Priority::Normal).unwrap();
        store.insert_notification(&notification).await.unwrap();

        store.mark_notification_read(notification.id).await.unwrap();
        let listed = store.list_notifications_for_recipient("alice").await.unwrap();
        assert!(listed[0].is_read);
    }

    #[tokio::test]
    async fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let store = SqliteStore::open(&path).await.unwrap();
            store.insert_event(&sample_event()).await.unwrap();
            store.close().await;
        }

        let store = SqliteStore::open(&path).await.unwrap();
        sqlx::query("SELECT COUNT(*) FROM raw_events")
            .fetch_one(&store.pool)
            .await
            .unwrap();
    }
}
