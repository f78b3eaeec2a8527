#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-types** – Shared domain primitives for the collaboration backend.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph so
//! that every other crate can depend on it without creating cycles. It makes
//! no assumptions about I/O, storage engines, or transport.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

//─────────────────────────────
//  Security constants
//─────────────────────────────

/// Maximum size, in bytes, of a stream entry payload. Oversized payloads are
/// refused rather than silently truncated.
pub const MAX_STREAM_PAYLOAD_BYTES: usize = 256 * 1024;

/// Maximum length of a notification title.
pub const MAX_NOTIFICATION_TITLE_LEN: usize = 256;

/// Maximum length of a notification body.
pub const MAX_NOTIFICATION_BODY_LEN: usize = 8192;

/// Maximum length of a recipient/user identifier.
pub const MAX_IDENTIFIER_LEN: usize = 256;

//─────────────────────────────
//  Stream identifiers
//─────────────────────────────

/// The three durable streams the pipeline is built around.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamName {
    /// Raw git/webhook activity, appended to by ingress.
    GitEvents,
    /// Outbound notification requests, drained by the notification worker.
    Notifications,
    /// Task lifecycle events, drained by the task monitor.
    TaskEvents,
}

impl StreamName {
    /// Canonical wire name for the stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::GitEvents => "git_events",
            StreamName::Notifications => "notifications",
            StreamName::TaskEvents => "task_events",
        }
    }
}

impl std::fmt::Display for StreamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//─────────────────────────────
//  RawEvent
//─────────────────────────────

/// A webhook delivery persisted verbatim by the ingress before it is handed
/// to the broker. `processed_at` is set at-most-once by the change processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    /// Unique event id, also used as the idempotency key for downstream writes.
    pub id: Uuid,
    /// Originating platform, e.g. "git".
    pub source: String,
    /// Webhook kind, e.g. "push", "pull_request".
    pub kind: String,
    /// Repository full name.
    pub repo: String,
    /// Sender login/identifier.
    pub sender: String,
    /// Opaque JSON payload as delivered by the platform.
    pub payload: Value,
    /// Set once processing completes successfully.
    pub processed_at: Option<DateTime<Utc>>,
}

impl RawEvent {
    /// Construct a new, unprocessed raw event.
    pub fn new(source: impl Into<String>, kind: impl Into<String>, repo: impl Into<String>, sender: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            kind: kind.into(),
            repo: repo.into(),
            sender: sender.into(),
            payload,
            processed_at: None,
        }
    }

    /// Mark the event processed. No-op if already processed (at-most-once).
    pub fn mark_processed(&mut self, at: DateTime<Utc>) {
        if self.processed_at.is_none() {
            self.processed_at = Some(at);
        }
    }
}

//─────────────────────────────
//  StreamEntry
//─────────────────────────────

/// A single entry read back from the broker, carrying its group-scoped
/// message id alongside the self-describing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEntry {
    /// Monotonic (within-stream) message id assigned by the broker.
    pub message_id: String,
    /// Stream the entry belongs to.
    pub stream: StreamName,
    /// Producer-assigned event type, e.g. "push", "change_impact".
    pub event_type: String,
    /// Self-describing JSON payload; domain fields live under `data`.
    pub payload: Value,
    /// Time the producer appended the entry.
    pub producer_timestamp: DateTime<Utc>,
}

impl StreamEntry {
    /// Validate the entry's payload size against [`MAX_STREAM_PAYLOAD_BYTES`].
    pub fn validate_payload_size(payload: &Value) -> Result<(), String> {
        let encoded = serde_json::to_vec(payload).map_err(|e| e.to_string())?;
        if encoded.len() > MAX_STREAM_PAYLOAD_BYTES {
            return Err(format!(
                "payload too large: {} > {} bytes",
                encoded.len(),
                MAX_STREAM_PAYLOAD_BYTES
            ));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Ownership
//─────────────────────────────

/// Per-(repo, file, user) ownership aggregate. Scores are recomputed for all
/// owners of a file whenever that file is touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    /// Repository full name.
    pub repo: String,
    /// File path within the repository.
    pub file: String,
    /// User identifier (commit author / username).
    pub user: String,
    /// Total commits by this user touching this file.
    pub commits: u64,
    /// Total lines added by this user in this file.
    pub lines_added: u64,
    /// Total lines removed by this user in this file.
    pub lines_removed: u64,
    /// Timestamp of the first commit contributing to this record.
    pub first_commit_at: DateTime<Utc>,
    /// Timestamp of the most recent contributing commit.
    pub last_commit_at: DateTime<Utc>,
    /// Derived ownership score in [0, 1].
    pub score: f64,
    /// Recency component of the score, in [0, 1].
    pub recent_score: f64,
}

//─────────────────────────────
//  ImpactVerdict
//─────────────────────────────

/// The kind of change an impact verdict was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// A single commit, typically from a push event.
    Commit,
    /// A merged or opened pull request.
    Pr,
    /// A generic file-change set with no richer context.
    FileChange,
}

/// Severity of a breaking change, as reported by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or non-disruptive.
    Low,
    /// Noticeable but contained.
    Medium,
    /// Likely to break consumers.
    High,
    /// Near-certain to break consumers.
    Critical,
}

/// Notification priority, derived from the impact analysis priority table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Background-level, no urgency.
    Low,
    /// Default priority.
    Normal,
    /// Should be surfaced promptly.
    High,
    /// Demands immediate attention.
    Urgent,
}

/// Ephemeral result of analyzing a change's impact. Never persisted verbatim;
/// the author is guaranteed absent from `affected_users`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImpactVerdict {
    /// Identifier of the change (commit sha, PR number, etc).
    pub change_id: String,
    /// What kind of change this verdict describes.
    pub change_type: ChangeType,
    /// Whether the classifier flagged this as a breaking change.
    pub is_breaking: bool,
    /// Severity reported by the classifier (or derived default).
    pub severity: Severity,
    /// Users whose owned files were touched, mapped to the files they own.
    pub affected_users: HashMap<String, Vec<String>>,
    /// Human-readable summary suitable for a notification body.
    pub summary: String,
    /// Derived notification priority.
    pub priority: Priority,
    /// Whether this verdict should produce notifications.
    pub should_notify: bool,
}

//─────────────────────────────
//  AutomationRule / RuleExecution
//─────────────────────────────

/// Lifecycle status of an automation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    /// Eligible to match incoming triggers.
    Active,
    /// Temporarily disabled; never matches.
    Paused,
    /// One-time rule that has already fired successfully.
    Completed,
    /// Rule's most recent execution failed terminally.
    Failed,
}

/// A stored automation rule: trigger conditions paired with an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    /// Unique rule id.
    pub id: Uuid,
    /// Owning team.
    pub team: String,
    /// Trigger type this rule listens for, e.g. "task_completed".
    pub trigger_type: String,
    /// Condition map evaluated against trigger data.
    pub trigger_conditions: HashMap<String, Value>,
    /// Action to dispatch on match, e.g. "notify_user".
    pub action_type: String,
    /// Parameters passed to the action executor.
    pub action_params: HashMap<String, Value>,
    /// Current lifecycle status.
    pub status: RuleStatus,
    /// Whether the rule deactivates itself after one successful execution.
    pub is_one_time: bool,
    /// Number of times this rule has been executed (success or failure).
    pub execution_count: u64,
}

impl AutomationRule {
    /// Whether this rule is currently eligible to be matched against triggers.
    pub fn is_matchable(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

/// Outcome of dispatching a matched rule's action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// The action executor reported success.
    Success,
    /// The action executor reported failure, or the action type was unknown.
    Failed,
}

/// An append-only record of one rule-match attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleExecution {
    /// Unique execution id.
    pub id: Uuid,
    /// Rule this execution belongs to.
    pub rule_id: Uuid,
    /// Snapshot of the trigger data that caused the match.
    pub trigger_snapshot: Value,
    /// Outcome of the dispatched action.
    pub status: ExecutionStatus,
    /// Actions actually performed, for audit purposes.
    pub actions_performed: Vec<Value>,
    /// Error message, present only when `status` is `Failed`.
    pub error: Option<String>,
    /// When the execution was recorded.
    pub timestamp: DateTime<Utc>,
}

//─────────────────────────────
//  Notification
//─────────────────────────────

/// A persisted, write-once notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique notification id.
    pub id: Uuid,
    /// Recipient identifier, stable across delivery channels.
    pub recipient: String,
    /// Owning team.
    pub team: String,
    /// Notification kind, e.g. "change_impact", "breaking_change".
    pub kind: String,
    /// Short title.
    pub title: String,
    /// Rendered body.
    pub body: String,
    /// Optional link back to the originating change.
    pub source_ref: Option<String>,
    /// Delivery priority.
    pub priority: Priority,
    /// Read state; transitions false -> true only.
    pub is_read: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Channels the notification was actually delivered on.
    pub delivered_channels: Vec<String>,
}

impl Notification {
    /// Construct a notification pending delivery, validating field lengths.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        recipient: impl Into<String>,
        team: impl Into<String>,
        kind: impl Into<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        source_ref: Option<String>,
        priority: Priority,
    ) -> Result<Self, String> {
        let recipient = recipient.into();
        let title = title.into();
        let body = body.into();

        if recipient.is_empty() || recipient.len() > MAX_IDENTIFIER_LEN {
            return Err(format!("recipient identifier invalid length: {}", recipient.len()));
        }
        if title.len() > MAX_NOTIFICATION_TITLE_LEN {
            return Err(format!("title too long: {} > {}", title.len(), MAX_NOTIFICATION_TITLE_LEN));
        }
        if body.len() > MAX_NOTIFICATION_BODY_LEN {
            return Err(format!("body too long: {} > {}", body.len(), MAX_NOTIFICATION_BODY_LEN));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            recipient,
            team: team.into(),
            kind: kind.into(),
            title,
            body,
            source_ref,
            priority,
            is_read: false,
            created_at: Utc::now(),
            delivered_channels: Vec::new(),
        })
    }
}

//─────────────────────────────
//  RateWindow
//─────────────────────────────

/// A sliding-window rate-limit counter for a single recipient.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Count of events observed so far in the current window.
    pub counter: u32,
    /// When the window (and thus the counter) expires.
    pub expires_at: DateTime<Utc>,
}

//─────────────────────────────
//  Task
//─────────────────────────────

/// Lifecycle state of a task tracked by the task monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not yet started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Finished.
    Completed,
}

/// A unit of work, either created directly or extracted from an issue/PR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Owning team.
    pub team: String,
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: Option<String>,
    /// Current assignee, if any.
    pub assigned_to: Option<String>,
    /// Who created the task (or who the extraction attributed it to).
    pub created_by: String,
    /// Current status.
    pub status: TaskStatus,
    /// Priority.
    pub priority: Priority,
    /// Where this task came from, e.g. "issue", "pull_request", "manual".
    pub source: String,
    /// Stable identifier within `source` (issue number, PR number, ...),
    /// used to dedupe extraction on stream replay.
    pub source_id: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when `status` transitions to `Completed`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Construct a pending task with no assignee.
    pub fn new(team: impl Into<String>, title: impl Into<String>, created_by: impl Into<String>, priority: Priority, source: impl Into<String>, source_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            team: team.into(),
            title: title.into(),
            description: None,
            assigned_to: None,
            created_by: created_by.into(),
            status: TaskStatus::Pending,
            priority,
            source: source.into(),
            source_id,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_event_marks_processed_once() {
        let mut event = RawEvent::new("git", "push", "acme/widgets", "alice", Value::Null);
        assert!(event.processed_at.is_none());

        let first = Utc::now();
        event.mark_processed(first);
        assert_eq!(event.processed_at, Some(first));

        let second = first + chrono::Duration::seconds(5);
        event.mark_processed(second);
        assert_eq!(event.processed_at, Some(first), "processed_at must be set at-most-once");
    }

    #[test]
    fn stream_entry_rejects_oversized_payload() {
        let huge = Value::String("x".repeat(MAX_STREAM_PAYLOAD_BYTES + 1));
        assert!(StreamEntry::validate_payload_size(&huge).is_err());

        let small = Value::String("ok".into());
        assert!(StreamEntry::validate_payload_size(&small).is_ok());
    }

    #[test]
    fn stream_name_wire_format() {
        assert_eq!(StreamName::GitEvents.as_str(), "git_events");
        assert_eq!(StreamName::Notifications.as_str(), "notifications");
        assert_eq!(StreamName::TaskEvents.as_str(), "task_events");
    }

    #[test]
    fn notification_rejects_title_too_long() {
        let long_title = "x".repeat(MAX_NOTIFICATION_TITLE_LEN + 1);
        let result = Notification::new("alice", "acme", "change_impact", long_title, "body", None, Priority::Normal);
        assert!(result.is_err());
    }

    #[test]
    fn automation_rule_matchable_only_when_active() {
        let mut rule = AutomationRule {
            id: Uuid::new_v4(),
            team: "acme".into(),
            trigger_type: "task_completed".into(),
            trigger_conditions: HashMap::new(),
            action_type: "notify_user".into(),
            action_params: HashMap::new(),
            status: RuleStatus::Active,
            is_one_time: false,
            execution_count: 0,
        };
        assert!(rule.is_matchable());
        rule.status = RuleStatus::Paused;
        assert!(!rule.is_matchable());
    }
}
