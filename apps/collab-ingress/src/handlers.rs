//! [`MessageHandler`] implementations draining each of the three streams,
//! and the [`ActionExecutor`] the rule engine dispatches through.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use collab_broker_core::StreamBroker;
use collab_classifier::classifier::classify;
use collab_classifier::LlmGateway;
use collab_impact::{ChangeInput, ImpactAnalyzer};
use collab_notify::{ChannelMessage, ChannelSender, NotificationChannel, NotificationFanout, NotificationRequest, NotifyError, RecipientPreferences};
use collab_ownership::{CommitEvent, OwnershipEngine};
use collab_rules::{ActionExecutor, ActionOutcome, RuleEngine, TriggerContext};
use collab_store_core::{NotificationRepository, OwnershipRepository, RateLimitRepository, RuleExecutionRepository, RuleRepository, TaskRepository};
use collab_types::{ChangeType, Priority, StreamEntry, StreamName, Task, TaskStatus};
use collab_workers::{HandlerOutcome, MessageHandler};
use serde_json::{json, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::knowledge::KnowledgeWriter;

/// GitHub's push webhook payload carries no line-change stats; fall back to
/// crediting one line per touched file when a `stats` object isn't present
/// (it can be, when the ingress is fed by an enrichment step ahead of the
/// webhook relay).
const DEFAULT_LINES_PER_FILE: u64 = 1;

fn as_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn repo_full_name(data: &Value) -> String {
    data.get("repository").and_then(|r| as_str(r, "full_name")).unwrap_or("unknown").to_string()
}

fn sender_login(data: &Value) -> String {
    data.get("sender").and_then(|s| as_str(s, "login")).unwrap_or("unknown").to_string()
}

fn priority_from_str(value: Option<&str>) -> Priority {
    match value.unwrap_or("normal").to_lowercase().as_str() {
        "low" => Priority::Low,
        "high" => Priority::High,
        "urgent" | "critical" => Priority::Urgent,
        _ => Priority::Normal,
    }
}

/// Drains `git_events`, dispatching on the webhook kind the ingress recorded
/// as the entry's `event_type`.
pub struct ChangeProcessorHandler<R, B>
where
    R: OwnershipRepository + Clone + Send + Sync + 'static,
    B: StreamBroker,
{
    broker: Arc<B>,
    gateway: Arc<LlmGateway>,
    impact: ImpactAnalyzer<R>,
    ownership: OwnershipEngine<R>,
    knowledge: Arc<KnowledgeWriter>,
}

impl<R, B> ChangeProcessorHandler<R, B>
where
    R: OwnershipRepository + Clone + Send + Sync + 'static,
    B: StreamBroker,
{
    /// Build a change processor over a shared gateway, broker, and store.
    pub fn new(store: R, broker: Arc<B>, gateway: Arc<LlmGateway>, knowledge: Arc<KnowledgeWriter>) -> Self {
        let impact = ImpactAnalyzer::new(gateway.clone(), OwnershipEngine::new(store.clone()));
        let ownership = OwnershipEngine::new(store);
        Self { broker, gateway, impact, ownership, knowledge }
    }

    async fn append_notification(&self, recipient: &str, team: &str, kind: &str, title: &str, body: &str, priority: Priority, source_ref: Option<String>) {
        let payload = json!({
            "recipient_id": recipient,
            "team_id": team,
            "title": title,
            "message": body,
            "source_url": source_ref,
            "priority": format!("{:?}", priority).to_lowercase(),
        });
        if let Err(err) = self.broker.append(StreamName::Notifications, kind, payload).await {
            error!(recipient, kind, error = %err, "failed to append notification");
        }
    }

    async fn append_task_event(&self, event_type: &str, payload: Value) {
        if let Err(err) = self.broker.append(StreamName::TaskEvents, event_type, payload).await {
            error!(event_type, error = %err, "failed to append task event");
        }
    }

    async fn handle_push(&self, repo: &str, data: &Value) -> anyhow::Result<()> {
        let pusher = data.get("pusher").and_then(|p| as_str(p, "name")).unwrap_or(&sender_login(data)).to_string();
        let commits = data.get("commits").and_then(Value::as_array).cloned().unwrap_or_default();

        let mut touched_files: Vec<String> = Vec::new();
        let mut messages: Vec<String> = Vec::new();

        for commit in &commits {
            let message = as_str(commit, "message").unwrap_or("").to_string();
            let author = commit
                .get("author")
                .and_then(|a| as_str(a, "username").or_else(|| as_str(a, "name")))
                .unwrap_or(&pusher)
                .to_string();
            let commit_id = as_str(commit, "id").unwrap_or_default().to_string();

            let mut files: Vec<String> = Vec::new();
            for key in ["added", "modified", "removed"] {
                if let Some(list) = commit.get(key).and_then(Value::as_array) {
                    files.extend(list.iter().filter_map(|v| v.as_str().map(str::to_string)));
                }
            }
            files.sort();
            files.dedup();

            let _ = classify(&self.gateway, &message, "commit").await;
            self.knowledge.index("commit", &commit_id, &message);

            if !files.is_empty() {
                let (lines_added, lines_removed) = commit
                    .get("stats")
                    .map(|stats| {
                        (
                            stats.get("additions").and_then(Value::as_u64).unwrap_or(files.len() as u64 * DEFAULT_LINES_PER_FILE),
                            stats.get("deletions").and_then(Value::as_u64).unwrap_or(0),
                        )
                    })
                    .unwrap_or((files.len() as u64 * DEFAULT_LINES_PER_FILE, 0));

                if let Err(err) = self
                    .ownership
                    .record_commit(&CommitEvent { repo: repo.to_string(), author, files: files.clone(), lines_added, lines_removed, timestamp: Utc::now() })
                    .await
                {
                    warn!(commit_id, error = %err, "ownership update failed for commit");
                }
            }

            touched_files.extend(files);
            messages.push(message);
        }

        touched_files.sort();
        touched_files.dedup();

        if touched_files.is_empty() {
            return Ok(());
        }

        let change_id = commits.last().and_then(|c| as_str(c, "id")).unwrap_or("push").to_string();
        let verdict = self
            .impact
            .analyze(&ChangeInput {
                change_id,
                change_type: ChangeType::Commit,
                repo: repo.to_string(),
                author: pusher.clone(),
                content: messages.join("\n"),
                files: touched_files,
                action: None,
            })
            .await;

        if verdict.should_notify {
            for user in verdict.affected_users.keys() {
                if user == &pusher {
                    continue;
                }
                self.append_notification(user, repo, "change_impact", "Change impact", &verdict.summary, verdict.priority, Some(repo.to_string())).await;
            }
        }

        Ok(())
    }

    async fn handle_pull_request(&self, repo: &str, data: &Value) -> anyhow::Result<()> {
        let action = as_str(data, "action").unwrap_or("");
        let pr = data.get("pull_request").cloned().unwrap_or(Value::Null);
        let number = pr.get("number").and_then(Value::as_u64).map(|n| n.to_string()).unwrap_or_default();
        let author = pr.get("user").and_then(|u| as_str(u, "login")).unwrap_or(&sender_login(data)).to_string();
        let body = as_str(&pr, "body").unwrap_or("").to_string();
        let title = as_str(&pr, "title").unwrap_or("").to_string();
        let merged = pr.get("merged").and_then(Value::as_bool).unwrap_or(false);

        if matches!(action, "opened" | "edited") {
            self.knowledge.index("pull_request", &number, &format!("{title}\n{body}"));
        }

        if action == "closed" && merged {
            let files: Vec<String> = pr
                .get("changed_files")
                .and_then(Value::as_array)
                .map(|files| files.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default();

            let verdict = self
                .impact
                .analyze(&ChangeInput {
                    change_id: number.clone(),
                    change_type: ChangeType::Pr,
                    repo: repo.to_string(),
                    author: author.clone(),
                    content: format!("{title}\n{body}"),
                    files,
                    action: Some("merged".to_string()),
                })
                .await;

            if verdict.should_notify {
                for user in verdict.affected_users.keys() {
                    if user == &author {
                        continue;
                    }
                    self.append_notification(user, repo, "change_impact", "Pull request merged", &verdict.summary, verdict.priority, Some(repo.to_string())).await;
                }
            }

            self.knowledge.record_decision("pull_request", &number, &body).await;
        }

        self.append_task_event("pr_activity", json!({"team_id": repo, "task_id": Value::Null, "title": title, "pr_number": number, "action": action})).await;

        Ok(())
    }

    async fn handle_issues(&self, repo: &str, data: &Value) -> anyhow::Result<()> {
        let action = as_str(data, "action").unwrap_or("");
        if !matches!(action, "opened" | "edited") {
            return Ok(());
        }
        let issue = data.get("issue").cloned().unwrap_or(Value::Null);
        let number = issue.get("number").and_then(Value::as_u64).map(|n| n.to_string()).unwrap_or_default();
        let title = as_str(&issue, "title").unwrap_or("").to_string();
        let body = as_str(&issue, "body").unwrap_or("").to_string();
        let reporter = issue.get("user").and_then(|u| as_str(u, "login")).unwrap_or(&sender_login(data)).to_string();
        let content = format!("{title}\n{body}");

        let _ = classify(&self.gateway, &content, "issue").await;
        let action_items = self.knowledge.extract_tasks("issue", &number, &content).await;

        for item in action_items {
            self.append_task_event(
                "task_extracted",
                json!({
                    "team_id": repo,
                    "title": item.title,
                    "description": item.description,
                    "assigned_to": item.assigned_to,
                    "priority": item.priority,
                    "created_by": reporter,
                    "source": "issue",
                    "source_id": number,
                }),
            )
            .await;
        }

        self.knowledge.index("issue", &number, &content);
        Ok(())
    }

    async fn handle_issue_comment(&self, _repo: &str, data: &Value) -> anyhow::Result<()> {
        if as_str(data, "action") != Some("created") {
            return Ok(());
        }
        let comment = data.get("comment").cloned().unwrap_or(Value::Null);
        let comment_id = comment.get("id").and_then(Value::as_u64).map(|n| n.to_string()).unwrap_or_default();
        let body = as_str(&comment, "body").unwrap_or("").to_string();

        let verdict = classify(&self.gateway, &body, "issue_comment").await;
        if verdict.category == "decision" {
            self.knowledge.record_decision("issue_comment", &comment_id, &body).await;
        }
        if verdict.importance_score > 0.5 {
            self.knowledge.index("issue_comment", &comment_id, &body);
        }
        Ok(())
    }

    async fn handle_pull_request_review(&self, repo: &str, data: &Value) -> anyhow::Result<()> {
        if as_str(data, "action") != Some("submitted") {
            return Ok(());
        }
        let review = data.get("review").cloned().unwrap_or(Value::Null);
        let reviewer = review.get("user").and_then(|u| as_str(u, "login")).unwrap_or(&sender_login(data)).to_string();
        let pr = data.get("pull_request").cloned().unwrap_or(Value::Null);
        let number = pr.get("number").and_then(Value::as_u64).map(|n| n.to_string()).unwrap_or_default();
        let author = pr.get("user").and_then(|u| as_str(u, "login")).unwrap_or("unknown").to_string();

        self.append_task_event("pr_activity", json!({"team_id": repo, "pr_number": number, "action": "reviewed"})).await;

        if reviewer != author {
            self.append_notification(&author, repo, "pr_reviewed", "Pull request reviewed", &format!("{reviewer} reviewed PR #{number}"), Priority::Normal, Some(repo.to_string()))
                .await;
        }
        Ok(())
    }
}

#[async_trait]
impl<R, B> MessageHandler for ChangeProcessorHandler<R, B>
where
    R: OwnershipRepository + Clone + Send + Sync + 'static,
    B: StreamBroker,
{
    async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome {
        let data = entry.payload.get("data").cloned().unwrap_or(Value::Null);
        let repo = repo_full_name(&data);

        let result = match entry.event_type.as_str() {
            "push" => self.handle_push(&repo, &data).await,
            "pull_request" => self.handle_pull_request(&repo, &data).await,
            "issues" => self.handle_issues(&repo, &data).await,
            "issue_comment" => self.handle_issue_comment(&repo, &data).await,
            "pull_request_review" => self.handle_pull_request_review(&repo, &data).await,
            other => {
                warn!(event_type = other, "change processor: no handler for webhook kind, acking");
                Ok(())
            }
        };

        match result {
            Ok(()) => HandlerOutcome::Processed,
            Err(err) => {
                // Every internal call this handler propagates is a storage or
                // broker operation; none of its field reads bail on malformed
                // payloads, so any error here is transient I/O.
                error!(message_id = %entry.message_id, event_type = %entry.event_type, error = %err, "change processor handler failed, will retry");
                HandlerOutcome::Retry
            }
        }
    }
}

/// Drains `notifications`, fanning each entry out through a
/// [`NotificationFanout`].
pub struct NotificationHandler<R, P, S>
where
    R: RateLimitRepository + NotificationRepository + Clone,
    P: RecipientPreferences,
    S: ChannelSender,
{
    fanout: NotificationFanout<R, P, S>,
}

impl<R, P, S> NotificationHandler<R, P, S>
where
    R: RateLimitRepository + NotificationRepository + Clone,
    P: RecipientPreferences,
    S: ChannelSender,
{
    /// Wrap a fanout worker as a stream handler.
    pub fn new(fanout: NotificationFanout<R, P, S>) -> Self {
        Self { fanout }
    }
}

#[async_trait]
impl<R, P, S> MessageHandler for NotificationHandler<R, P, S>
where
    R: RateLimitRepository + NotificationRepository + Clone + Send + Sync + 'static,
    P: RecipientPreferences + Send + Sync + 'static,
    S: ChannelSender + Send + Sync + 'static,
{
    async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome {
        let payload = &entry.payload;
        let recipient = as_str(payload, "recipient_id").unwrap_or_default().to_string();
        if recipient.is_empty() {
            warn!(message_id = %entry.message_id, "notification entry missing recipient_id, acking");
            return HandlerOutcome::Processed;
        }

        let request = NotificationRequest {
            recipient,
            team: as_str(payload, "team_id").unwrap_or("unknown").to_string(),
            kind: entry.event_type.clone(),
            title: as_str(payload, "title").unwrap_or("Notification").to_string(),
            body: as_str(payload, "message").unwrap_or("").to_string(),
            source_ref: as_str(payload, "source_url").map(str::to_string),
            priority: priority_from_str(as_str(payload, "priority")),
        };

        match self.fanout.fan_out(request).await {
            Ok(_) => HandlerOutcome::Processed,
            Err(err @ NotifyError::Invalid(_)) => {
                warn!(message_id = %entry.message_id, error = %err, "notification rejected, will not become valid on retry");
                HandlerOutcome::Rejected
            }
            Err(err) => {
                error!(message_id = %entry.message_id, error = %err, "notification fan-out failed transiently, will retry");
                HandlerOutcome::Retry
            }
        }
    }
}

/// Drains `task_events`, running automation triggers and cross-assignment
/// notifications.
pub struct TaskMonitorHandler<R, E>
where
    R: TaskRepository + RuleRepository + RuleExecutionRepository + Clone + Send + Sync + 'static,
    E: ActionExecutor,
{
    store: R,
    rules: RuleEngine<R, E>,
    broker: Arc<dyn StreamBroker>,
}

impl<R, E> TaskMonitorHandler<R, E>
where
    R: TaskRepository + RuleRepository + RuleExecutionRepository + Clone + Send + Sync + 'static,
    E: ActionExecutor,
{
    /// Build a task monitor over a combined store, a rule engine, and the
    /// broker it appends follow-up notifications to.
    pub fn new(store: R, rules: RuleEngine<R, E>, broker: Arc<dyn StreamBroker>) -> Self {
        Self { store, rules, broker }
    }

    async fn append_notification(&self, recipient: &str, team: &str, kind: &str, title: &str, body: &str) {
        let payload = json!({"recipient_id": recipient, "team_id": team, "title": title, "message": body});
        if let Err(err) = self.broker.append(StreamName::Notifications, kind, payload).await {
            error!(recipient, kind, error = %err, "failed to append notification");
        }
    }

    async fn fire_trigger(&self, team: &str, trigger_type: &str, trigger_data: HashMap<String, Value>, trigger_user: &str) -> anyhow::Result<()> {
        let rules = self.rules.get_rules_for_trigger(team, trigger_type, &trigger_data).await?;
        for rule in rules {
            self.rules.evaluate(&rule, trigger_data.clone(), trigger_user).await?;
        }
        Ok(())
    }

    async fn handle_task_created(&self, team: &str, data: &Value) -> anyhow::Result<()> {
        let assignee = as_str(data, "assigned_to");
        let creator = as_str(data, "created_by").unwrap_or("");
        if let Some(assignee) = assignee {
            if assignee != creator {
                self.append_notification(assignee, team, "task_assigned", "Task assigned", &format!("You were assigned a task by {creator}")).await;
            }
        }
        Ok(())
    }

    async fn handle_task_completed(&self, team: &str, data: &Value) -> anyhow::Result<()> {
        let completer = as_str(data, "completed_by").or_else(|| as_str(data, "user")).unwrap_or("unknown").to_string();
        let trigger_data = as_object_map(data);
        self.fire_trigger(team, "task_completed", trigger_data, &completer).await?;

        let remaining = self.store.count_open_tasks_for_user(team, &completer).await?;
        if remaining == 0 {
            let mut trigger_data = HashMap::new();
            trigger_data.insert("user".to_string(), json!(completer));
            trigger_data.insert("team_id".to_string(), json!(team));
            self.fire_trigger(team, "all_tasks_completed", trigger_data, &completer).await?;
        }
        Ok(())
    }

    async fn handle_task_extracted(&self, team: &str, data: &Value) -> anyhow::Result<()> {
        let source = as_str(data, "source").unwrap_or("unknown").to_string();
        let source_id = as_str(data, "source_id").unwrap_or_default().to_string();

        if self.store.find_by_source(&source, &source_id).await?.is_some() {
            return Ok(());
        }

        let title = as_str(data, "title").unwrap_or("Untitled task").to_string();
        let created_by = as_str(data, "created_by").unwrap_or("unknown").to_string();
        let assignee = as_str(data, "assigned_to").map(str::to_string);

        let mut task = Task::new(team, title, created_by, Priority::Normal, source.clone(), Some(source_id.clone()));
        task.status = TaskStatus::Pending;
        task.description = as_str(data, "description").map(str::to_string);
        task.assigned_to = assignee.clone();
        self.store.insert_task(&task).await?;

        if let Some(assignee) = assignee {
            self.append_notification(&assignee, team, "task_assigned", "Task extracted", &format!("Extracted from {source} #{source_id}: {}", task.title)).await;
        }
        Ok(())
    }

    async fn handle_task_updated(&self, team: &str, data: &Value) -> anyhow::Result<()> {
        let new_assignee = as_str(data, "assigned_to");
        let previous_assignee = as_str(data, "previous_assigned_to");
        let updater = as_str(data, "updated_by").unwrap_or("unknown");

        if let Some(new_assignee) = new_assignee {
            if previous_assignee != Some(new_assignee) && new_assignee != updater {
                self.append_notification(new_assignee, team, "task_assigned", "Task reassigned", &format!("{updater} assigned you a task")).await;
            }
        }
        Ok(())
    }
}

fn as_object_map(value: &Value) -> HashMap<String, Value> {
    value.as_object().map(|map| map.clone().into_iter().collect()).unwrap_or_default()
}

#[async_trait]
impl<R, E> MessageHandler for TaskMonitorHandler<R, E>
where
    R: TaskRepository + RuleRepository + RuleExecutionRepository + Clone + Send + Sync + 'static,
    E: ActionExecutor,
{
    async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome {
        let team = as_str(&entry.payload, "team_id").unwrap_or("unknown").to_string();
        let data = entry.payload.clone();

        let result = match entry.event_type.as_str() {
            "task_created" => self.handle_task_created(&team, &data).await,
            "task_completed" => self.handle_task_completed(&team, &data).await,
            "task_extracted" => self.handle_task_extracted(&team, &data).await,
            "task_updated" => self.handle_task_updated(&team, &data).await,
            other => {
                warn!(event_type = other, "task monitor: no handler for event type, acking");
                Ok(())
            }
        };

        match result {
            Ok(()) => HandlerOutcome::Processed,
            Err(err) => {
                // RuleError only ever wraps a StorageError: every path through
                // the task/rule/execution repositories is transient I/O.
                error!(message_id = %entry.message_id, event_type = %entry.event_type, error = %err, "task monitor handler failed, will retry");
                HandlerOutcome::Retry
            }
        }
    }
}

/// Dispatches automation rule actions by appending to `notifications` /
/// `task_events`, or — for `send_message` — posting directly rather than
/// through the rate-limited notification path.
///
/// `send_message` never touches the `notifications` stream, so it is never
/// subject to [`collab_ratelimit::NotificationRateLimiter`]; this resolves
/// the ambiguity over whether direct chat posts should be rate limited by
/// construction rather than by configuration.
pub struct StreamActionExecutor<B, R>
where
    B: StreamBroker,
    R: TaskRepository,
{
    broker: Arc<B>,
    store: R,
}

impl<B, R> StreamActionExecutor<B, R>
where
    B: StreamBroker,
    R: TaskRepository,
{
    /// Build an executor over the broker it appends to and the store it
    /// persists tasks in.
    pub fn new(broker: Arc<B>, store: R) -> Self {
        Self { broker, store }
    }

    async fn append_notification(&self, recipient: &str, kind: &str, message: &str, priority: Option<&Value>) -> Result<(), String> {
        let payload = json!({"recipient_id": recipient, "title": "Automation", "message": message, "priority": priority});
        self.broker.append(StreamName::Notifications, kind, payload).await.map(|_| ()).map_err(|e| e.to_string())
    }
}

fn param_str<'a>(params: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

#[async_trait]
impl<B, R> ActionExecutor for StreamActionExecutor<B, R>
where
    B: StreamBroker,
    R: TaskRepository + Send + Sync,
{
    async fn execute(&self, action_type: &str, params: &HashMap<String, Value>, context: &TriggerContext) -> ActionOutcome {
        match action_type {
            "notify_user" => {
                let Some(user) = param_str(params, "user") else {
                    return ActionOutcome::failure("notify_user requires 'user'");
                };
                let message = param_str(params, "message").unwrap_or("Automation triggered");
                match self.append_notification(user, "automation_triggered", message, params.get("priority")).await {
                    Ok(()) => ActionOutcome::success(json!({"notified": user})),
                    Err(err) => ActionOutcome::failure(err),
                }
            }
            "create_task" => {
                let Some(title) = param_str(params, "title") else {
                    return ActionOutcome::failure("create_task requires 'title'");
                };
                let assignee = param_str(params, "assignee").map(str::to_string);
                let mut task = Task::new(
                    context.trigger_data.get("team_id").and_then(Value::as_str).unwrap_or("unknown"),
                    title,
                    context.trigger_user.clone(),
                    priority_from_str(param_str(params, "priority")),
                    "rule",
                    Some(context.rule_id.to_string()),
                );
                task.description = param_str(params, "description").map(str::to_string);
                task.assigned_to = assignee.clone();

                if let Err(err) = self.store.insert_task(&task).await {
                    return ActionOutcome::failure(err.to_string());
                }
                if let Some(assignee) = assignee {
                    if let Err(err) = self.append_notification(&assignee, "task_assigned", &format!("New task: {title}"), None).await {
                        warn!(error = %err, "create_task: follow-up notification failed");
                    }
                }
                ActionOutcome::success(json!({"task_id": task.id}))
            }
            "assign_task" => {
                let (Some(task_id), Some(assignee)) = (param_str(params, "task_id"), param_str(params, "assignee")) else {
                    return ActionOutcome::failure("assign_task requires 'task_id' and 'assignee'");
                };
                let Ok(task_id) = Uuid::parse_str(task_id) else {
                    return ActionOutcome::failure("assign_task: 'task_id' is not a valid id");
                };
                let Ok(Some(mut task)) = self.store.get_task(task_id).await else {
                    return ActionOutcome::failure("assign_task: task not found");
                };
                task.assigned_to = Some(assignee.to_string());
                if let Err(err) = self.store.update_task(&task).await {
                    return ActionOutcome::failure(err.to_string());
                }
                if let Err(err) = self.append_notification(assignee, "task_assigned", &format!("Assigned task: {}", task.title), None).await {
                    warn!(error = %err, "assign_task: follow-up notification failed");
                }
                ActionOutcome::success(json!({"task_id": task.id, "assignee": assignee}))
            }
            "send_message" => {
                let Some(channel) = param_str(params, "channel") else {
                    return ActionOutcome::failure("send_message requires 'channel'");
                };
                let message = param_str(params, "message").unwrap_or("");
                tracing::info!(channel, message, "simulated chat post (no chat client configured)");
                ActionOutcome::success(json!({"channel": channel}))
            }
            "update_task" => {
                let (Some(task_id), Some(status)) = (param_str(params, "task_id"), param_str(params, "status")) else {
                    return ActionOutcome::failure("update_task requires 'task_id' and 'status'");
                };
                let Ok(task_id) = Uuid::parse_str(task_id) else {
                    return ActionOutcome::failure("update_task: 'task_id' is not a valid id");
                };
                let Ok(Some(mut task)) = self.store.get_task(task_id).await else {
                    return ActionOutcome::failure("update_task: task not found");
                };
                task.status = match status {
                    "pending" => TaskStatus::Pending,
                    "in_progress" => TaskStatus::InProgress,
                    "completed" => {
                        task.completed_at = Some(Utc::now());
                        TaskStatus::Completed
                    }
                    other => return ActionOutcome::failure(format!("update_task: unknown status '{other}'")),
                };
                match self.store.update_task(&task).await {
                    Ok(()) => ActionOutcome::success(json!({"task_id": task.id, "status": status})),
                    Err(err) => ActionOutcome::failure(err.to_string()),
                }
            }
            other => ActionOutcome::failure(format!("unhandled action type: {other}")),
        }
    }
}

/// Preference resolver and channel sender used when no chat integration is
/// configured: every recipient receives chat-channel notifications, and
/// delivery is a structured log line rather than a real network call.
pub struct LoggingChannelSender;

#[async_trait]
impl ChannelSender for LoggingChannelSender {
    async fn send(&self, recipient: &str, channel: NotificationChannel, message: &ChannelMessage) -> Result<(), String> {
        tracing::info!(recipient, ?channel, header = %message.header, "notification delivered");
        Ok(())
    }
}
