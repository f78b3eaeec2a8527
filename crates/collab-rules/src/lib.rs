#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-rules** – per-team automation rule engine.
//!
//! Matches incoming triggers (a merged PR, a completed task, ...) against a
//! team's stored [`AutomationRule`]s, dispatches the matched action through a
//! caller-supplied [`ActionExecutor`], and records the outcome. Rule
//! matching, pronoun resolution, and execution bookkeeping live here; the
//! actions themselves (sending a chat message, touching an external task
//! tracker) are delegated to whatever implements [`ActionExecutor`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use collab_store_core::{RuleExecutionRepository, RuleRepository, StorageError};
use collab_types::{AutomationRule, ExecutionStatus, RuleExecution, RuleStatus};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Action types the engine knows how to dispatch. Any other `action_type`
/// fails fast with [`UNKNOWN_ACTION_ERROR`] before an executor is ever invoked.
pub const KNOWN_ACTION_TYPES: &[&str] = &["notify_user", "create_task", "assign_task", "send_message", "update_task"];

/// Error message recorded when a rule's `action_type` is not recognized.
pub const UNKNOWN_ACTION_ERROR: &str = "unknown action";

/// Pronoun tokens resolved to the trigger's acting user in action parameters.
const PRONOUNS: &[&str] = &["him", "her", "them", "they"];

/// Errors raised while matching or evaluating rules.
#[derive(Error, Debug)]
pub enum RuleError {
    /// The underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),
}

/// Context passed to the [`ActionExecutor`] for a single rule match.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    /// The rule that matched.
    pub rule_id: Uuid,
    /// Trigger type that caused the match, e.g. `"task_completed"`.
    pub trigger_type: String,
    /// Raw trigger payload that was matched against the rule's conditions.
    pub trigger_data: HashMap<String, Value>,
    /// The user whose action caused this trigger; pronoun placeholders in
    /// action parameters resolve to this value.
    pub trigger_user: String,
}

/// Result of dispatching one action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    /// Whether the action succeeded.
    pub success: bool,
    /// Error message, present only when `success` is false.
    pub error: Option<String>,
    /// Arbitrary detail about what was performed, recorded on the execution.
    pub detail: Value,
}

impl ActionOutcome {
    /// Construct a successful outcome with the given detail payload.
    pub fn success(detail: Value) -> Self {
        Self { success: true, error: None, detail }
    }

    /// Construct a failed outcome with the given error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self { success: false, error: Some(error.into()), detail: Value::Null }
    }
}

/// Performs the side effect named by a rule's `action_type`. Implementations
/// are only ever called with one of [`KNOWN_ACTION_TYPES`]; the engine
/// handles unknown types itself.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Execute `action_type` with `params`, resolved against `context`.
    async fn execute(&self, action_type: &str, params: &HashMap<String, Value>, context: &TriggerContext) -> ActionOutcome;
}

/// Matches triggers against stored rules and dispatches their actions.
pub struct RuleEngine<R, E>
where
    R: RuleRepository + RuleExecutionRepository,
    E: ActionExecutor,
{
    store: R,
    executor: E,
}

impl<R, E> RuleEngine<R, E>
where
    R: RuleRepository + RuleExecutionRepository,
    E: ActionExecutor,
{
    /// Build an engine over a combined rule/execution store and an action executor.
    pub fn new(store: R, executor: E) -> Self {
        Self { store, executor }
    }

    /// List the rules belonging to `team` that are active and whose trigger
    /// conditions match `trigger_data` for `trigger_type`.
    pub async fn get_rules_for_trigger(
        &self,
        team: &str,
        trigger_type: &str,
        trigger_data: &HashMap<String, Value>,
    ) -> Result<Vec<AutomationRule>, RuleError> {
        let rules = self.store.list_rules_for_team(team).await?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.is_matchable() && rule.trigger_type == trigger_type && conditions_match(&rule.trigger_conditions, trigger_data))
            .collect())
    }

    /// Evaluate a single matched rule: dispatch its action, record the
    /// execution, and mark one-time rules completed on success.
    pub async fn evaluate(
        &self,
        rule: &AutomationRule,
        trigger_data: HashMap<String, Value>,
        trigger_user: impl Into<String>,
    ) -> Result<RuleExecution, RuleError> {
        let context = TriggerContext {
            rule_id: rule.id,
            trigger_type: rule.trigger_type.clone(),
            trigger_data: trigger_data.clone(),
            trigger_user: trigger_user.into(),
        };

        let outcome = self.dispatch(rule, &context).await;
        let status = if outcome.success { ExecutionStatus::Success } else { ExecutionStatus::Failed };

        let execution = RuleExecution {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            trigger_snapshot: json!(trigger_data),
            status,
            actions_performed: if outcome.success { vec![outcome.detail.clone()] } else { vec![] },
            error: outcome.error.clone(),
            timestamp: Utc::now(),
        };
        self.store.insert_execution(&execution).await?;

        let mut updated_rule = rule.clone();
        updated_rule.execution_count += 1;
        if updated_rule.is_one_time && status == ExecutionStatus::Success {
            updated_rule.status = RuleStatus::Completed;
        }
        self.store.update_rule(&updated_rule).await?;

        if !outcome.success {
            warn!(rule_id = %rule.id, error = ?outcome.error, "rule action failed");
        }

        Ok(execution)
    }

    async fn dispatch(&self, rule: &AutomationRule, context: &TriggerContext) -> ActionOutcome {
        if !KNOWN_ACTION_TYPES.contains(&rule.action_type.as_str()) {
            return ActionOutcome::failure(UNKNOWN_ACTION_ERROR);
        }

        let params = resolve_pronouns(&rule.action_params, &context.trigger_user);
        debug!(rule_id = %rule.id, action = %rule.action_type, "dispatching rule action");
        self.executor.execute(&rule.action_type, &params, context).await
    }
}

fn conditions_match(conditions: &HashMap<String, Value>, trigger_data: &HashMap<String, Value>) -> bool {
    conditions.iter().all(|(key, expected)| match trigger_data.get(key) {
        // Condition not applicable: a missing key doesn't fail the match.
        None => true,
        Some(actual) => value_matches(expected, actual),
    })
}

fn value_matches(expected: &Value, actual: &Value) -> bool {
    match expected {
        Value::Array(items) => match actual {
            Value::Array(actual_items) => items.iter().any(|item| actual_items.contains(item)),
            _ => items.iter().any(|item| item == actual),
        },
        Value::String(s) => actual
            .as_str()
            .map(|a| a.to_lowercase().contains(&s.to_lowercase()))
            .unwrap_or(false),
        other => other == actual,
    }
}

fn resolve_pronouns(params: &HashMap<String, Value>, trigger_user: &str) -> HashMap<String, Value> {
    params
        .iter()
        .map(|(key, value)| {
            let resolved = match value {
                Value::String(s) if PRONOUNS.contains(&s.to_lowercase().as_str()) => Value::String(trigger_user.to_string()),
                other => other.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rules: Mutex<Vec<AutomationRule>>,
        executions: Mutex<Vec<RuleExecution>>,
    }

    #[async_trait]
    impl RuleRepository for MemoryStore {
        async fn insert_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
            self.rules.lock().unwrap().push(rule.clone());
            Ok(())
        }
        async fn get_rule(&self, id: Uuid) -> Result<Option<AutomationRule>, StorageError> {
            Ok(self.rules.lock().unwrap().iter().find(|r| r.id == id).cloned())
        }
        async fn list_rules_for_team(&self, team: &str) -> Result<Vec<AutomationRule>, StorageError> {
            Ok(self.rules.lock().unwrap().iter().filter(|r| r.team == team).cloned().collect())
        }
        async fn update_rule(&self, rule: &AutomationRule) -> Result<(), StorageError> {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.id == rule.id) {
                Some(existing) => {
                    *existing = rule.clone();
                    Ok(())
                }
                None => Err(StorageError::NotFound(rule.id.to_string())),
            }
        }
    }

    #[async_trait]
    impl RuleExecutionRepository for MemoryStore {
        async fn insert_execution(&self, execution: &RuleExecution) -> Result<(), StorageError> {
            self.executions.lock().unwrap().push(execution.clone());
            Ok(())
        }
        async fn list_executions_for_rule(&self, rule_id: Uuid) -> Result<Vec<RuleExecution>, StorageError> {
            Ok(self.executions.lock().unwrap().iter().filter(|e| e.rule_id == rule_id).cloned().collect())
        }
    }

    struct EchoExecutor;

    #[async_trait]
    impl ActionExecutor for EchoExecutor {
        async fn execute(&self, action_type: &str, params: &HashMap<String, Value>, _context: &TriggerContext) -> ActionOutcome {
            ActionOutcome::success(json!({"action": action_type, "params": params}))
        }
    }

    fn sample_rule(trigger_type: &str, action_type: &str) -> AutomationRule {
        AutomationRule {
            id: Uuid::new_v4(),
            team: "acme".into(),
            trigger_type: trigger_type.into(),
            trigger_conditions: HashMap::new(),
            action_type: action_type.into(),
            action_params: HashMap::new(),
            status: RuleStatus::Active,
            is_one_time: false,
            execution_count: 0,
        }
    }

    #[tokio::test]
    async fn string_condition_matches_substring_case_insensitively() {
        let mut rule = sample_rule("pr_merged", "notify_user");
        rule.trigger_conditions.insert("title".into(), json!("Breaking"));
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        let mut data = HashMap::new();
        data.insert("title".into(), json!("fix: BREAKING change to auth"));
        let matched = engine.get_rules_for_trigger("acme", "pr_merged", &data).await.unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn list_condition_matches_if_any_element_appears() {
        let mut rule = sample_rule("task_completed", "notify_user");
        rule.trigger_conditions.insert("label".into(), json!(["urgent", "security"]));
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        let mut data = HashMap::new();
        data.insert("label".into(), json!("security"));
        assert_eq!(engine.get_rules_for_trigger("acme", "task_completed", &data).await.unwrap().len(), 1);

        let mut miss = HashMap::new();
        miss.insert("label".into(), json!("cosmetic"));
        assert_eq!(engine.get_rules_for_trigger("acme", "task_completed", &miss).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn missing_trigger_key_is_not_applicable() {
        let mut rule = sample_rule("task_completed", "notify_user");
        rule.trigger_conditions.insert("label".into(), json!("urgent"));
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        // "label" is absent from trigger_data entirely, not present-but-mismatched;
        // a condition key with no corresponding trigger field doesn't fail the match.
        let matched = engine.get_rules_for_trigger("acme", "task_completed", &HashMap::new()).await.unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[tokio::test]
    async fn list_condition_against_list_actual_is_set_intersection() {
        let mut rule = sample_rule("task_completed", "notify_user");
        rule.trigger_conditions.insert("task_keywords".into(), json!(["CSS", "layout"]));
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        let mut data = HashMap::new();
        data.insert("task_keywords".into(), json!(["layout", "backend"]));
        assert_eq!(engine.get_rules_for_trigger("acme", "task_completed", &data).await.unwrap().len(), 1);

        let mut miss = HashMap::new();
        miss.insert("task_keywords".into(), json!(["backend", "api"]));
        assert_eq!(engine.get_rules_for_trigger("acme", "task_completed", &miss).await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn unknown_action_type_fails_without_calling_executor() {
        let rule = sample_rule("pr_merged", "delete_repo");
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        let execution = engine.evaluate(&rule, HashMap::new(), "alice").await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(execution.error.as_deref(), Some(UNKNOWN_ACTION_ERROR));
    }

    #[tokio::test]
    async fn one_time_rule_completes_after_successful_execution() {
        let mut rule = sample_rule("pr_merged", "notify_user");
        rule.is_one_time = true;
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        engine.evaluate(&rule, HashMap::new(), "alice").await.unwrap();
        let updated = engine.store.get_rule(rule.id).await.unwrap().unwrap();
        assert_eq!(updated.status, RuleStatus::Completed);
        assert_eq!(updated.execution_count, 1);
    }

    #[tokio::test]
    async fn pronouns_in_action_params_resolve_to_trigger_user() {
        let mut rule = sample_rule("task_completed", "assign_task");
        rule.action_params.insert("assignee".into(), json!("them"));
        let store = MemoryStore::default();
        store.insert_rule(&rule).await.unwrap();
        let engine = RuleEngine::new(store, EchoExecutor);

        let execution = engine.evaluate(&rule, HashMap::new(), "bob").await.unwrap();
        assert_eq!(execution.actions_performed[0]["params"]["assignee"], json!("bob"));
    }
}
