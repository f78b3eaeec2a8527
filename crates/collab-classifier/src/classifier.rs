//! The classification/extraction capability the rest of the core depends on.
//!
//! Every function here is infallible: a provider error, a malformed JSON
//! body, or a missing field all collapse to the same safe default verdict
//! rather than propagating an error past this module. Callers never need to
//! handle an LLM outage as a distinct case from "nothing interesting found".

use collab_types::Severity;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{LlmGateway, LlmRequest};

const CLASSIFY_MAX_CONTENT_CHARS: usize = 4_000;
const EXTRACT_MAX_CONTENT_CHARS: usize = 5_000;
const BREAKING_MAX_CONTENT_CHARS: usize = 3_000;

/// Verdict returned by [`classify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// One of the content categories (`task`, `decision`, `instruction`,
    /// `note`, `dependency`, `prospect`, `discussion`, `announcement`,
    /// `question`, `other`).
    pub category: String,
    /// How important this content is, in `[0.0, 1.0]`.
    pub importance_score: f64,
    /// Whether the classifier judged this content to require someone's action.
    pub is_actionable: bool,
    /// One-sentence summary.
    pub summary: String,
}

impl Default for ClassificationResult {
    fn default() -> Self {
        Self {
            category: "other".to_string(),
            importance_score: 0.5,
            is_actionable: false,
            summary: String::new(),
        }
    }
}

/// Verdict returned by [`is_breaking_change`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakingChangeVerdict {
    /// Whether the content describes a breaking change.
    pub is_breaking: bool,
    /// Severity of the break, or [`Severity::Low`] on fallback.
    pub severity: Severity,
    /// Explanation, or a fixed fallback string on failure.
    pub reason: String,
    /// Systems/files/areas the content names as affected.
    pub affected_areas: Vec<String>,
}

impl Default for BreakingChangeVerdict {
    fn default() -> Self {
        Self {
            is_breaking: false,
            severity: Severity::Low,
            reason: "classification unavailable".to_string(),
            affected_areas: Vec::new(),
        }
    }
}

/// A decision extracted from discussion or PR content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDecision {
    /// Short title.
    pub title: String,
    /// One-paragraph summary.
    pub summary: String,
    /// Why the decision was made.
    pub reasoning: String,
    /// Background context preceding the decision.
    pub context: String,
    /// Person who made or announced the decision, if named.
    pub decided_by: Option<String>,
    /// Files the content names as affected.
    pub affected_files: Vec<String>,
    /// `architecture | process | tooling | feature | infrastructure | security | other`.
    pub category: String,
    /// `low | medium | high | critical`.
    pub importance: String,
}

/// An action item extracted from discussion content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedActionItem {
    /// Short title.
    pub title: String,
    /// Longer description.
    pub description: String,
    /// Person named as the assignee, if any.
    pub assigned_to: Option<String>,
    /// `low | medium | high | urgent`.
    pub priority: String,
}

/// Classify a piece of content into a category with an importance score.
///
/// Returns [`ClassificationResult::default`] if the provider call fails or
/// the response cannot be parsed.
pub async fn classify(gateway: &LlmGateway, content: &str, source: &str) -> ClassificationResult {
    let truncated = truncate(content, CLASSIFY_MAX_CONTENT_CHARS);
    let prompt = format!(
        r#"You are a content classification expert for a software development team's knowledge system.

Analyze the following content and classify it according to these categories:
task, decision, instruction, note, dependency, prospect, discussion, announcement, question, other.

Respond with a JSON object containing:
{{
    "category": "<category from list above>",
    "importance_score": <0.0-1.0, how important is this>,
    "is_actionable": <true/false, does this require someone to take action>,
    "summary": "<one sentence summary>"
}}

CONTENT SOURCE: {source}
CONTENT:
---
{truncated}
---

Respond ONLY with the JSON object, no other text."#
    );

    match run(gateway, "classifier", &prompt, 1000).await {
        Some(raw) => parse_json::<RawClassification>(&raw)
            .map(RawClassification::into_result)
            .unwrap_or_else(|| {
                warn!("classifier response did not parse as JSON, using default verdict");
                ClassificationResult::default()
            }),
        None => ClassificationResult::default(),
    }
}

/// Determine whether `content` describes a breaking change.
///
/// Falls back to `is_breaking=false, severity=low` on any failure, matching
/// the core's documented degradation behavior for classifier outages.
pub async fn is_breaking_change(gateway: &LlmGateway, content: &str) -> BreakingChangeVerdict {
    let truncated = truncate(content, BREAKING_MAX_CONTENT_CHARS);
    let prompt = format!(
        r#"Analyze this content and determine if it describes a BREAKING CHANGE
(a change that could break existing functionality or require updates from other team members).

CONTENT:
---
{truncated}
---

Look for: API changes, database schema changes, configuration changes, dependency
updates, interface/contract changes, removal of features.

Respond with JSON:
{{
    "is_breaking": true/false,
    "reason": "explanation",
    "affected_areas": ["list of affected areas/files/systems"],
    "severity": "low/medium/high/critical"
}}

Respond ONLY with JSON."#
    );

    match run(gateway, "breaking_change", &prompt, 500).await {
        Some(raw) => parse_json::<RawBreakingChange>(&raw)
            .map(RawBreakingChange::into_verdict)
            .unwrap_or_else(|| {
                warn!("breaking-change response did not parse as JSON, using default verdict");
                BreakingChangeVerdict::default()
            }),
        None => BreakingChangeVerdict::default(),
    }
}

/// Extract a decision from content, if one is present.
pub async fn extract_decision(
    gateway: &LlmGateway,
    content: &str,
    source: &str,
) -> Option<ExtractedDecision> {
    let truncated = truncate(content, EXTRACT_MAX_CONTENT_CHARS);
    let prompt = format!(
        r#"You are an expert at extracting decisions from software development discussions.

A DECISION is when someone makes a choice about HOW to do something, with reasoning.
Look for: "We decided to...", "We're going with...", architecture decisions, process
changes, tool selections.

SOURCE: {source}
CONTENT:
---
{truncated}
---

If a decision is found, respond with JSON:
{{
    "has_decision": true,
    "decision": {{
        "title": "Brief title of the decision",
        "summary": "One paragraph summary",
        "reasoning": "Why this decision was made",
        "context": "Background context that led to this decision",
        "decided_by": "Person who made/announced the decision or null",
        "affected_files": ["Affected file paths if mentioned"],
        "category": "architecture|process|tooling|feature|infrastructure|security|other",
        "importance": "low|medium|high|critical"
    }}
}}

If NO decision is found, respond with {{"has_decision": false}}.

Respond ONLY with JSON."#
    );

    let raw = run(gateway, "decision_extractor", &prompt, 1500).await?;
    let parsed: RawDecisionEnvelope = parse_json(&raw)?;
    if !parsed.has_decision {
        return None;
    }
    parsed.decision
}

/// Extract every action item mentioned in content.
///
/// Returns an empty vec if none are found or the provider call fails.
pub async fn extract_action_items(
    gateway: &LlmGateway,
    content: &str,
    source: &str,
) -> Vec<ExtractedActionItem> {
    let truncated = truncate(content, EXTRACT_MAX_CONTENT_CHARS);
    let prompt = format!(
        r#"You are an expert at extracting action items from software development discussions.

An ACTION ITEM is something that needs to be done by someone. Look for: "TODO",
"Need to...", "Should...", assignments ("@person please..."), follow-ups.

SOURCE: {source}
CONTENT:
---
{truncated}
---

Respond with JSON:
{{
    "has_action_items": true/false,
    "action_items": [
        {{
            "title": "Brief action title",
            "description": "Detailed description",
            "assigned_to": "Person assigned or null",
            "priority": "low|medium|high|urgent"
        }}
    ]
}}

Respond ONLY with JSON."#
    );

    let Some(raw) = run(gateway, "action_item_extractor", &prompt, 1500).await else {
        return Vec::new();
    };
    parse_json::<RawActionItemEnvelope>(&raw)
        .filter(|envelope| envelope.has_action_items)
        .map(|envelope| envelope.action_items)
        .unwrap_or_default()
}

async fn run(gateway: &LlmGateway, caller: &str, prompt: &str, max_tokens: u32) -> Option<String> {
    let request = match LlmRequest::new(prompt) {
        Ok(request) => request.with_max_tokens(max_tokens).with_caller(caller),
        Err(e) => {
            warn!("failed to build classifier request: {e}");
            return None;
        }
    };
    let request = match request.with_temperature(0.1) {
        Ok(request) => request,
        Err(e) => {
            warn!("failed to set classifier temperature: {e}");
            return None;
        }
    };

    match gateway.complete(request).await {
        Ok(response) => Some(response.content().to_string()),
        Err(e) => {
            warn!("classifier call failed: {e}");
            None
        }
    }
}

/// Strip a leading/trailing markdown code fence and parse the remainder as JSON.
fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Option<T> {
    let cleaned = strip_code_fence(raw.trim());
    if let Ok(value) = serde_json::from_str(&cleaned) {
        return Some(value);
    }
    // Fall back to extracting the first top-level JSON object in the text.
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&cleaned[start..=end]).ok()
}

fn strip_code_fence(s: &str) -> String {
    if let Some(rest) = s.strip_prefix("```") {
        let rest = rest.trim_start_matches("json").trim_start();
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    s.to_string()
}

fn truncate(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    #[serde(default = "default_category")]
    category: String,
    #[serde(default = "default_importance")]
    importance_score: f64,
    #[serde(default)]
    is_actionable: bool,
    #[serde(default)]
    summary: String,
}

fn default_category() -> String {
    "other".to_string()
}

fn default_importance() -> f64 {
    0.5
}

impl RawClassification {
    fn into_result(self) -> ClassificationResult {
        ClassificationResult {
            category: self.category,
            importance_score: self.importance_score.clamp(0.0, 1.0),
            is_actionable: self.is_actionable,
            summary: self.summary,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawBreakingChange {
    #[serde(default)]
    is_breaking: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    affected_areas: Vec<String>,
    #[serde(default = "default_severity")]
    severity: Severity,
}

fn default_severity() -> Severity {
    Severity::Low
}

impl RawBreakingChange {
    fn into_verdict(self) -> BreakingChangeVerdict {
        BreakingChangeVerdict {
            is_breaking: self.is_breaking,
            severity: self.severity,
            reason: self.reason,
            affected_areas: self.affected_areas,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDecisionEnvelope {
    #[serde(default)]
    has_decision: bool,
    #[serde(default)]
    decision: Option<ExtractedDecision>,
}

#[derive(Debug, Deserialize)]
struct RawActionItemEnvelope {
    #[serde(default)]
    has_action_items: bool,
    #[serde(default)]
    action_items: Vec<ExtractedActionItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_accepts_plain_object() {
        let parsed: RawClassification = parse_json(r#"{"category": "task", "importance_score": 0.8}"#).unwrap();
        assert_eq!(parsed.category, "task");
    }

    #[test]
    fn parse_json_strips_markdown_fence() {
        let raw = "```json\n{\"category\": \"decision\", \"summary\": \"x\"}\n```";
        let parsed: RawClassification = parse_json(raw).unwrap();
        assert_eq!(parsed.category, "decision");
    }

    #[test]
    fn parse_json_extracts_embedded_object() {
        let raw = "Sure, here you go:\n{\"is_breaking\": true, \"severity\": \"high\"}\nHope that helps!";
        let parsed: RawBreakingChange = parse_json(raw).unwrap();
        assert!(parsed.is_breaking);
        assert_eq!(parsed.severity, Severity::High);
    }

    #[test]
    fn parse_json_returns_none_for_garbage() {
        assert!(parse_json::<RawClassification>("not json at all").is_none());
    }

    #[test]
    fn classification_default_is_safe_fallback() {
        let default = ClassificationResult::default();
        assert_eq!(default.category, "other");
        assert!(!default.is_actionable);
    }

    #[test]
    fn breaking_change_default_is_non_breaking_low_severity() {
        let default = BreakingChangeVerdict::default();
        assert!(!default.is_breaking);
        assert_eq!(default.severity, Severity::Low);
    }

    #[test]
    fn decision_envelope_with_no_decision_parses_without_decision_field() {
        let parsed: RawDecisionEnvelope = parse_json(r#"{"has_decision": false}"#).unwrap();
        assert!(!parsed.has_decision);
        assert!(parsed.decision.is_none());
    }

    #[test]
    fn action_item_envelope_defaults_to_empty() {
        let parsed: RawActionItemEnvelope = parse_json(r#"{"has_action_items": false}"#).unwrap();
        assert!(parsed.action_items.is_empty());
    }
}
