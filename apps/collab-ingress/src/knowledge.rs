//! Decision/activity indexing for content surfaced by the change processor.
//!
//! The core's design calls for a vector-store index of commit/PR/issue
//! content and a persisted `Decision` entity distinct from `Task`. Neither a
//! vector-store client nor a decision repository exists in this workspace
//! yet, so this module narrows both to a structured, idempotent log record:
//! every index/decision write is keyed by a source identifier (commit sha,
//! PR number, comment id) and recorded at most once per key. A later
//! iteration can swap the `info!` calls here for real writes without
//! touching call sites.

use std::sync::Arc;

use collab_classifier::classifier::{extract_decision, extract_action_items, ExtractedActionItem};
use collab_classifier::LlmGateway;
use dashmap::DashSet;
use tracing::info;

/// Content below this length is not worth indexing on its own.
pub const INDEX_MIN_CONTENT_CHARS: usize = 40;

/// Extracts and records decisions/action items, deduplicated by source key.
pub struct KnowledgeWriter {
    gateway: Arc<LlmGateway>,
    seen: DashSet<String>,
}

impl KnowledgeWriter {
    /// Build a writer over a shared classifier gateway.
    pub fn new(gateway: Arc<LlmGateway>) -> Self {
        Self { gateway, seen: DashSet::new() }
    }

    /// Record that `content` from `source`/`source_id` is indexed, unless
    /// already seen or too short to be worth indexing.
    pub fn index(&self, source: &str, source_id: &str, content: &str) {
        if content.len() < INDEX_MIN_CONTENT_CHARS {
            return;
        }
        let key = format!("index:{source}:{source_id}");
        if !self.seen.insert(key) {
            return;
        }
        info!(source, source_id, content_len = content.len(), "content indexed");
    }

    /// Extract a decision from `content`, if present, and record it once per
    /// `source_id`.
    pub async fn record_decision(&self, source: &str, source_id: &str, content: &str) {
        let key = format!("decision:{source}:{source_id}");
        if self.seen.contains(&key) {
            return;
        }
        if let Some(decision) = extract_decision(&self.gateway, content, source).await {
            info!(
                source,
                source_id,
                title = %decision.title,
                category = %decision.category,
                importance = %decision.importance,
                "decision recorded"
            );
            self.seen.insert(key);
        }
    }

    /// Extract action items from `content`, recording the extraction once
    /// per `source_id` and returning whatever was found (empty if the
    /// source was already extracted or nothing was present).
    pub async fn extract_tasks(&self, source: &str, source_id: &str, content: &str) -> Vec<ExtractedActionItem> {
        let key = format!("tasks:{source}:{source_id}");
        if !self.seen.insert(key) {
            return Vec::new();
        }
        extract_action_items(&self.gateway, content, source).await
    }
}
