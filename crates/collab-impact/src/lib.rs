#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-impact** – change-impact analyzer.
//!
//! Turns a single git change (a commit or a pull request event) into an
//! [`ImpactVerdict`]: whether it is breaking, who it affects, and at what
//! priority it should be surfaced. Breaking-change classification is
//! delegated to [`collab_classifier`]; affected-owner lookup is delegated to
//! [`collab_ownership`]. Both dependencies are infallible from this crate's
//! point of view — a provider outage degrades the verdict, it never fails it.

use collab_classifier::classifier::is_breaking_change;
use collab_classifier::LlmGateway;
use collab_ownership::OwnershipEngine;
use collab_store_core::OwnershipRepository;
use collab_types::{ChangeType, ImpactVerdict, Priority, Severity};

/// Minimum number of files touched by a single commit before it is treated
/// as notification-worthy on its own, independent of ownership or breakage.
pub const LARGE_COMMIT_FILE_THRESHOLD: usize = 10;
/// Affected-owner count above which a non-breaking change still gets normal
/// (rather than low) priority.
pub const WIDE_IMPACT_OWNER_THRESHOLD: usize = 3;

/// A single change to analyze for impact.
#[derive(Debug, Clone)]
pub struct ChangeInput {
    /// Commit sha, PR number, or other stable identifier.
    pub change_id: String,
    /// What kind of change this is.
    pub change_type: ChangeType,
    /// Repository full name.
    pub repo: String,
    /// Author/sender, excluded from affected users.
    pub author: String,
    /// Commit message or PR title/body, used for breaking-change classification.
    pub content: String,
    /// Files touched by the change.
    pub files: Vec<String>,
    /// Webhook action, e.g. `"opened"`, `"merged"`, present only for PR events.
    pub action: Option<String>,
}

impl ChangeInput {
    fn is_merged_pr(&self) -> bool {
        self.change_type == ChangeType::Pr && self.action.as_deref() == Some("merged")
    }
}

/// Analyzes changes for breaking-ness, affected owners, and notification priority.
pub struct ImpactAnalyzer<R>
where
    R: OwnershipRepository,
{
    gateway: std::sync::Arc<LlmGateway>,
    ownership: OwnershipEngine<R>,
}

impl<R> ImpactAnalyzer<R>
where
    R: OwnershipRepository,
{
    /// Construct an analyzer over a classifier gateway and an ownership store.
    ///
    /// Takes the gateway as an `Arc` so a single gateway (with its own rate
    /// limiter and provider connection) can back several handlers that also
    /// call the classifier directly.
    pub fn new(gateway: std::sync::Arc<LlmGateway>, ownership: OwnershipEngine<R>) -> Self {
        Self { gateway, ownership }
    }

    /// Analyze a single change, producing its impact verdict.
    pub async fn analyze(&self, change: &ChangeInput) -> ImpactVerdict {
        let verdict = is_breaking_change(&self.gateway, &change.content).await;

        let severity = if change.is_merged_pr() && verdict.severity == Severity::Low {
            Severity::Medium
        } else {
            verdict.severity
        };

        let affected_users = self
            .ownership
            .affected_users(&change.repo, &change.files, &change.author)
            .await
            .unwrap_or_default();

        let is_large_commit = change.change_type == ChangeType::Commit && change.files.len() > LARGE_COMMIT_FILE_THRESHOLD;

        let should_notify = verdict.is_breaking || !affected_users.is_empty() || is_large_commit || change.is_merged_pr();

        let priority = priority_for(verdict.is_breaking, severity, change.is_merged_pr(), affected_users.len());

        let summary = if verdict.is_breaking {
            verdict.reason.clone()
        } else {
            format!("{} touched {} file(s) in {}", change.author, change.files.len(), change.repo)
        };

        ImpactVerdict {
            change_id: change.change_id.clone(),
            change_type: change.change_type,
            is_breaking: verdict.is_breaking,
            severity,
            affected_users,
            summary,
            priority,
            should_notify,
        }
    }
}

fn priority_for(is_breaking: bool, severity: Severity, merged_pr: bool, affected_count: usize) -> Priority {
    if is_breaking && (matches!(severity, Severity::High | Severity::Critical) || merged_pr) {
        Priority::Urgent
    } else if is_breaking {
        Priority::High
    } else if merged_pr || affected_count > WIDE_IMPACT_OWNER_THRESHOLD {
        Priority::Normal
    } else {
        Priority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaking_with_high_severity_is_urgent() {
        assert_eq!(priority_for(true, Severity::High, false, 0), Priority::Urgent);
        assert_eq!(priority_for(true, Severity::Critical, false, 0), Priority::Urgent);
    }

    #[test]
    fn breaking_merged_pr_is_urgent_regardless_of_severity() {
        assert_eq!(priority_for(true, Severity::Low, true, 0), Priority::Urgent);
    }

    #[test]
    fn breaking_low_severity_non_merged_is_high() {
        assert_eq!(priority_for(true, Severity::Low, false, 0), Priority::High);
    }

    #[test]
    fn non_breaking_merged_pr_is_normal() {
        assert_eq!(priority_for(false, Severity::Low, true, 0), Priority::Normal);
    }

    #[test]
    fn non_breaking_wide_impact_is_normal() {
        assert_eq!(priority_for(false, Severity::Low, false, 4), Priority::Normal);
    }

    #[test]
    fn non_breaking_narrow_impact_is_low() {
        assert_eq!(priority_for(false, Severity::Low, false, 1), Priority::Low);
    }

    #[test]
    fn merged_pr_is_detected_only_for_pr_change_type_with_merged_action() {
        let commit = ChangeInput {
            change_id: "abc".into(),
            change_type: ChangeType::Commit,
            repo: "acme/api".into(),
            author: "alice".into(),
            content: String::new(),
            files: vec![],
            action: Some("merged".into()),
        };
        assert!(!commit.is_merged_pr());

        let pr = ChangeInput {
            change_type: ChangeType::Pr,
            ..commit
        };
        assert!(pr.is_merged_pr());
    }
}
