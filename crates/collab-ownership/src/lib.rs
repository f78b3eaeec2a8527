#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-ownership** – file-ownership scoring engine.
//!
//! Tracks, per (repository, file, user), how much of a file a user owns,
//! derived from their commit history against it. A commit's diff stats are
//! not known per-file (only the commit total is), so each touched file is
//! credited an even share of the commit's total changed lines, split evenly
//! between added and removed. Scores for every owner of a touched file are
//! recomputed after each commit, since a new commit shifts every owner's
//! share of the file's total activity.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use collab_store_core::{OwnershipRepository, StorageError};
use collab_types::Ownership;
use thiserror::Error;
use tracing::debug;

/// Weight given to an owner's share of commits touching the file.
pub const COMMIT_SHARE_WEIGHT: f64 = 0.4;
/// Weight given to an owner's share of lines changed in the file.
pub const LINES_SHARE_WEIGHT: f64 = 0.3;
/// Weight given to an owner's recency of activity on the file.
pub const RECENCY_WEIGHT: f64 = 0.3;
/// Number of days over which recency decays to zero.
pub const RECENCY_WINDOW_DAYS: f64 = 90.0;
/// Default minimum score for an owner to be considered a meaningful owner.
pub const DEFAULT_MIN_SCORE: f64 = 0.10;

/// Errors raised while recording a commit or querying ownership.
#[derive(Error, Debug)]
pub enum OwnershipError {
    /// The underlying storage backend failed.
    #[error("storage backend error: {0}")]
    Storage(#[from] StorageError),
}

/// A single commit's effect on a set of files, as reported by the ingress.
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// Repository full name.
    pub repo: String,
    /// Commit author / username.
    pub author: String,
    /// Files touched by the commit.
    pub files: Vec<String>,
    /// Total lines added across the whole commit.
    pub lines_added: u64,
    /// Total lines removed across the whole commit.
    pub lines_removed: u64,
    /// When the commit was authored.
    pub timestamp: DateTime<Utc>,
}

/// Scores and updates file ownership from commit activity.
pub struct OwnershipEngine<R>
where
    R: OwnershipRepository,
{
    repo: R,
}

impl<R> OwnershipEngine<R>
where
    R: OwnershipRepository,
{
    /// Wrap a repository with the ownership scoring engine.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Apply a commit's effect on ownership: credit the author for each
    /// touched file, then recompute scores for every owner of those files.
    pub async fn record_commit(&self, commit: &CommitEvent) -> Result<(), OwnershipError> {
        if commit.files.is_empty() {
            return Ok(());
        }

        let per_file_total = (commit.lines_added + commit.lines_removed) as f64 / commit.files.len() as f64;
        let per_file_added = (per_file_total / 2.0).round() as u64;
        let per_file_removed = (per_file_total / 2.0).round() as u64;

        for file in &commit.files {
            self.credit_commit(&commit.repo, file, &commit.author, per_file_added, per_file_removed, commit.timestamp)
                .await?;
            self.recompute_scores(&commit.repo, file, Utc::now()).await?;
        }

        Ok(())
    }

    async fn credit_commit(
        &self,
        repo: &str,
        file: &str,
        user: &str,
        lines_added: u64,
        lines_removed: u64,
        at: DateTime<Utc>,
    ) -> Result<(), OwnershipError> {
        let existing = self.repo.get_ownership(repo, file, user).await?;

        let updated = match existing {
            Some(mut ownership) => {
                ownership.commits += 1;
                ownership.lines_added += lines_added;
                ownership.lines_removed += lines_removed;
                ownership.last_commit_at = at;
                ownership
            }
            None => Ownership {
                repo: repo.to_string(),
                file: file.to_string(),
                user: user.to_string(),
                commits: 1,
                lines_added,
                lines_removed,
                first_commit_at: at,
                last_commit_at: at,
                score: 0.0,
                recent_score: 0.0,
            },
        };

        self.repo.upsert_ownership(&updated).await?;
        Ok(())
    }

    async fn recompute_scores(&self, repo: &str, file: &str, now: DateTime<Utc>) -> Result<(), OwnershipError> {
        let owners = self.repo.list_owners(repo, file).await?;

        let total_commits: u64 = owners.iter().map(|o| o.commits).sum();
        let total_lines: u64 = owners.iter().map(|o| o.lines_added + o.lines_removed).sum();

        for mut owner in owners {
            let commit_share = if total_commits > 0 {
                owner.commits as f64 / total_commits as f64
            } else {
                0.0
            };
            let lines_share = if total_lines > 0 {
                (owner.lines_added + owner.lines_removed) as f64 / total_lines as f64
            } else {
                0.0
            };
            let days_since_last_commit = (now - owner.last_commit_at).num_seconds() as f64 / 86_400.0;
            let recency = (1.0 - days_since_last_commit / RECENCY_WINDOW_DAYS).max(0.0);

            owner.score = COMMIT_SHARE_WEIGHT * commit_share + LINES_SHARE_WEIGHT * lines_share + RECENCY_WEIGHT * recency;
            owner.recent_score = recency;

            self.repo.upsert_ownership(&owner).await?;
        }

        debug!(repo, file, total_commits, total_lines, "recomputed ownership scores");
        Ok(())
    }

    /// List the meaningful owners of `file`, sorted by score descending.
    /// Owners below `min_score` are excluded.
    pub async fn owners_of(&self, repo: &str, file: &str, min_score: f64) -> Result<Vec<Ownership>, OwnershipError> {
        let mut owners: Vec<Ownership> = self
            .repo
            .list_owners(repo, file)
            .await?
            .into_iter()
            .filter(|o| o.score >= min_score)
            .collect();

        owners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(owners)
    }

    /// Map every meaningful owner (other than `exclude_user`) of any file in
    /// `files` to the subset of those files they own, using
    /// [`DEFAULT_MIN_SCORE`] as the ownership threshold.
    pub async fn affected_users(
        &self,
        repo: &str,
        files: &[String],
        exclude_user: &str,
    ) -> Result<HashMap<String, Vec<String>>, OwnershipError> {
        let mut affected: HashMap<String, Vec<String>> = HashMap::new();

        for file in files {
            for owner in self.owners_of(repo, file, DEFAULT_MIN_SCORE).await? {
                if owner.user == exclude_user {
                    continue;
                }
                affected.entry(owner.user.clone()).or_default().push(file.clone());
            }
        }

        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRepo {
        rows: Mutex<Vec<Ownership>>,
    }

    #[async_trait::async_trait]
    impl OwnershipRepository for MemoryRepo {
        async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows
                .iter_mut()
                .find(|o| o.repo == ownership.repo && o.file == ownership.file && o.user == ownership.user)
            {
                *existing = ownership.clone();
            } else {
                rows.push(ownership.clone());
            }
            Ok(())
        }

        async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().find(|o| o.repo == repo && o.file == file && o.user == user).cloned())
        }

        async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError> {
            let rows = self.rows.lock().unwrap();
            Ok(rows.iter().filter(|o| o.repo == repo && o.file == file).cloned().collect())
        }
    }

    fn commit(repo: &str, author: &str, files: &[&str], added: u64, removed: u64, at: DateTime<Utc>) -> CommitEvent {
        CommitEvent {
            repo: repo.to_string(),
            author: author.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            lines_added: added,
            lines_removed: removed,
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn single_owner_converges_to_max_score() {
        let engine = OwnershipEngine::new(MemoryRepo::default());
        let now = Utc::now();

        engine.record_commit(&commit("acme/api", "alice", &["src/lib.rs"], 20, 10, now)).await.unwrap();

        let owners = engine.owners_of("acme/api", "src/lib.rs", 0.0).await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].user, "alice");
        assert_eq!(owners[0].commits, 1);
        // sole owner: commit_share=1, lines_share=1, recency~=1
        assert!(owners[0].score > 0.99);
    }

    #[tokio::test]
    async fn ownership_splits_across_touched_files_evenly() {
        let engine = OwnershipEngine::new(MemoryRepo::default());
        let now = Utc::now();

        engine
            .record_commit(&commit("acme/api", "alice", &["a.rs", "b.rs"], 10, 10, now))
            .await
            .unwrap();

        let a = engine.repo.get_ownership("acme/api", "a.rs", "alice").await.unwrap().unwrap();
        // total changed lines = 20, split across 2 files = 10 per file, half added half removed
        assert_eq!(a.lines_added, 5);
        assert_eq!(a.lines_removed, 5);
    }

    #[tokio::test]
    async fn second_owner_dilutes_first_owners_score() {
        let engine = OwnershipEngine::new(MemoryRepo::default());
        let now = Utc::now();

        engine.record_commit(&commit("acme/api", "alice", &["src/lib.rs"], 10, 10, now)).await.unwrap();
        let alice_alone = engine.owners_of("acme/api", "src/lib.rs", 0.0).await.unwrap()[0].score;

        engine.record_commit(&commit("acme/api", "bob", &["src/lib.rs"], 10, 10, now)).await.unwrap();
        let owners = engine.owners_of("acme/api", "src/lib.rs", 0.0).await.unwrap();
        let alice_after = owners.iter().find(|o| o.user == "alice").unwrap().score;

        assert!(alice_after < alice_alone);
    }

    #[tokio::test]
    async fn stale_ownership_is_excluded_by_min_score() {
        let engine = OwnershipEngine::new(MemoryRepo::default());
        let long_ago = Utc::now() - Duration::days(365);

        engine.record_commit(&commit("acme/api", "alice", &["src/lib.rs"], 1, 1, long_ago)).await.unwrap();

        let owners = engine.owners_of("acme/api", "src/lib.rs", DEFAULT_MIN_SCORE).await.unwrap();
        // recency has decayed to 0, and alice is the sole owner so commit_share/lines_share
        // alone (0.4 + 0.3 = 0.7) still clear the threshold; verify the recency term did decay.
        assert_eq!(owners[0].recent_score, 0.0);
    }

    #[tokio::test]
    async fn affected_users_excludes_the_author_and_groups_by_file() {
        let engine = OwnershipEngine::new(MemoryRepo::default());
        let now = Utc::now();

        engine.record_commit(&commit("acme/api", "alice", &["a.rs"], 20, 0, now)).await.unwrap();
        engine.record_commit(&commit("acme/api", "bob", &["b.rs"], 20, 0, now)).await.unwrap();

        let affected = engine
            .affected_users("acme/api", &["a.rs".to_string(), "b.rs".to_string()], "alice")
            .await
            .unwrap();

        assert!(!affected.contains_key("alice"));
        assert_eq!(affected.get("bob"), Some(&vec!["b.rs".to_string()]));
    }
}
