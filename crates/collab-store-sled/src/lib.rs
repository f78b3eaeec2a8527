#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-store-sled** – Sled-based persistent storage driver.
//!
//! Backs the hot-path keyed lookups: per-(repo, file, user) ownership rows
//! and per-recipient rate-limit windows. Both are small, frequently-updated
//! records for which an embedded KV store with ACID single-key writes is a
//! better fit than a relational schema; see `collab-store-sqlite` for the
//! relationally-shaped entities (raw events, rules, notifications).

use std::path::Path;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use collab_store_core::{OwnershipRepository, RateLimitRepository, StorageError};
use collab_types::{Ownership, RateWindow};
use sled::{Db, Tree};
use tokio::sync::broadcast;

const DEFAULT_BROADCAST_SIZE: usize = 256;

fn ownership_key(repo: &str, file: &str, user: &str) -> Vec<u8> {
    format!("{repo}\0{file}\0{user}").into_bytes()
}

fn ownership_prefix(repo: &str, file: &str) -> Vec<u8> {
    format!("{repo}\0{file}\0").into_bytes()
}

fn backend_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// A persistent storage backend using the sled embedded database.
///
/// Maintains two trees: `ownership`, keyed by `repo\0file\0user`, and
/// `rate_windows`, keyed by the caller-supplied rate-limit key. Every
/// ownership upsert is broadcast on [`SledStore::subscribe_ownership`] so a
/// live dashboard can follow score changes without polling.
#[derive(Debug)]
pub struct SledStore {
    _db: Db,
    ownership: Tree,
    rate_windows: Tree,
    ownership_tx: broadcast::Sender<Ownership>,
}

impl SledStore {
    /// Opens or creates a sled database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> sled::Result<Self> {
        Self::from_db(sled::Config::default().path(path).open()?)
    }

    /// Builds a store from an already-open sled database.
    pub fn from_db(db: Db) -> sled::Result<Self> {
        let ownership = db.open_tree("ownership")?;
        let rate_windows = db.open_tree("rate_windows")?;
        let (ownership_tx, _) = broadcast::channel(DEFAULT_BROADCAST_SIZE);
        Ok(Self { _db: db, ownership, rate_windows, ownership_tx })
    }

    /// Opens a temporary, auto-cleaned database for tests.
    #[cfg(test)]
    pub fn temporary() -> sled::Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    /// Subscribe to live ownership updates as they are upserted.
    pub fn subscribe_ownership(&self) -> broadcast::Receiver<Ownership> {
        self.ownership_tx.subscribe()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> sled::Result<()> {
        self.ownership.flush_async().await?;
        self.rate_windows.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl OwnershipRepository for SledStore {
    async fn upsert_ownership(&self, ownership: &Ownership) -> Result<(), StorageError> {
        let key = ownership_key(&ownership.repo, &ownership.file, &ownership.user);
        let bytes = rmp_serde::to_vec_named(ownership).map_err(backend_err)?;
        self.ownership.insert(key, bytes).map_err(backend_err)?;
        let _ = self.ownership_tx.send(ownership.clone());
        Ok(())
    }

    async fn get_ownership(&self, repo: &str, file: &str, user: &str) -> Result<Option<Ownership>, StorageError> {
        let key = ownership_key(repo, file, user);
        match self.ownership.get(key).map_err(backend_err)? {
            Some(bytes) => rmp_serde::from_slice(&bytes).map(Some).map_err(backend_err),
            None => Ok(None),
        }
    }

    async fn list_owners(&self, repo: &str, file: &str) -> Result<Vec<Ownership>, StorageError> {
        let prefix = ownership_prefix(repo, file);
        self.ownership
            .scan_prefix(prefix)
            .map(|entry| {
                let (_, bytes) = entry.map_err(backend_err)?;
                rmp_serde::from_slice(&bytes).map_err(backend_err)
            })
            .collect()
    }
}

#[async_trait]
impl RateLimitRepository for SledStore {
    async fn increment(&self, key: &str, window: ChronoDuration) -> Result<u32, StorageError> {
        let now = Utc::now();
        let existing: Option<RateWindow> = match self.rate_windows.get(key).map_err(backend_err)? {
            Some(bytes) => Some(rmp_serde::from_slice(&bytes).map_err(backend_err)?),
            None => None,
        };

        let mut window_state = match existing {
            Some(state) if state.expires_at > now => state,
            _ => RateWindow { counter: 0, expires_at: now + window },
        };
        window_state.counter += 1;

        let bytes = rmp_serde::to_vec_named(&window_state).map_err(backend_err)?;
        self.rate_windows.insert(key, bytes).map_err(backend_err)?;
        Ok(window_state.counter)
    }

    async fn current(&self, key: &str) -> Result<Option<RateWindow>, StorageError> {
        let now = Utc::now();
        match self.rate_windows.get(key).map_err(backend_err)? {
            Some(bytes) => {
                let state: RateWindow = rmp_serde::from_slice(&bytes).map_err(backend_err)?;
                Ok(if state.expires_at > now { Some(state) } else { None })
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ownership(user: &str, score: f64) -> Ownership {
        let now = Utc::now();
        Ownership {
            repo: "acme/widgets".into(),
            file: "src/lib.rs".into(),
            user: user.into(),
            commits: 1,
            lines_added: 5,
            lines_removed: 0,
            first_commit_at: now,
            last_commit_at: now,
            score,
            recent_score: score,
        }
    }

    #[tokio::test]
    async fn ownership_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");

        {
            let store = SledStore::open(&path).unwrap();
            store.upsert_ownership(&sample_ownership("alice", 0.6)).await.unwrap();
            store.flush().await.unwrap();
        }

        let store = SledStore::open(&path).unwrap();
        let row = store.get_ownership("acme/widgets", "src/lib.rs", "alice").await.unwrap().unwrap();
        assert_eq!(row.score, 0.6);
    }

    #[tokio::test]
    async fn list_for_file_only_returns_matching_prefix() {
        let store = SledStore::temporary().unwrap();
        store.upsert_ownership(&sample_ownership("alice", 0.5)).await.unwrap();

        let mut other = sample_ownership("alice", 0.1);
        other.file = "src/other.rs".into();
        store.upsert_ownership(&other).await.unwrap();

        let owners = store.list_owners("acme/widgets", "src/lib.rs").await.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].file, "src/lib.rs");
    }

    #[tokio::test]
    async fn rate_limit_increments_and_expires() {
        let store = SledStore::temporary().unwrap();
        let window = ChronoDuration::milliseconds(50);

        assert_eq!(store.increment("alice", window).await.unwrap(), 1);
        assert_eq!(store.increment("alice", window).await.unwrap(), 2);

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert_eq!(store.increment("alice", window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ownership_upsert_broadcasts_live_update() {
        let store = SledStore::temporary().unwrap();
        let mut rx = store.subscribe_ownership();

        store.upsert_ownership(&sample_ownership("alice", 0.4)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.user, "alice");
    }
}
