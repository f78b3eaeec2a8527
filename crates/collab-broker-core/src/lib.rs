#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-broker-core** – Durable stream broker abstraction.
//!
//! Models a Redis-Streams-shaped capability: named streams, append-only
//! logs, consumer groups with per-consumer pending lists, acknowledge, and
//! claim-idle re-delivery. [`InMemoryBroker`] is the reference
//! implementation used in tests and single-process deployments; a
//! production deployment would swap in a client backed by an actual durable
//! log without changing callers, since everything is expressed against the
//! [`StreamBroker`] trait.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_types::{StreamEntry, StreamName};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio::time::sleep;

/// Errors produced by a [`StreamBroker`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The payload exceeded the broker's configured size limit.
    #[error("payload rejected: {0}")]
    PayloadRejected(String),
    /// `group` has not been created on `stream` yet.
    #[error("consumer group '{group}' not found on stream '{stream}'")]
    GroupNotFound {
        /// Stream the caller attempted to operate on.
        stream: String,
        /// Missing consumer-group name.
        group: String,
    },
    /// The referenced message id is not present in the group's pending list.
    #[error("message '{0}' is not pending")]
    MessageNotPending(String),
}

/// Capability wrapping a durable log: append, consumer-group reads,
/// acknowledge, and claim-idle. See module docs for the delivery model.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Append an entry to `stream`, returning its assigned message id.
    async fn append(&self, stream: StreamName, event_type: &str, payload: serde_json::Value) -> Result<String, BrokerError>;

    /// Idempotently create `group` on `stream`. A freshly created group's
    /// cursor starts at the stream tail, so pre-existing entries are never
    /// replayed to a newly provisioned consumer.
    async fn create_group(&self, stream: StreamName, group: &str) -> Result<(), BrokerError>;

    /// Read up to `count` new entries for `group`, assigning them to
    /// `consumer`'s pending list. Blocks up to `block` when the stream has
    /// no new entries, then returns an empty vec.
    async fn read(&self, stream: StreamName, group: &str, consumer: &str, count: usize, block: Duration) -> Result<Vec<StreamEntry>, BrokerError>;

    /// Acknowledge `message_id`, removing it from `group`'s pending list.
    async fn ack(&self, stream: StreamName, group: &str, message_id: &str) -> Result<(), BrokerError>;

    /// Reassign up to `count` entries that have been pending for at least
    /// `min_idle` to `consumer`, resetting their idle clock.
    async fn claim_idle(&self, stream: StreamName, group: &str, consumer: &str, min_idle: Duration, count: usize) -> Result<Vec<StreamEntry>, BrokerError>;
}

struct PendingEntry {
    entry: StreamEntry,
    consumer: String,
    delivered_at: DateTime<Utc>,
}

struct ConsumerGroup {
    next_offset: usize,
    pending: HashMap<String, PendingEntry>,
}

#[derive(Default)]
struct StreamLog {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, ConsumerGroup>,
    seq: u64,
}

/// In-memory [`StreamBroker`] implementation. Suitable for tests and
/// single-process deployments; durability across restarts is intentionally
/// out of scope here (see [`collab-store-sled`](../collab_store_sled) for a
/// persisted header/payload store used alongside it).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    streams: Arc<DashMap<&'static str, Arc<RwLock<StreamLog>>>>,
}

impl InMemoryBroker {
    /// Construct an empty broker with no streams or groups provisioned.
    pub fn new() -> Self {
        Self::default()
    }

    fn log_for(&self, stream: StreamName) -> Arc<RwLock<StreamLog>> {
        self.streams
            .entry(stream.as_str())
            .or_insert_with(|| Arc::new(RwLock::new(StreamLog::default())))
            .clone()
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn append(&self, stream: StreamName, event_type: &str, payload: serde_json::Value) -> Result<String, BrokerError> {
        StreamEntry::validate_payload_size(&payload).map_err(BrokerError::PayloadRejected)?;

        let log = self.log_for(stream);
        let mut log = log.write().await;
        log.seq += 1;
        let message_id = format!("{}-{}", Utc::now().timestamp_millis(), log.seq);
        log.entries.push(StreamEntry {
            message_id: message_id.clone(),
            stream,
            event_type: event_type.to_string(),
            payload,
            producer_timestamp: Utc::now(),
        });
        Ok(message_id)
    }

    async fn create_group(&self, stream: StreamName, group: &str) -> Result<(), BrokerError> {
        let log = self.log_for(stream);
        let mut log = log.write().await;
        let tail = log.entries.len();
        log.groups.entry(group.to_string()).or_insert_with(|| ConsumerGroup {
            next_offset: tail,
            pending: HashMap::new(),
        });
        Ok(())
    }

    async fn read(&self, stream: StreamName, group: &str, consumer: &str, count: usize, block: Duration) -> Result<Vec<StreamEntry>, BrokerError> {
        let log = self.log_for(stream);

        let deadline = tokio::time::Instant::now() + block;
        loop {
            {
                let mut log = log.write().await;
                let total_len = log.entries.len();
                let delivered = {
                    let group_state = log.groups.get(group).ok_or_else(|| BrokerError::GroupNotFound {
                        stream: stream.as_str().to_string(),
                        group: group.to_string(),
                    })?;
                    group_state.next_offset
                };

                if delivered < total_len {
                    let take = (total_len - delivered).min(count.max(1));
                    let slice: Vec<StreamEntry> = log.entries[delivered..delivered + take].to_vec();
                    let now = Utc::now();
                    let group_state = log.groups.get_mut(group).expect("checked above");
                    group_state.next_offset = delivered + take;
                    for entry in &slice {
                        group_state.pending.insert(
                            entry.message_id.clone(),
                            PendingEntry {
                                entry: entry.clone(),
                                consumer: consumer.to_string(),
                                delivered_at: now,
                            },
                        );
                    }
                    return Ok(slice);
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            sleep(Duration::from_millis(20).min(block)).await;
        }
    }

    async fn ack(&self, stream: StreamName, group: &str, message_id: &str) -> Result<(), BrokerError> {
        let log = self.log_for(stream);
        let mut log = log.write().await;
        let group_state = log.groups.get_mut(group).ok_or_else(|| BrokerError::GroupNotFound {
            stream: stream.as_str().to_string(),
            group: group.to_string(),
        })?;
        group_state
            .pending
            .remove(message_id)
            .map(|_| ())
            .ok_or_else(|| BrokerError::MessageNotPending(message_id.to_string()))
    }

    async fn claim_idle(&self, stream: StreamName, group: &str, consumer: &str, min_idle: Duration, count: usize) -> Result<Vec<StreamEntry>, BrokerError> {
        let log = self.log_for(stream);
        let mut log = log.write().await;
        let group_state = log.groups.get_mut(group).ok_or_else(|| BrokerError::GroupNotFound {
            stream: stream.as_str().to_string(),
            group: group.to_string(),
        })?;

        let now = Utc::now();
        let min_idle = chrono::Duration::from_std(min_idle).unwrap_or_else(|_| chrono::Duration::zero());

        let mut claimed = Vec::new();
        for pending in group_state.pending.values_mut() {
            if claimed.len() >= count {
                break;
            }
            if now - pending.delivered_at >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                claimed.push(pending.entry.clone());
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn append_then_read_delivers_in_order() {
        let broker = InMemoryBroker::new();
        broker.create_group(StreamName::GitEvents, "change-processor").await.unwrap();

        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();
        broker.append(StreamName::GitEvents, "push", json!({"n": 2})).await.unwrap();

        let entries = broker
            .read(StreamName::GitEvents, "change-processor", "worker-1", 10, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].payload["n"], 1);
        assert_eq!(entries[1].payload["n"], 2);
    }

    #[tokio::test]
    async fn group_created_after_append_does_not_replay_history() {
        let broker = InMemoryBroker::new();
        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();

        broker.create_group(StreamName::GitEvents, "late-group").await.unwrap();
        let entries = broker
            .read(StreamName::GitEvents, "late-group", "worker-1", 10, Duration::from_millis(20))
            .await
            .unwrap();

        assert!(entries.is_empty(), "a group created after the append must start at the tail");
    }

    #[tokio::test]
    async fn create_group_is_idempotent() {
        let broker = InMemoryBroker::new();
        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();
        broker.create_group(StreamName::GitEvents, "g").await.unwrap();

        let first_read = broker.read(StreamName::GitEvents, "g", "c1", 10, Duration::from_millis(20)).await.unwrap();
        assert!(first_read.is_empty());

        // Re-creating the group must not reset its cursor back to the tail-at-creation-time
        // (which in this case is already past the one entry) nor error.
        broker.create_group(StreamName::GitEvents, "g").await.unwrap();
        let second_read = broker.read(StreamName::GitEvents, "g", "c1", 10, Duration::from_millis(20)).await.unwrap();
        assert!(second_read.is_empty());
    }

    #[tokio::test]
    async fn unacked_message_is_claimable_after_idle_threshold() {
        let broker = InMemoryBroker::new();
        broker.create_group(StreamName::GitEvents, "g").await.unwrap();
        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();

        let delivered = broker.read(StreamName::GitEvents, "g", "worker-a", 10, Duration::from_millis(20)).await.unwrap();
        assert_eq!(delivered.len(), 1);

        // Not yet idle long enough: nothing claimable.
        let too_soon = broker.claim_idle(StreamName::GitEvents, "g", "worker-b", Duration::from_secs(60), 5).await.unwrap();
        assert!(too_soon.is_empty());

        let claimed = broker.claim_idle(StreamName::GitEvents, "g", "worker-b", Duration::from_millis(0), 5).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].message_id, delivered[0].message_id);

        broker.ack(StreamName::GitEvents, "g", &claimed[0].message_id).await.unwrap();
        let re_claimed = broker.claim_idle(StreamName::GitEvents, "g", "worker-c", Duration::from_millis(0), 5).await.unwrap();
        assert!(re_claimed.is_empty(), "an acked message must not be claimable again");
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let broker = InMemoryBroker::new();
        let huge = json!({"blob": "x".repeat(collab_types::MAX_STREAM_PAYLOAD_BYTES + 1)});
        let result = broker.append(StreamName::GitEvents, "push", huge).await;
        assert!(matches!(result, Err(BrokerError::PayloadRejected(_))));
    }
}
