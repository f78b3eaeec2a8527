#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-workers** – consumer-group worker pool.
//!
//! Each [`WorkerType`] drains one stream under its own consumer group: claim
//! stale pending entries first, then read fresh ones, handing each to a
//! caller-supplied [`MessageHandler`]. A worker keeps looping until its
//! shared running flag clears, which happens once per process via
//! [`install_shutdown_handler`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use collab_broker_core::StreamBroker;
use collab_types::{StreamEntry, StreamName};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Maximum number of previously-delivered-but-unacked entries reclaimed per iteration.
pub const CLAIM_IDLE_COUNT: usize = 5;
/// An entry is eligible for reclaim once it has been pending at least this long.
pub const CLAIM_IDLE_THRESHOLD: Duration = Duration::from_millis(60_000);
/// Maximum number of new entries read per iteration.
pub const READ_COUNT: usize = 10;
/// How long a read blocks waiting for new entries before returning empty.
pub const READ_BLOCK: Duration = Duration::from_millis(5_000);

/// The three worker roles draining the core's streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerType {
    /// Processes git/webhook activity: classification, impact analysis, ownership updates.
    ChangeProcessor,
    /// Drains outbound notification requests for delivery.
    Notification,
    /// Watches task lifecycle events for automation triggers.
    TaskMonitor,
}

impl WorkerType {
    /// The stream this worker type drains.
    pub fn stream(&self) -> StreamName {
        match self {
            WorkerType::ChangeProcessor => StreamName::GitEvents,
            WorkerType::Notification => StreamName::Notifications,
            WorkerType::TaskMonitor => StreamName::TaskEvents,
        }
    }

    /// The consumer group name this worker type reads under.
    pub fn group(&self) -> &'static str {
        match self {
            WorkerType::ChangeProcessor => "change-processor",
            WorkerType::Notification => "notification",
            WorkerType::TaskMonitor => "task-monitor",
        }
    }
}

/// Outcome of handling a single entry. Only [`HandlerOutcome::Processed`] and
/// [`HandlerOutcome::Rejected`] ack: a transient I/O failure must leave the
/// entry unacked so a later `claim_idle` redelivers it, while a poison-pill
/// message (malformed payload, permanently unsatisfiable action) is acked so
/// it cannot wedge its consumer group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processing succeeded.
    Processed,
    /// Processing failed transiently (broker/storage/LLM/chat I/O); do not
    /// ack, so the entry becomes claimable again.
    Retry,
    /// Processing failed terminally on this entry's own content (validation,
    /// malformed payload, unknown action); ack so the message isn't retried forever.
    Rejected,
}

/// Domain-specific processing of one stream entry.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process a single entry claimed or read by a worker.
    async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome;
}

#[async_trait]
impl<T: MessageHandler + ?Sized> MessageHandler for Arc<T> {
    async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome {
        (**self).handle(entry).await
    }
}

/// Errors surfaced by the worker loop itself (not by message handling).
#[derive(Error, Debug)]
pub enum WorkerError {
    /// The broker failed to service a read, claim, or ack call.
    #[error("broker error: {0}")]
    Broker(#[from] collab_broker_core::BrokerError),
}

/// Point-in-time counters for one worker, used for aggregate health reporting.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStats {
    /// Stable identity assigned at construction.
    pub worker_id: Uuid,
    /// Worker role.
    pub worker_type: WorkerType,
    /// When the worker was constructed.
    pub started_at: DateTime<Utc>,
    /// Entries that reached a handler, successfully or not.
    pub processed: u64,
    /// Entries whose handler returned [`HandlerOutcome::Retry`] or [`HandlerOutcome::Rejected`].
    pub errors: u64,
}

/// Drains one stream under one consumer group until told to stop.
pub struct Worker<B, H>
where
    B: StreamBroker,
    H: MessageHandler,
{
    broker: Arc<B>,
    handler: H,
    worker_id: Uuid,
    worker_type: WorkerType,
    consumer_name: String,
    started_at: DateTime<Utc>,
    processed: AtomicU64,
    errors: AtomicU64,
    running: Arc<AtomicBool>,
}

impl<B, H> Worker<B, H>
where
    B: StreamBroker,
    H: MessageHandler,
{
    /// Build a worker for `worker_type`, identified on its stream as `consumer_name`.
    pub fn new(broker: Arc<B>, handler: H, worker_type: WorkerType, consumer_name: impl Into<String>, running: Arc<AtomicBool>) -> Self {
        Self {
            broker,
            handler,
            worker_id: Uuid::new_v4(),
            worker_type,
            consumer_name: consumer_name.into(),
            started_at: Utc::now(),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            running,
        }
    }

    /// Snapshot this worker's identity and counters.
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            worker_id: self.worker_id,
            worker_type: self.worker_type,
            started_at: self.started_at,
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    /// Provision the worker's consumer group, idempotently.
    pub async fn ensure_group(&self) -> Result<(), WorkerError> {
        self.broker.create_group(self.worker_type.stream(), self.worker_type.group()).await?;
        Ok(())
    }

    /// Run the claim/read/process loop until the shared running flag clears.
    pub async fn run(&self) -> Result<(), WorkerError> {
        self.ensure_group().await?;

        while self.running.load(Ordering::Relaxed) {
            self.tick().await?;
        }

        info!(worker_type = ?self.worker_type, consumer = %self.consumer_name, "worker stopped");
        Ok(())
    }

    /// Execute a single claim/read/process iteration, returning how many
    /// entries were handed to the handler.
    pub async fn tick(&self) -> Result<usize, WorkerError> {
        let stream = self.worker_type.stream();
        let group = self.worker_type.group();

        let mut entries = self
            .broker
            .claim_idle(stream, group, &self.consumer_name, CLAIM_IDLE_THRESHOLD, CLAIM_IDLE_COUNT)
            .await?;

        let fresh = self.broker.read(stream, group, &self.consumer_name, READ_COUNT, READ_BLOCK).await?;
        entries.extend(fresh);

        let processed = entries.len();
        for entry in &entries {
            self.processed.fetch_add(1, Ordering::Relaxed);
            let outcome = self.handler.handle(entry).await;
            let should_ack = match outcome {
                HandlerOutcome::Processed => {
                    debug!(message_id = %entry.message_id, "entry processed");
                    true
                }
                HandlerOutcome::Retry => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(message_id = %entry.message_id, event_type = %entry.event_type, "entry processing failed transiently, leaving unacked for redelivery");
                    false
                }
                HandlerOutcome::Rejected => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(message_id = %entry.message_id, event_type = %entry.event_type, "entry rejected, acking to avoid blocking the stream");
                    true
                }
            };

            if should_ack {
                if let Err(err) = self.broker.ack(stream, group, &entry.message_id).await {
                    error!(message_id = %entry.message_id, error = %err, "failed to ack entry");
                }
            }
        }

        Ok(processed)
    }
}

/// Installs SIGINT/SIGTERM handlers that flip `running` to `false`. Returns
/// immediately; the handler runs in a spawned task for the life of the process.
pub fn install_shutdown_handler(running: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    return;
                }
            };

            tokio::select! {
                _ = ctrl_c => info!("received SIGINT, shutting down"),
                _ = terminate.recv() => info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received ctrl-c, shutting down");
        }

        running.store(false, Ordering::Relaxed);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_broker_core::InMemoryBroker;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, entry: &StreamEntry) -> HandlerOutcome {
            self.seen.lock().unwrap().push(entry.message_id.clone());
            HandlerOutcome::Processed
        }
    }

    struct RetryingHandler;

    #[async_trait]
    impl MessageHandler for RetryingHandler {
        async fn handle(&self, _entry: &StreamEntry) -> HandlerOutcome {
            HandlerOutcome::Retry
        }
    }

    #[tokio::test]
    async fn retry_outcome_leaves_the_entry_unacked_for_redelivery() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();

        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(broker.clone(), RetryingHandler, WorkerType::ChangeProcessor, "worker-1", running);

        let processed = worker.tick().await.unwrap();
        assert_eq!(processed, 1);
        assert_eq!(worker.stats().errors, 1);

        // nothing was acked, so a claim-idle (with zero threshold) reclaims it immediately.
        let reclaimed = broker
            .claim_idle(StreamName::GitEvents, WorkerType::ChangeProcessor.group(), "worker-2", StdDuration::from_millis(0), 10)
            .await
            .unwrap();
        assert_eq!(reclaimed.len(), 1);
    }

    #[tokio::test]
    async fn tick_drains_new_entries_and_acks_them() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.append(StreamName::GitEvents, "push", json!({"n": 1})).await.unwrap();
        broker.append(StreamName::GitEvents, "push", json!({"n": 2})).await.unwrap();

        let handler = RecordingHandler { seen: Mutex::new(Vec::new()) };
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(broker.clone(), handler, WorkerType::ChangeProcessor, "worker-1", running);

        let processed = worker.tick().await.unwrap();
        assert_eq!(processed, 2);
        assert_eq!(worker.handler.seen.lock().unwrap().len(), 2);

        // a second tick sees nothing: everything was acked, nothing new arrived.
        let second = worker.tick().await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn run_exits_once_the_running_flag_clears() {
        let broker = Arc::new(InMemoryBroker::new());
        let handler = RecordingHandler { seen: Mutex::new(Vec::new()) };
        let running = Arc::new(AtomicBool::new(true));
        let worker = Arc::new(Worker::new(broker, handler, WorkerType::TaskMonitor, "worker-1", running.clone()));

        let worker_clone = worker.clone();
        let handle = tokio::spawn(async move { worker_clone.run().await });

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        running.store(false, Ordering::Relaxed);

        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stale_entries_are_reclaimed_by_a_later_tick() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.create_group(StreamName::Notifications, WorkerType::Notification.group()).await.unwrap();
        broker.append(StreamName::Notifications, "notify", json!({"id": 1})).await.unwrap();

        // first consumer reads but never acks (simulating a crash)
        broker
            .read(StreamName::Notifications, WorkerType::Notification.group(), "dead-consumer", 10, StdDuration::from_millis(10))
            .await
            .unwrap();

        let handler = RecordingHandler { seen: Mutex::new(Vec::new()) };
        let running = Arc::new(AtomicBool::new(true));
        let worker = Worker::new(broker, handler, WorkerType::Notification, "worker-2", running);

        // with the production threshold this entry isn't idle long enough yet
        let processed = worker.tick().await.unwrap();
        assert_eq!(processed, 0);
    }
}
