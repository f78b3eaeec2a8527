#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **collab-supervisor** – starts the configured worker pool, propagates
//! shutdown, and reports aggregate health.
//!
//! The supervisor owns no processing logic of its own: it spawns
//! [`collab_workers::Worker`] instances, `worker_count` per enabled
//! [`WorkerType`], shares one shutdown flag across all of them, and awaits
//! their collective termination.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use collab_broker_core::StreamBroker;
use collab_workers::{install_shutdown_handler, MessageHandler, Worker, WorkerError, WorkerStats, WorkerType};
use futures::future::join_all;
use thiserror::Error;
use tracing::info;

/// How many instances to start per enabled worker type.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Instances started per enabled worker type.
    pub worker_count: usize,
    /// Worker types to start. Types absent from this list are not started
    /// even if a handler is registered for them.
    pub enabled: Vec<WorkerType>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self { worker_count: 1, enabled: vec![WorkerType::ChangeProcessor, WorkerType::Notification, WorkerType::TaskMonitor] }
    }
}

/// Errors raised while running the worker pool.
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// A worker's loop exited with an error.
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
    /// A worker's task panicked or was cancelled.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// `enabled` named a worker type with no registered handler.
    #[error("no handler registered for worker type {0:?}")]
    MissingHandler(WorkerType),
}

/// Aggregate counters across every worker the supervisor started.
#[derive(Debug, Clone)]
pub struct AggregateHealth {
    /// Per-worker stats snapshot, in start order.
    pub workers: Vec<WorkerStats>,
}

impl AggregateHealth {
    /// Total entries processed across all workers.
    pub fn total_processed(&self) -> u64 {
        self.workers.iter().map(|w| w.processed).sum()
    }

    /// Total handler failures across all workers.
    pub fn total_errors(&self) -> u64 {
        self.workers.iter().map(|w| w.errors).sum()
    }
}

/// Starts and supervises a fleet of workers sharing one broker and one
/// shutdown flag.
pub struct Supervisor<B>
where
    B: StreamBroker + 'static,
{
    broker: Arc<B>,
    running: Arc<AtomicBool>,
    workers: Vec<Arc<Worker<B, Arc<dyn MessageHandler>>>>,
}

impl<B> Supervisor<B>
where
    B: StreamBroker + 'static,
{
    /// Build an empty supervisor over `broker`. Call [`Supervisor::spawn_worker_type`]
    /// (or [`Supervisor::build`]) to populate it before [`Supervisor::run`].
    pub fn new(broker: Arc<B>) -> Self {
        Self { broker, running: Arc::new(AtomicBool::new(true)), workers: Vec::new() }
    }

    /// Build a supervisor with `config.worker_count` instances of `worker_type`
    /// per entry in `handlers`, restricted to `config.enabled`.
    pub fn build(broker: Arc<B>, config: SupervisorConfig, handlers: HashMap<WorkerType, Arc<dyn MessageHandler>>) -> Result<Self, SupervisorError> {
        let mut supervisor = Self::new(broker);
        for worker_type in config.enabled {
            let handler = handlers.get(&worker_type).cloned().ok_or(SupervisorError::MissingHandler(worker_type))?;
            supervisor.spawn_worker_type(worker_type, config.worker_count, handler);
        }
        Ok(supervisor)
    }

    /// Register `count` worker instances of `worker_type`, each sharing
    /// `handler` and this supervisor's running flag.
    pub fn spawn_worker_type(&mut self, worker_type: WorkerType, count: usize, handler: Arc<dyn MessageHandler>) {
        for index in 0..count {
            let consumer_name = format!("{:?}-{}", worker_type, index);
            let worker = Arc::new(Worker::new(self.broker.clone(), handler.clone(), worker_type, consumer_name, self.running.clone()));
            self.workers.push(worker);
        }
    }

    /// Snapshot every registered worker's counters.
    pub fn health(&self) -> AggregateHealth {
        AggregateHealth { workers: self.workers.iter().map(|w| w.stats()).collect() }
    }

    /// Clear the shared running flag, causing every worker to exit between
    /// iterations without cancelling in-flight processing.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Install the process-wide SIGINT/SIGTERM handler, start every
    /// registered worker concurrently, and await their collective
    /// termination.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        install_shutdown_handler(self.running.clone());
        info!(workers = self.workers.len(), "supervisor starting worker pool");

        let handles: Vec<_> = self.workers.iter().cloned().map(|worker| tokio::spawn(async move { worker.run().await })).collect();

        for result in join_all(handles).await {
            result??;
        }

        info!("supervisor: all workers stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use collab_broker_core::InMemoryBroker;
    use collab_types::StreamEntry;
    use collab_workers::HandlerOutcome;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingHandler {
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MessageHandler for CountingHandler {
        async fn handle(&self, _entry: &StreamEntry) -> HandlerOutcome {
            self.seen.fetch_add(1, Ordering::Relaxed);
            HandlerOutcome::Processed
        }
    }

    #[tokio::test]
    async fn build_rejects_enabled_type_with_no_handler() {
        let broker = Arc::new(InMemoryBroker::new());
        let config = SupervisorConfig { worker_count: 1, enabled: vec![WorkerType::ChangeProcessor] };
        let result = Supervisor::build(broker, config, HashMap::new());
        assert!(matches!(result, Err(SupervisorError::MissingHandler(WorkerType::ChangeProcessor))));
    }

    #[tokio::test]
    async fn starts_worker_count_instances_per_enabled_type_and_reports_health() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.append(collab_types::StreamName::GitEvents, "push", json!({})).await.unwrap();
        broker.append(collab_types::StreamName::GitEvents, "push", json!({})).await.unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn MessageHandler> = Arc::new(CountingHandler { seen: seen.clone() });

        let mut handlers: HashMap<WorkerType, Arc<dyn MessageHandler>> = HashMap::new();
        handlers.insert(WorkerType::ChangeProcessor, handler);

        let config = SupervisorConfig { worker_count: 2, enabled: vec![WorkerType::ChangeProcessor] };
        let supervisor = Arc::new(Supervisor::build(broker, config, handlers).unwrap());
        assert_eq!(supervisor.workers.len(), 2);

        let runner = supervisor.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(seen.load(Ordering::Relaxed), 2);
        assert_eq!(supervisor.health().total_processed(), 2);

        handle.abort();
    }
}
