#![forbid(unsafe_code)]

//! **collab-ingress** – webhook ingress, consumer-group worker pool, and
//! supervisor for the collaboration event-processing core.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use collab_broker_core::InMemoryBroker;
use collab_classifier::{Config as ClassifierConfig, LlmGateway};
use collab_notify::{ChatOnlyPreferences, NotificationFanout};
use collab_rules::RuleEngine;
use collab_supervisor::{AggregateHealth, Supervisor, SupervisorConfig};
use collab_workers::{MessageHandler, WorkerType};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod handlers;
mod health;
mod ingress;
mod knowledge;
mod store;

use handlers::{ChangeProcessorHandler, LoggingChannelSender, NotificationHandler, StreamActionExecutor, TaskMonitorHandler};
use knowledge::KnowledgeWriter;
use store::Store;

//─────────────────────────────
//  CLI structure
//─────────────────────────────

#[derive(Parser)]
#[command(name = "collab-ingress")]
#[command(about = "Collaboration event-processing core: webhook ingress and worker pool")]
#[command(version)]
struct Cli {
    /// Storage backend: "memory" or "composite" (sqlite + sled).
    #[arg(long, default_value = "memory")]
    storage: String,

    /// SQLite database path, used when `--storage composite`.
    #[arg(long, default_value = "data/collab.db")]
    sqlite_path: String,

    /// Sled tree path, used when `--storage composite`.
    #[arg(long, default_value = "data/collab.sled")]
    sled_path: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// HTTP server port.
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Worker instances started per enabled worker type.
    #[arg(long, default_value = "1")]
    worker_count: usize,

    /// HMAC secret for webhook signature verification. Signature
    /// verification is skipped entirely when unset.
    #[arg(long, env = "WEBHOOK_SECRET")]
    webhook_secret: Option<String>,
}

//─────────────────────────────
//  Shared application state
//─────────────────────────────

/// Shared state reachable from every HTTP handler.
pub struct AppState {
    pub(crate) store: Store,
    pub(crate) broker: Arc<InMemoryBroker>,
    pub(crate) webhook_secret: Option<String>,
    supervisor: Arc<Supervisor<InMemoryBroker>>,
}

impl AppState {
    pub(crate) fn supervisor_health(&self) -> AggregateHealth {
        self.supervisor.health()
    }
}

//─────────────────────────────
//  Main application
//─────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(&cli.log_level);

    info!("starting collab-ingress v{}", env!("CARGO_PKG_VERSION"));

    let store = match cli.storage.as_str() {
        "memory" => Store::memory(),
        "composite" => Store::open(&cli.sqlite_path, &cli.sled_path).await.context("failed to open composite storage backend")?,
        other => anyhow::bail!("unsupported storage backend: {other}"),
    };

    let broker = Arc::new(InMemoryBroker::new());

    let classifier_config = ClassifierConfig::from_env().context("classifier configuration is required to start (fatal per error-handling policy)")?;
    info!(provider = classifier_config.provider_name(), "classifier gateway configured");
    let gateway = Arc::new(LlmGateway::new(classifier_config).await.context("failed to initialize classifier gateway")?);

    let knowledge = Arc::new(KnowledgeWriter::new(gateway.clone()));

    let change_handler: Arc<dyn MessageHandler> = Arc::new(ChangeProcessorHandler::new(store.clone(), broker.clone(), gateway.clone(), knowledge.clone()));

    let fanout = NotificationFanout::new(store.clone(), ChatOnlyPreferences, LoggingChannelSender);
    let notification_handler: Arc<dyn MessageHandler> = Arc::new(NotificationHandler::new(fanout));

    let executor = StreamActionExecutor::new(broker.clone(), store.clone());
    let rule_engine = RuleEngine::new(store.clone(), executor);
    let task_handler: Arc<dyn MessageHandler> = Arc::new(TaskMonitorHandler::new(store.clone(), rule_engine, broker.clone()));

    let mut handlers: HashMap<WorkerType, Arc<dyn MessageHandler>> = HashMap::new();
    handlers.insert(WorkerType::ChangeProcessor, change_handler);
    handlers.insert(WorkerType::Notification, notification_handler);
    handlers.insert(WorkerType::TaskMonitor, task_handler);

    let supervisor_config = SupervisorConfig { worker_count: cli.worker_count, enabled: vec![WorkerType::ChangeProcessor, WorkerType::Notification, WorkerType::TaskMonitor] };
    let supervisor = Arc::new(Supervisor::build(broker.clone(), supervisor_config, handlers).context("failed to build worker supervisor")?);

    let state = Arc::new(AppState { store, broker, webhook_secret: cli.webhook_secret, supervisor: supervisor.clone() });

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", cli.port)).await.with_context(|| format!("failed to bind to port {}", cli.port))?;
    info!(port = cli.port, "http server listening");

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!(error = %err, "http server exited with error");
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
        }
        result = supervisor.run() => {
            if let Err(err) = result {
                warn!(error = %err, "worker supervisor exited with error");
            }
        }
    }

    supervisor.shutdown();
    info!("collab-ingress stopped");
    Ok(())
}

fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhooks/git", post(ingress::webhook))
        .route("/health", get(health::health))
        .route("/health/detailed", get(health::health_detailed))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).into_inner())
}

fn init_logging(log_level: &str) {
    let filter = format!("collab_ingress={log_level},collab_workers={log_level},collab_supervisor={log_level}");
    tracing_subscriber::registry().with(tracing_subscriber::EnvFilter::new(filter)).with(tracing_subscriber::fmt::layer()).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate()).expect("failed to install signal handler").recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
