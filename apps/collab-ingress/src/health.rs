//! `/health` and `/health/detailed`.

use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use chrono::Utc;
use collab_broker_core::StreamBroker;
use serde::Serialize;
use serde_json::json;

use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<Utc>,
    version: &'static str,
}

/// `GET /health`.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy", timestamp: Utc::now(), version: env!("CARGO_PKG_VERSION") })
}

/// `GET /health/detailed`: adds worker counts and broker reachability.
pub async fn health_detailed(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let aggregate = state.supervisor_health();
    let broker_reachable = state.broker.create_group(collab_types::StreamName::GitEvents, "health-check").await.is_ok();

    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
        "broker_reachable": broker_reachable,
        "workers": aggregate.workers.iter().map(|w| json!({
            "worker_id": w.worker_id,
            "worker_type": format!("{:?}", w.worker_type),
            "started_at": w.started_at,
            "processed": w.processed,
            "errors": w.errors,
        })).collect::<Vec<_>>(),
        "total_processed": aggregate.total_processed(),
        "total_errors": aggregate.total_errors(),
    }))
}
