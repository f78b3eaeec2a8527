//! Webhook ingress: HMAC verification, RawEvent persistence, and the
//! `git_events` append.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use collab_broker_core::StreamBroker;
use collab_store_core::RawEventRepository;
use collab_types::{RawEvent, StreamName};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::json;
use sha2::Sha256;
use tracing::{error, warn};

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

#[derive(Serialize)]
struct AcceptedResponse {
    status: &'static str,
    event_id: uuid::Uuid,
}

/// `POST /webhooks/git`: verify the signature, persist the RawEvent, append
/// to `git_events`, and return 202 immediately.
pub async fn webhook(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let delivery_id = headers
        .get("X-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let kind = headers.get("X-Event").and_then(|v| v.to_str().ok()).unwrap_or("unknown").to_string();

    if let Some(secret) = &state.webhook_secret {
        let signature = headers.get("X-Signature-256").and_then(|v| v.to_str().ok());
        match signature {
            Some(sig) if verify_signature(secret, &body, sig) => {}
            _ => {
                warn!(delivery_id, "webhook signature verification failed");
                return (StatusCode::FORBIDDEN, Json(json!({"status": "forbidden"}))).into_response();
            }
        }
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(err) => {
            warn!(delivery_id, error = %err, "webhook body was not valid JSON");
            return (StatusCode::BAD_REQUEST, Json(json!({"status": "invalid_json"}))).into_response();
        }
    };

    let repo = payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(|n| n.as_str())
        .unwrap_or("unknown")
        .to_string();
    let sender = payload.get("sender").and_then(|s| s.get("login")).and_then(|l| l.as_str()).unwrap_or("unknown").to_string();
    let action = payload.get("action").and_then(|a| a.as_str()).map(str::to_string);

    let event = RawEvent::new("git", kind.clone(), repo, sender, payload.clone());
    let event_id = event.id;

    if let Err(err) = state.store.insert_event(&event).await {
        error!(delivery_id, error = %err, "failed to persist raw event");
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"status": "storage_error"}))).into_response();
    }

    let stream_payload = json!({
        "event_id": event_id,
        "delivery_id": delivery_id,
        "action": action,
        "data": payload,
    });

    if let Err(err) = state.broker.append(StreamName::GitEvents, &kind, stream_payload).await {
        // The RawEvent is already durable; a later reconciliation pass can
        // replay unappended events found with processed_at still null.
        error!(delivery_id, event_id = %event_id, error = %err, "failed to append to git_events, falling back to persisted-only delivery");
    }

    (StatusCode::ACCEPTED, Json(AcceptedResponse { status: "accepted", event_id })).into_response()
}

fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn matching_signature_verifies() {
        let body = b"{\"hello\":\"world\"}";
        let sig = sign("secret", body);
        assert!(verify_signature("secret", body, &sig));
    }

    #[test]
    fn altered_byte_fails_verification() {
        let body = b"{\"hello\":\"world\"}";
        let sig = sign("secret", body);
        assert!(!verify_signature("secret", b"{\"hello\":\"worle\"}", &sig));
    }

    #[test]
    fn missing_prefix_fails_verification() {
        assert!(!verify_signature("secret", b"payload", "deadbeef"));
    }
}
