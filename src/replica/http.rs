//! HTTP API for a replica
//!
//! RPC endpoints called by the coordinator, plus a read-only view of the
//! replica's own log.

use crate::common::protocol::{
    AckReply, ACK_APPENDED, ACK_CONFLICT, ACK_DELETED, ACK_IS_ALIVE, PATH_APPEND, PATH_DELETE,
    PATH_IS_ALIVE,
};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{AppendOutcome, LogEntry, MetricsRegistry, SharedLog};
use axum::{extract::State, http::header, response::IntoResponse, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct ReplicaState {
    pub log: SharedLog,
    /// Wait before acknowledging a write
    pub ack_delay: Duration,
    /// Wakes the reconciler when the coordinator contradicts the local log
    pub sync_trigger: Arc<Notify>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn create_router(state: ReplicaState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route(PATH_APPEND, axum::routing::post(append_msg))
        .route(PATH_DELETE, axum::routing::post(delete_msg))
        .route(PATH_IS_ALIVE, axum::routing::get(is_alive))
        .route("/", axum::routing::get(list_messages))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
}

async fn delay(state: &ReplicaState) {
    if !state.ack_delay.is_zero() {
        tokio::time::sleep(state.ack_delay).await;
    }
}

async fn append_msg(
    State(state): State<ReplicaState>,
    Json(entry): Json<LogEntry>,
) -> Json<AckReply> {
    let ack = match state.log.append(&entry) {
        AppendOutcome::Inserted => {
            tracing::info!(index = entry.index, "Appended");
            ACK_APPENDED
        }
        AppendOutcome::Duplicate => {
            tracing::debug!(index = entry.index, "Duplicate append");
            ACK_APPENDED
        }
        AppendOutcome::Retired => {
            tracing::debug!(index = entry.index, "Append for a deleted index ignored");
            ACK_APPENDED
        }
        AppendOutcome::Conflict { existing } => {
            tracing::warn!(
                index = entry.index,
                existing = %existing,
                incoming = %entry.payload,
                "Index already bound to another payload; requesting sync"
            );
            state.sync_trigger.notify_one();
            ACK_CONFLICT
        }
    };
    delay(&state).await;
    Json(AckReply::new(ack))
}

async fn delete_msg(
    State(state): State<ReplicaState>,
    Json(entry): Json<LogEntry>,
) -> Json<AckReply> {
    match state.log.retire(entry.index) {
        Some(_) => tracing::info!(index = entry.index, "Deleted"),
        None => tracing::debug!(index = entry.index, "Delete for an index not held locally"),
    }
    delay(&state).await;
    Json(AckReply::new(ACK_DELETED))
}

async fn is_alive() -> Json<AckReply> {
    Json(AckReply::new(ACK_IS_ALIVE))
}

async fn list_messages(State(state): State<ReplicaState>) -> impl IntoResponse {
    let entries = state.log.wait_contiguous().await;
    Json(entries.iter().map(|e| e.render()).collect::<Vec<_>>())
}

async fn metrics_endpoint(State(state): State<ReplicaState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn state() -> ReplicaState {
        ReplicaState {
            log: SharedLog::new(),
            ack_delay: Duration::ZERO,
            sync_trigger: Arc::new(Notify::new()),
            metrics: Arc::new(MetricsRegistry::new()),
        }
    }

    async fn call(app: Router, uri: &str, body: serde_json::Value) -> AckReply {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_append_and_duplicate() {
        let state = state();
        let app = create_router(state.clone());
        let entry = json!({"index": 0, "payload": "a"});

        assert_eq!(call(app.clone(), PATH_APPEND, entry.clone()).await.ack, "appended");
        assert_eq!(call(app, PATH_APPEND, entry).await.ack, "appended");
        assert_eq!(state.log.len(), 1);
    }

    #[tokio::test]
    async fn test_conflict_triggers_sync() {
        let state = state();
        state.log.append(&LogEntry::new(0, "mine"));
        let app = create_router(state.clone());

        let reply = call(app, PATH_APPEND, json!({"index": 0, "payload": "theirs"})).await;
        assert_eq!(reply.ack, "conflict");
        assert_eq!(state.log.get(0).as_deref(), Some("mine"));

        // notify_one stores a permit when nobody is waiting
        tokio::time::timeout(Duration::from_secs(1), state.sync_trigger.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete() {
        let state = state();
        state.log.append(&LogEntry::new(0, "a"));
        let app = create_router(state.clone());

        let reply = call(app, PATH_DELETE, json!({"index": 0, "payload": "a"})).await;
        assert_eq!(reply.ack, "deleted");
        assert!(state.log.get(0).is_none());
    }

    #[tokio::test]
    async fn test_is_alive() {
        let app = create_router(state());
        let response = app
            .oneshot(Request::builder().uri(PATH_IS_ALIVE).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], br#"{"ack":"is_alive"}"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_delay() {
        let mut state = state();
        state.ack_delay = Duration::from_millis(800);
        let app = create_router(state);

        let start = tokio::time::Instant::now();
        call(app, PATH_APPEND, json!({"index": 0, "payload": "a"})).await;
        assert!(start.elapsed() >= Duration::from_millis(800));
    }
}
