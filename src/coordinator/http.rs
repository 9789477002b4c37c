//! HTTP API for the coordinator
//!
//! - `GET /` lists stored messages once the log has no gaps
//! - `POST /` appends `{msg, w}`; 200 when accepted, 500 when rejected
//! - `DELETE /:index?w=k` deletes one index with the same quorum rules
//! - `POST /sync` merges a replica's log into the coordinator's view
//! - `GET /health` and `GET /metrics` for operators

use crate::common::protocol::{SyncMessage, PATH_SYNC};
use crate::common::tracing_middleware::request_tracing_middleware;
use crate::common::{Error, MetricsRegistry, SharedLog};
use crate::coordinator::heartbeat::HealthTable;
use crate::coordinator::writer::{quorum_number, WriteCoordinator, WriteReceipt};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Clone)]
pub struct CoordState {
    pub writer: Arc<WriteCoordinator>,
    pub log: SharedLog,
    pub health: HealthTable,
    pub metrics: Arc<MetricsRegistry>,
}

/// Body of `POST /`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteRequest {
    #[serde(default)]
    pub msg: String,
    pub w: Option<i64>,
}

/// Reply to `POST /` and `DELETE /:index`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteResponse {
    fn accepted(receipt: WriteReceipt) -> Self {
        Self {
            status: "accepted".into(),
            index: Some(receipt.index),
            acked: Some(receipt.acked),
            failed: Some(receipt.failed),
            error: None,
        }
    }

    fn rejected(e: &Error) -> Self {
        let (acked, failed) = match e {
            Error::QuorumFailed { acked, failed, .. } => (Some(*acked), Some(*failed)),
            _ => (None, None),
        };
        Self {
            status: "rejected".into(),
            index: None,
            acked,
            failed,
            error: Some(e.to_string()),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == "accepted"
    }
}

fn write_reply(result: crate::Result<WriteReceipt>) -> (StatusCode, Json<WriteResponse>) {
    match result {
        Ok(receipt) => (StatusCode::OK, Json(WriteResponse::accepted(receipt))),
        Err(e) => (e.to_http_status(), Json(WriteResponse::rejected(&e))),
    }
}

pub fn create_router(state: CoordState) -> Router {
    let metrics = state.metrics.clone();
    Router::new()
        .route("/", axum::routing::get(list_messages).post(append_message))
        .route("/:index", axum::routing::delete(delete_message))
        .route(PATH_SYNC, axum::routing::post(sync))
        .route("/health", axum::routing::get(health))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .with_state(state)
        .layer(axum::middleware::from_fn_with_state(
            metrics,
            request_tracing_middleware,
        ))
}

async fn list_messages(State(state): State<CoordState>) -> impl IntoResponse {
    let entries = state.log.wait_contiguous().await;
    Json(entries.iter().map(|e| e.render()).collect::<Vec<_>>())
}

async fn append_message(
    State(state): State<CoordState>,
    Json(req): Json<WriteRequest>,
) -> impl IntoResponse {
    write_reply(state.writer.handle_write(&req.msg, req.w).await)
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    w: Option<i64>,
}

async fn delete_message(
    State(state): State<CoordState>,
    Path(index): Path<u64>,
    Query(query): Query<DeleteQuery>,
) -> impl IntoResponse {
    write_reply(state.writer.handle_delete(index, query.w).await)
}

async fn sync(
    State(state): State<CoordState>,
    Json(req): Json<SyncMessage>,
) -> impl IntoResponse {
    Json(state.writer.serve_sync(req.log))
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let counts = state.health.counts();
    let replicas = state.writer.replicas().len();
    Json(json!({
        "status": "ok",
        "replicas": state.health.snapshot(),
        "alive": counts.alive,
        "dead": counts.dead,
        "quorum_number": quorum_number(replicas),
        "log_entries": state.log.len(),
        "log_contiguous": state.log.is_contiguous(),
        "uptime_secs": state.metrics.uptime_seconds(),
        "version": crate::VERSION,
    }))
}

async fn metrics_endpoint(State(state): State<CoordState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{LogEntry, ReplicaAddress, RetryPolicy};
    use crate::coordinator::transport::tests::{Reply, ScriptedChannel};
    use crate::coordinator::transport::ReplicaTransport;
    use crate::coordinator::writer::AdmissionPolicy;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(channel: Arc<ScriptedChannel>, replicas: Vec<ReplicaAddress>) -> CoordState {
        let metrics = Arc::new(MetricsRegistry::new());
        let log = SharedLog::new();
        let health = HealthTable::new(&replicas);
        let transport = Arc::new(ReplicaTransport::new(
            channel,
            RetryPolicy {
                deadline: Duration::from_millis(300),
                ack_timeout: Duration::from_millis(100),
                backoff_base: Duration::from_millis(10),
                backoff_max: Duration::from_millis(50),
            },
            metrics.clone(),
        ));
        let writer = Arc::new(WriteCoordinator::new(
            log.clone(),
            replicas,
            health.clone(),
            transport,
            AdmissionPolicy {
                enforce_quorum: true,
                suspend_on_replicas_dead: false,
            },
            Duration::from_secs(2),
            Duration::from_millis(10),
            metrics.clone(),
        ));
        CoordState {
            writer,
            log,
            health,
            metrics,
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_then_list() {
        let replicas = vec![
            ReplicaAddress::new("r1", 6001),
            ReplicaAddress::new("r2", 6002),
        ];
        let app = create_router(state(Arc::default(), replicas));

        let response = app
            .clone()
            .oneshot(post("/", json!({"msg": "hello", "w": 3})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["index"], 0);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!(["Message number - 0, message - hello"])
        );
    }

    #[tokio::test]
    async fn test_missing_w_is_client_error() {
        let app = create_router(state(Arc::default(), vec![ReplicaAddress::new("r1", 6001)]));
        let response = app
            .oneshot(post("/", json!({"msg": "hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rejected_write_is_500_with_failures() {
        let replica = ReplicaAddress::new("r1", 6001);
        let channel = Arc::new(ScriptedChannel::default());
        channel.script(&replica, vec![Reply::Refused]);
        let app = create_router(state(channel, vec![replica]));

        let response = app
            .oneshot(post("/", json!({"msg": "hello", "w": 2})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["status"], "rejected");
        assert_eq!(body["failed"], 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_index_is_404() {
        let app = create_router(state(Arc::default(), vec![ReplicaAddress::new("r1", 6001)]));
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/7?w=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_merges() {
        let state = state(Arc::default(), vec![ReplicaAddress::new("r1", 6001)]);
        state.log.append(&LogEntry::new(0, "a"));
        state.log.append(&LogEntry::new(1, "b"));
        let app = create_router(state);

        let response = app
            .oneshot(post(PATH_SYNC, json!({"log": {"1": "x", "2": "c"}})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"log": {"0": "a", "1": "b", "2": "c"}, "retired": []})
        );
    }

    #[tokio::test]
    async fn test_sync_sends_deleted_indices() {
        let state = state(Arc::default(), vec![ReplicaAddress::new("r1", 6001)]);
        for (index, payload) in [(0, "a"), (1, "b"), (2, "c")] {
            state.log.append(&LogEntry::new(index, payload));
        }
        state.log.retire(1);
        let app = create_router(state);

        let response = app
            .oneshot(post(PATH_SYNC, json!({"log": {"1": "b"}})))
            .await
            .unwrap();
        assert_eq!(
            body_json(response).await,
            json!({"log": {"0": "a", "2": "c"}, "retired": [1]})
        );
    }

    #[tokio::test]
    async fn test_request_metrics_keyed_by_route() {
        let state = state(Arc::default(), vec![ReplicaAddress::new("r1", 6001)]);
        let metrics = state.metrics.clone();
        let app = create_router(state);

        for uri in ["/3?w=1", "/4?w=1"] {
            app.clone()
                .oneshot(
                    Request::builder()
                        .method("DELETE")
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
        }

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("quorumlog_endpoint_requests_total{path=\"/:index\"} 2"));
        assert!(!text.contains("path=\"/3\""));
        assert_eq!(metrics.endpoint("/:index").requests_total.get(), 2);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let replicas = vec![
            ReplicaAddress::new("r1", 6001),
            ReplicaAddress::new("r2", 6002),
            ReplicaAddress::new("r3", 6003),
        ];
        let app = create_router(state(Arc::default(), replicas));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["alive"], 3);
        assert_eq!(body["quorum_number"], 2);
        assert_eq!(body["replicas"]["r1:6001"]["health"], "healthy");

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("quorumlog_writes_accepted_total"));
        assert!(text.contains("quorumlog_endpoint_requests_total{path=\"/health\"} 1"));
    }
}
