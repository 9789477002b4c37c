//! Request tracing middleware
//!
//! Tags every request with an `X-Request-ID` (propagated if the caller sent
//! one), logs start and completion with structured fields, and records the
//! request in the server's metrics registry.

use crate::common::MetricsRegistry;
use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Metrics label for requests no route matched
pub const UNMATCHED_ROUTE: &str = "unmatched";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn request_tracing_middleware(
    State(metrics): State<Arc<MetricsRegistry>>,
    request: Request<Body>,
    next: Next,
) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    // route template, so metrics stay bounded however many paths clients send
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    async move {
        debug!("Request started");

        let mut response = next.run(request).await;

        let duration = start.elapsed();
        let status = response.status();
        metrics.record_request(&route, duration, !status.is_server_error());

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }

        if status.is_success() {
            info!(
                status = %status.as_u16(),
                duration_ms = %duration.as_millis(),
                "Request completed"
            );
        } else if status.is_client_error() {
            warn!(
                status = %status.as_u16(),
                duration_ms = %duration.as_millis(),
                "Client error"
            );
        } else {
            warn!(
                status = %status.as_u16(),
                duration_ms = %duration.as_millis(),
                "Server error"
            );
        }

        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn test_generate_request_id() {
        let id1 = generate_request_id();
        let id2 = generate_request_id();
        assert!(Uuid::parse_str(&id1).is_ok());
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_middleware_tags_and_records() {
        let metrics = Arc::new(MetricsRegistry::new());
        let app = Router::new()
            .route("/ping", get(|| async { "pong" }))
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                request_tracing_middleware,
            ));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");
        assert_eq!(metrics.endpoint("/ping").requests_total.get(), 1);
    }

    #[tokio::test]
    async fn test_metrics_use_route_template() {
        let metrics = Arc::new(MetricsRegistry::new());
        let app = Router::new()
            .route("/items/:id", get(|| async { "item" }))
            .layer(axum::middleware::from_fn_with_state(
                metrics.clone(),
                request_tracing_middleware,
            ));

        for uri in ["/items/1", "/items/2", "/items/3"] {
            app.clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
        }

        assert_eq!(metrics.endpoint("/items/:id").requests_total.get(), 3);
        let text = metrics.to_prometheus();
        assert!(!text.contains("/items/1"));
    }
}
