//! Request id propagation and the per-request completion log line.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request};
use axum::response::Response;

use crate::http::handler::{Handler, HandlerRef};
use crate::http::middleware::Middleware;
use crate::http::request::{ensure_request_id, X_REQUEST_ID};

pub struct AccessLog;

impl Middleware for AccessLog {
    fn wrap(&self, inner: HandlerRef) -> HandlerRef {
        Arc::new(AccessLogHandler { inner })
    }
}

struct AccessLogHandler {
    inner: HandlerRef,
}

#[async_trait]
impl Handler for AccessLogHandler {
    async fn handle(&self, mut request: Request<Body>) -> Response {
        let request_id = ensure_request_id(request.headers_mut());
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let started_at = Instant::now();

        let mut response = self.inner.handle(request).await;

        let status = response.status();
        let duration_ms = started_at.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::warn!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms,
                "Request completed"
            );
        } else {
            tracing::info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status = status.as_u16(),
                duration_ms,
                "Request completed"
            );
        }

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(X_REQUEST_ID, value);
        }
        response
    }
}
