//! Panic recovery.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;
use futures_util::FutureExt;

use crate::http::handler::{Handler, HandlerRef};
use crate::http::middleware::Middleware;
use crate::http::response::internal_error;

/// Turns a panic in any inner stage into a 500 response.
pub struct Recovery;

impl Middleware for Recovery {
    fn wrap(&self, inner: HandlerRef) -> HandlerRef {
        Arc::new(RecoveryHandler { inner })
    }
}

struct RecoveryHandler {
    inner: HandlerRef,
}

#[async_trait]
impl Handler for RecoveryHandler {
    async fn handle(&self, request: Request<Body>) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        match AssertUnwindSafe(self.inner.handle(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                tracing::error!(
                    method = %method,
                    path = %path,
                    panic = %panic_message(panic.as_ref()),
                    "Recovered from panic while handling request"
                );
                internal_error()
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}
