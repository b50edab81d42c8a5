//! The request handler abstraction shared by proxies and middleware.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Request;
use axum::response::Response;

/// Something that turns a request into a response.
///
/// Route handlers and every middleware stage implement this, so stages
/// compose by wrapping one `Arc<dyn Handler>` in another.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, request: Request<Body>) -> Response;
}

/// Shared, type-erased handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Adapter that lets a closure act as a [`Handler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Request<Body>) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn handle(&self, request: Request<Body>) -> Response {
        (self.0)(request).await
    }
}

/// Wrap a closure as a shared handler.
pub fn handler_fn<F, Fut>(f: F) -> HandlerRef
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
