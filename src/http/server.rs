//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single dispatching fallback
//! - Wire up request-level layers (tracing, request timeout)
//! - Bind to a plain TCP listener or serve TLS
//! - Stop accepting and drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::request::MatchedRoute;
use crate::http::response::{method_not_allowed, not_found};
use crate::routing::{Dispatch, RouteRegistry};

/// How long in-flight requests may finish after shutdown on TLS listeners.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state injected into the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RouteRegistry>,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(registry: Arc<RouteRegistry>, request_timeout: Duration) -> Self {
        let router = Self::build_router(AppState { registry }, request_timeout);
        Self { router }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState, request_timeout: Duration) -> Router {
        Router::new()
            .fallback(dispatch)
            .with_state(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plain HTTP until shutdown.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server received shutdown signal, draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS until shutdown.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server received shutdown signal, draining");
            drain.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Route every request through the live registry.
async fn dispatch(State(state): State<AppState>, mut request: Request<Body>) -> Response {
    match state.registry.dispatch(request.method(), request.uri().path()) {
        Dispatch::Found(route) => {
            request
                .extensions_mut()
                .insert(MatchedRoute(route.pattern.key().to_string()));
            route.handler.handle(request).await
        }
        Dispatch::MethodNotAllowed => {
            tracing::debug!(
                method = %request.method(),
                path = %request.uri().path(),
                "Method not allowed"
            );
            method_not_allowed()
        }
        Dispatch::NotFound => {
            tracing::debug!(path = %request.uri().path(), "No route matched");
            not_found()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::handler::handler_fn;
    use crate::routing::{ListenPath, MethodSet};
    use axum::http::{Method, StatusCode};
    use axum::response::IntoResponse;
    use tower::ServiceExt;

    fn server() -> (Arc<RouteRegistry>, HttpServer) {
        let registry = Arc::new(RouteRegistry::new());
        let server = HttpServer::new(registry.clone(), Duration::from_secs(5));
        (registry, server)
    }

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let (registry, server) = server();
        registry.register(
            ListenPath::parse("/hello").unwrap(),
            [Method::GET].into_iter().collect(),
            handler_fn(|_req| async { "hi".into_response() }),
        );

        let response = server
            .router()
            .oneshot(Request::get("/hello/world").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = server
            .router()
            .oneshot(Request::post("/hello").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unmatched_paths_are_404() {
        let (registry, server) = server();
        registry.register(
            ListenPath::parse("/a").unwrap(),
            MethodSet::any(),
            handler_fn(|_req| async { "a".into_response() }),
        );

        let response = server
            .router()
            .oneshot(Request::get("/ab").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
