//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use axum::Json;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use api_gateway::config::GatewayConfig;
use api_gateway::definitions::{
    AuthRequirement, DefinitionLoader, InMemoryRepository, LoadReport, ProxySettings,
    RouteDefinition,
};
use api_gateway::http::middleware::MemoryStatsSink;
use api_gateway::store::{InMemoryStore, KeyValueStore};
use api_gateway::{Gateway, RouteRegistry, Shutdown};

/// Start a backend that answers every request with a JSON echo of what it
/// received. Returns its address and a request counter.
pub async fn start_echo_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();

    let app = axum::Router::new().fallback(move |request: Request<Body>| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Json(echo(&request))
        }
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });

    (addr, hits)
}

fn echo(request: &Request<Body>) -> Value {
    let headers: &HeaderMap = request.headers();
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
        "query": request.uri().query(),
        "host": header("host"),
        "x_forwarded_for": header("x-forwarded-for"),
        "x_forwarded_host": header("x-forwarded-host"),
        "x_request_id": header("x-request-id"),
        "authorization": header("authorization"),
        "peer": peer,
    })
}

/// Start a simple mock backend that returns a fixed response.
pub async fn start_mock_backend(response: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

pub fn route(id: &str, listen_path: &str, upstream: SocketAddr) -> RouteDefinition {
    RouteDefinition {
        id: id.into(),
        name: String::new(),
        active: true,
        proxy: ProxySettings {
            listen_path: listen_path.into(),
            upstream_targets: vec![format!("http://{}", upstream)],
            strip_listen_path: false,
            preserve_host: false,
            insecure_skip_verify: false,
            methods: Vec::new(),
        },
        auth: AuthRequirement::None,
    }
}

/// A gateway serving on a loopback port, backed by an in-memory repository.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub repository: Arc<InMemoryRepository>,
    pub store: Arc<InMemoryStore>,
    pub stats: Arc<MemoryStatsSink>,
    pub registry: Arc<RouteRegistry>,
    pub loader: Arc<DefinitionLoader>,
    pub shutdown: Shutdown,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Re-read the repository and wait for the result.
    pub async fn reload(&self) -> LoadReport {
        self.loader.load(self.repository.as_ref()).await.unwrap()
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.definitions.dsn = "memory://localhost".into();
    config.definitions.watch = false;
    config.proxy.flush_interval_ms = 0;
    config.proxy.upstream_timeout_secs = 5;
    config
}

/// Serve `repository` on an ephemeral port. Returns once the listener is bound;
/// requests queue until the initial load has completed.
pub async fn spawn_gateway(repository: Arc<InMemoryRepository>) -> TestGateway {
    spawn_gateway_with(test_config(), repository).await
}

pub async fn spawn_gateway_with(
    config: GatewayConfig,
    repository: Arc<InMemoryRepository>,
) -> TestGateway {
    let store = Arc::new(InMemoryStore::new());
    let stats = Arc::new(MemoryStatsSink::default());

    let gateway = Gateway::builder(config)
        .repository(repository.clone())
        .store(store.clone() as Arc<dyn KeyValueStore>)
        .stats(stats.clone())
        .build()
        .unwrap();

    let registry = gateway.registry();
    let loader = gateway.loader();
    let shutdown = Shutdown::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serve_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = gateway.serve(listener, &serve_shutdown).await {
            panic!("gateway failed: {}", e);
        }
    });

    TestGateway {
        addr,
        repository,
        store,
        stats,
        registry,
        loader,
        shutdown,
    }
}

/// HTTP client that ignores proxy environment variables.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Poll `check` until it holds or the deadline passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
