//! Per-route certificate policy against an HTTPS upstream.

mod common;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::Router;
use reqwest::StatusCode;

use api_gateway::definitions::InMemoryRepository;
use api_gateway::net::tls::load_tls_config;
use common::{client, route, spawn_gateway};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// HTTPS backend presenting a self-signed certificate for 127.0.0.1.
async fn start_tls_backend() -> (SocketAddr, Arc<AtomicUsize>) {
    let config = load_tls_config(&fixture("upstream.crt"), &fixture("upstream.key"))
        .await
        .unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = Router::new().fallback(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            "secure hello"
        }
    });

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum_server::from_tcp_rustls(listener, config)
            .serve(app.into_make_service())
            .await;
    });

    (addr, hits)
}

#[tokio::test]
async fn skip_verify_applies_only_to_its_route() {
    let (backend, hits) = start_tls_backend().await;

    let mut trusting = route("trusting", "/trusting", backend);
    trusting.proxy.upstream_targets = vec![format!("https://{}", backend)];
    trusting.proxy.insecure_skip_verify = true;
    let mut strict = route("strict", "/strict", backend);
    strict.proxy.upstream_targets = vec![format!("https://{}", backend)];

    let repository = Arc::new(InMemoryRepository::new());
    repository.upsert_route(trusting);
    repository.upsert_route(strict);
    let gateway = spawn_gateway(repository).await;

    let res = client().get(gateway.url("/trusting")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "secure hello");

    let res = client().get(gateway.url("/strict")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);

    // Both routes share one pool; the trusting route still works afterwards.
    let res = client().get(gateway.url("/trusting")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
