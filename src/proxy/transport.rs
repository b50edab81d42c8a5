//! Shared upstream transport.
//!
//! # Responsibilities
//! - Send proxied requests upstream over pooled keep-alive connections
//! - Bound idle connections per host
//! - Periodically close idle connections
//! - Map connection failures and timeouts to typed errors
//!
//! # Design Decisions
//! - Clients are published through `ArcSwap`; eviction swaps in fresh
//!   clients and the old pool closes once its in-flight requests finish
//! - In-flight requests hold their own client handle, so eviction never
//!   interrupts them
//! - Dropping a response body mid-stream discards the connection instead of
//!   returning it to the pool

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::ClientConfig;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::ProxyConfig;
use crate::http::response::error_response;
use crate::oauth::AuthError;
use crate::proxy::tls::{self, TlsPolicy};

type HttpClient = Client<HttpsConnector<HttpConnector>, Body>;

/// Why a round trip did not produce an upstream response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream connection failed: {0}")]
    Connect(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl TransportError {
    pub fn status(&self) -> StatusCode {
        match self {
            TransportError::Connect(_)
            | TransportError::Upstream(_)
            | TransportError::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
            TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            TransportError::Auth(e) => e.status(),
        }
    }
}

impl IntoResponse for TransportError {
    fn into_response(self) -> Response {
        match self {
            TransportError::Auth(e) => e.into_response(),
            TransportError::Timeout(_) => error_response(self.status(), "upstream timed out"),
            _ => error_response(self.status(), "upstream request failed"),
        }
    }
}

/// Sends a request to the upstream named in its URI.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn round_trip(
        &self,
        request: Request<Body>,
        tls: TlsPolicy,
    ) -> Result<Response, TransportError>;
}

/// Tuning for the shared pool.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_idle_per_host: usize,
    /// Idle connections older than this are closed by hyper itself.
    pub idle_timeout: Duration,
    pub connect_timeout: Duration,
    /// Time allowed until response headers arrive.
    pub response_timeout: Duration,
}

impl From<&ProxyConfig> for PoolSettings {
    fn from(config: &ProxyConfig) -> Self {
        let period = config.close_idle_conns_period();
        Self {
            max_idle_per_host: config.max_idle_conns_per_host,
            idle_timeout: if period.is_zero() {
                Duration::from_secs(90)
            } else {
                period
            },
            connect_timeout: config.connect_timeout(),
            response_timeout: config.upstream_timeout(),
        }
    }
}

struct Clients {
    verified: HttpClient,
    insecure: HttpClient,
}

/// The shared, pooled upstream transport.
pub struct TransportPool {
    settings: PoolSettings,
    verified_tls: ClientConfig,
    insecure_tls: ClientConfig,
    clients: ArcSwap<Clients>,
    evictions: AtomicU64,
}

impl TransportPool {
    pub fn new(settings: PoolSettings) -> Result<Self, rustls::Error> {
        let provider = tls::crypto_provider();
        let verified_tls = tls::verified_config(provider.clone())?;
        let insecure_tls = tls::insecure_config(provider)?;

        let clients = Clients {
            verified: build_client(&settings, verified_tls.clone()),
            insecure: build_client(&settings, insecure_tls.clone()),
        };

        tracing::debug!(
            max_idle_per_host = settings.max_idle_per_host,
            idle_timeout = ?settings.idle_timeout,
            "Transport pool created"
        );

        Ok(Self {
            settings,
            verified_tls,
            insecure_tls,
            clients: ArcSwap::from_pointee(clients),
            evictions: AtomicU64::new(0),
        })
    }

    /// Close every idle pooled connection.
    ///
    /// Connections currently serving a request stay open until that request
    /// completes, then close instead of returning to the pool.
    pub fn close_idle_connections(&self) {
        let fresh = Clients {
            verified: build_client(&self.settings, self.verified_tls.clone()),
            insecure: build_client(&self.settings, self.insecure_tls.clone()),
        };
        self.clients.store(Arc::new(fresh));
        let cycle = self.evictions.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(cycle, "Closed idle upstream connections");
    }

    /// Number of eviction cycles run so far.
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Run the idle-connection eviction cycle until shutdown.
    pub async fn run_eviction(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        if period.is_zero() {
            tracing::info!("Idle connection eviction disabled");
            return;
        }

        tracing::info!(period = ?period, "Idle connection eviction starting");
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.close_idle_connections();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Idle connection eviction received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn client(&self, tls: TlsPolicy) -> HttpClient {
        let clients = self.clients.load();
        match tls {
            TlsPolicy::Verify => clients.verified.clone(),
            TlsPolicy::SkipVerify => clients.insecure.clone(),
        }
    }
}

#[async_trait]
impl Transport for TransportPool {
    async fn round_trip(
        &self,
        request: Request<Body>,
        tls: TlsPolicy,
    ) -> Result<Response, TransportError> {
        let client = self.client(tls);
        let timeout = self.settings.response_timeout;

        match tokio::time::timeout(timeout, client.request(request)).await {
            Ok(Ok(response)) => Ok(response.map(Body::new)),
            Ok(Err(e)) if e.is_connect() => Err(TransportError::Connect(describe(&e))),
            Ok(Err(e)) => Err(TransportError::Upstream(describe(&e))),
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}

fn build_client(settings: &PoolSettings, tls: ClientConfig) -> HttpClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_nodelay(true);
    http.set_connect_timeout(Some(settings.connect_timeout));

    let https = HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_timer(TokioTimer::new())
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .pool_idle_timeout(settings.idle_timeout)
        .build(https)
}

/// Flatten an error and its sources into one line.
fn describe(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
