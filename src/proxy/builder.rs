//! Turns validated proxy settings into request handlers.
//!
//! # Responsibilities
//! - Rewrite the inbound URI onto a chosen upstream target
//! - Apply strip-listen-path and preserve-host semantics
//! - Forward through the route's transport with the route's TLS policy
//! - Wrap streamed responses for periodic flushing

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderValue, Request, Uri, Version};
use axum::response::{IntoResponse, Response};

use crate::definitions::{Upstream, ValidProxy};
use crate::http::handler::Handler;
use crate::proxy::balancer::RoundRobin;
use crate::proxy::flush::FlushBody;
use crate::proxy::headers::{append_forwarded, strip_hop_by_hop};
use crate::proxy::tls::TlsPolicy;
use crate::proxy::transport::{Transport, TransportError, TransportPool};
use crate::routing::ListenPath;

/// Builds proxy handlers that share one transport pool.
#[derive(Clone)]
pub struct ProxyBuilder {
    pool: Arc<TransportPool>,
    flush_interval: Duration,
}

impl ProxyBuilder {
    pub fn new(pool: Arc<TransportPool>, flush_interval: Duration) -> Self {
        Self {
            pool,
            flush_interval,
        }
    }

    /// The shared pool, usable directly as a [`Transport`].
    pub fn pool(&self) -> Arc<TransportPool> {
        self.pool.clone()
    }

    /// Build a handler forwarding through the shared pool.
    pub fn build(&self, label: &str, proxy: &ValidProxy) -> ProxyHandler {
        self.build_with_transport(label, proxy, self.pool.clone())
    }

    /// Build a handler forwarding through `transport`, which typically
    /// decorates the shared pool.
    pub fn build_with_transport(
        &self,
        label: &str,
        proxy: &ValidProxy,
        transport: Arc<dyn Transport>,
    ) -> ProxyHandler {
        ProxyHandler {
            label: label.to_string(),
            listen_path: proxy.listen_path.clone(),
            upstreams: proxy.upstreams.clone(),
            balancer: RoundRobin::new(),
            strip_listen_path: proxy.strip_listen_path,
            preserve_host: proxy.preserve_host,
            tls: TlsPolicy::from_skip_verify(proxy.insecure_skip_verify),
            transport,
            flush_interval: self.flush_interval,
        }
    }
}

/// Forwards requests for one route.
pub struct ProxyHandler {
    label: String,
    listen_path: ListenPath,
    upstreams: Vec<Upstream>,
    balancer: RoundRobin,
    strip_listen_path: bool,
    preserve_host: bool,
    tls: TlsPolicy,
    transport: Arc<dyn Transport>,
    flush_interval: Duration,
}

impl ProxyHandler {
    /// Path sent upstream for an inbound path.
    fn forwarded_path<'a>(&self, path: &'a str) -> &'a str {
        if self.strip_listen_path {
            self.listen_path.strip(path).unwrap_or(path)
        } else {
            path
        }
    }

    fn rewrite(
        &self,
        request: Request<Body>,
        upstream: &Upstream,
    ) -> Result<Request<Body>, TransportError> {
        let (mut parts, body) = request.into_parts();

        // HTTP/2 clients carry the host in the request target, not a Host header.
        let inbound_host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });

        let path = join_paths(upstream.base_path(), self.forwarded_path(parts.uri.path()));
        let path_and_query = match parts.uri.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path,
        };
        let authority = upstream.authority();
        parts.uri = Uri::builder()
            .scheme(upstream.scheme())
            .authority(authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let client = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        strip_hop_by_hop(&mut parts.headers);
        append_forwarded(&mut parts.headers, client, inbound_host.as_ref());

        let host = match inbound_host {
            Some(host) if self.preserve_host => host,
            _ => HeaderValue::from_str(&authority)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?,
        };
        parts.headers.insert(header::HOST, host);

        // The upstream pool speaks HTTP/1.1 regardless of the inbound protocol.
        parts.version = Version::HTTP_11;

        Ok(Request::from_parts(parts, body))
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, request: Request<Body>) -> Response {
        let Some(upstream) = self.balancer.pick(&self.upstreams) else {
            return TransportError::InvalidRequest("route has no upstream targets".into())
                .into_response();
        };

        let outbound = match self.rewrite(request, upstream) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::warn!(route = %self.label, error = %e, "Failed to build upstream request");
                return e.into_response();
            }
        };

        tracing::debug!(
            route = %self.label,
            upstream = %outbound.uri(),
            "Forwarding request"
        );

        match self.transport.round_trip(outbound, self.tls).await {
            Ok(response) => {
                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                let body = if self.flush_interval.is_zero() {
                    body
                } else {
                    Body::new(FlushBody::new(body, self.flush_interval))
                };
                Response::from_parts(parts, body)
            }
            Err(TransportError::Auth(e)) => {
                tracing::debug!(route = %self.label, error = %e, "Request rejected by credential check");
                TransportError::Auth(e).into_response()
            }
            Err(e) => {
                tracing::warn!(
                    route = %self.label,
                    upstream = %upstream.url,
                    error = %e,
                    "Upstream request failed"
                );
                e.into_response()
            }
        }
    }
}

/// Join an upstream base path and a request path with exactly one slash.
fn join_paths(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}
