//! Per-request statistics.
//!
//! # Responsibilities
//! - Snapshot method and path before inner stages can rewrite them
//! - Time the request until its response body has been fully sent
//! - Report exactly one record per request to the configured sink
//!
//! # Design Decisions
//! - The timing record is owned by a guard that reports from `Drop`, so
//!   completion, client disconnects, and panics all report once and only once
//! - The guard travels with the response body; a streamed response is timed
//!   to its last byte

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use hyper::body::{Body as _, Frame, SizeHint};

use crate::http::handler::{Handler, HandlerRef};
use crate::http::middleware::Middleware;
use crate::http::request::MatchedRoute;

/// One finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Method as received, before any rewriting.
    pub method: Method,
    /// Path as received, before any rewriting.
    pub path: String,
    /// Key of the matched route; `None` when called outside the dispatcher.
    pub route: Option<String>,
    /// `None` when no response was produced.
    pub status: Option<StatusCode>,
    pub success: bool,
    pub duration: Duration,
}

/// Receives request records.
pub trait StatsSink: Send + Sync {
    fn track_request(&self, record: &RequestRecord);
}

/// Sink that keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryStatsSink {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemoryStatsSink {
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records.lock().expect("stats sink lock poisoned").clone()
    }
}

impl StatsSink for MemoryStatsSink {
    fn track_request(&self, record: &RequestRecord) {
        self.records
            .lock()
            .expect("stats sink lock poisoned")
            .push(record.clone());
    }
}

/// Stats middleware stage.
pub struct Stats {
    sink: Arc<dyn StatsSink>,
}

impl Stats {
    pub fn new(sink: Arc<dyn StatsSink>) -> Self {
        Self { sink }
    }
}

impl Middleware for Stats {
    fn wrap(&self, inner: HandlerRef) -> HandlerRef {
        Arc::new(StatsHandler {
            inner,
            sink: self.sink.clone(),
        })
    }
}

struct StatsHandler {
    inner: HandlerRef,
    sink: Arc<dyn StatsSink>,
}

#[async_trait]
impl Handler for StatsHandler {
    async fn handle(&self, request: Request<Body>) -> Response {
        let mut timing = TimingGuard {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            route: request
                .extensions()
                .get::<MatchedRoute>()
                .map(|MatchedRoute(key)| key.clone()),
            status: None,
            started_at: Instant::now(),
            sink: self.sink.clone(),
        };

        let response = self.inner.handle(request).await;
        timing.status = Some(response.status());

        let (parts, body) = response.into_parts();
        Response::from_parts(
            parts,
            Body::new(TimedBody {
                inner: body,
                timing: Some(timing),
            }),
        )
    }
}

/// Reports its record when dropped.
struct TimingGuard {
    method: Method,
    path: String,
    route: Option<String>,
    status: Option<StatusCode>,
    started_at: Instant,
    sink: Arc<dyn StatsSink>,
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let record = RequestRecord {
            method: self.method.clone(),
            path: std::mem::take(&mut self.path),
            route: self.route.take(),
            status: self.status,
            success: self.status.is_some_and(|s| s.as_u16() < 400),
            duration: self.started_at.elapsed(),
        };
        self.sink.track_request(&record);
    }
}

/// Response body that closes the timing record once it ends.
struct TimedBody {
    inner: Body,
    timing: Option<TimingGuard>,
}

impl hyper::body::Body for TimedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.timing.take();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
