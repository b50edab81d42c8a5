//! Periodic flushing of streamed response bodies.
//!
//! Small upstream chunks are coalesced and released to the client at least
//! once per flush interval, or sooner when the buffer fills up.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::HeaderMap;
use bytes::{Bytes, BytesMut};
use hyper::body::{Body as _, Frame, SizeHint};
use tokio::time::{Interval, MissedTickBehavior};

/// Buffered bytes are released immediately once they reach this size.
const MAX_BUFFERED: usize = 32 * 1024;

pub struct FlushBody {
    inner: Body,
    buffer: BytesMut,
    ticker: Interval,
    trailers: Option<HeaderMap>,
    /// Upstream error held back until the buffered bytes are sent.
    error: Option<axum::Error>,
    done: bool,
}

impl FlushBody {
    /// `interval` must be non-zero.
    pub fn new(inner: Body, interval: Duration) -> Self {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            inner,
            buffer: BytesMut::new(),
            ticker,
            trailers: None,
            error: None,
            done: false,
        }
    }

    fn take_buffer(&mut self) -> Frame<Bytes> {
        Frame::data(self.buffer.split().freeze())
    }
}

impl hyper::body::Body for FlushBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if this.done {
                if !this.buffer.is_empty() {
                    return Poll::Ready(Some(Ok(this.take_buffer())));
                }
                if let Some(e) = this.error.take() {
                    return Poll::Ready(Some(Err(e)));
                }
                return Poll::Ready(this.trailers.take().map(|t| Ok(Frame::trailers(t))));
            }

            match Pin::new(&mut this.inner).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => {
                        if this.buffer.is_empty() {
                            if data.len() >= MAX_BUFFERED {
                                return Poll::Ready(Some(Ok(Frame::data(data))));
                            }
                            // Deadline counts from the first buffered byte.
                            this.ticker.reset();
                        }
                        this.buffer.extend_from_slice(&data);
                        if this.buffer.len() >= MAX_BUFFERED {
                            return Poll::Ready(Some(Ok(this.take_buffer())));
                        }
                    }
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            this.trailers = Some(trailers);
                        }
                        this.done = true;
                    }
                },
                Poll::Ready(Some(Err(e))) => {
                    this.error = Some(e);
                    this.done = true;
                }
                Poll::Ready(None) => this.done = true,
                Poll::Pending => {
                    if !this.buffer.is_empty() && this.ticker.poll_tick(cx).is_ready() {
                        return Poll::Ready(Some(Ok(this.take_buffer())));
                    }
                    return Poll::Pending;
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        if self.done {
            self.buffer.is_empty() && self.trailers.is_none() && self.error.is_none()
        } else {
            self.buffer.is_empty() && self.inner.is_end_stream()
        }
    }

    fn size_hint(&self) -> SizeHint {
        let buffered = self.buffer.len() as u64;
        if self.done {
            return SizeHint::with_exact(buffered);
        }
        let inner = self.inner.size_hint();
        let mut hint = SizeHint::new();
        hint.set_lower(inner.lower() + buffered);
        if let Some(upper) = inner.upper() {
            hint.set_upper(upper + buffered);
        }
        hint
    }
}
