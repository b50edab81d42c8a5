//! Middleware pipeline wrapped around every route handler.
//!
//! # Data Flow
//! ```text
//! Request
//!     → recovery.rs (panic → 500)
//!     → stats.rs (timing record, reported exactly once)
//!     → access_log.rs (request id, completion log line)
//!     → route handler (proxy)
//! ```
//!
//! # Design Decisions
//! - Stages are applied in the order given; the first stage is outermost
//! - Recovery is outermost so panics anywhere below it still produce a
//!   response and still close the timing record

pub mod access_log;
pub mod recovery;
pub mod stats;

use std::sync::Arc;

use crate::http::handler::HandlerRef;

pub use access_log::AccessLog;
pub use recovery::Recovery;
pub use stats::{MemoryStatsSink, RequestRecord, Stats, StatsSink};

/// One stage of the pipeline.
pub trait Middleware: Send + Sync {
    /// Wrap `inner` so this stage runs before and after it.
    fn wrap(&self, inner: HandlerRef) -> HandlerRef;
}

/// Ordered list of middleware stages.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The gateway's standard stack: recovery, stats, access log.
    pub fn standard(stats: Arc<dyn StatsSink>) -> Self {
        Self::new()
            .with(Recovery)
            .with(Stats::new(stats))
            .with(AccessLog)
    }

    /// Append a stage; it runs inside every stage added before it.
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Compose the stages around `handler`.
    pub fn wrap(&self, handler: HandlerRef) -> HandlerRef {
        self.stages
            .iter()
            .rev()
            .fold(handler, |inner, stage| stage.wrap(inner))
    }
}
