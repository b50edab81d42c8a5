//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → registry.rs (load current route table, lock-free)
//!     → matcher.rs (evaluate listen-path patterns)
//!     → Return: matched route, method-not-allowed, or not-found
//!
//! Route changes (on every definition load):
//!     Definition Loader
//!     → registry.rs update (copy table, edit, reindex)
//!     → single atomic swap of the published table
//! ```
//!
//! # Design Decisions
//! - Readers never lock; writers are serialized and publish whole tables
//! - Deterministic: most specific pattern wins, static over parameter
//! - Explicit NotFound rather than silent default

pub mod matcher;
pub mod registry;

use std::fmt;

use axum::http::Method;

pub use matcher::{ListenPath, PatternError};
pub use registry::{Dispatch, RegisteredRoute, RouteRegistry, RouteTable};

/// The methods a route answers to. Empty means every method.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodSet(Vec<Method>);

impl MethodSet {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn allows(&self, method: &Method) -> bool {
        self.0.is_empty() || self.0.contains(method)
    }

    pub fn is_any(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Method> for MethodSet {
    fn from_iter<I: IntoIterator<Item = Method>>(iter: I) -> Self {
        let mut methods: Vec<Method> = Vec::new();
        for method in iter {
            if !methods.contains(&method) {
                methods.push(method);
            }
        }
        Self(methods)
    }
}

impl fmt::Display for MethodSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("ANY");
        }
        for (i, method) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(method.as_str())?;
        }
        Ok(())
    }
}
