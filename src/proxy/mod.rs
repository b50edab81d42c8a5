//! Reverse proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Matched route handler (builder.rs ProxyHandler)
//!     → balancer.rs (pick an upstream target)
//!     → rewrite URI, Host and forwarding headers (headers.rs)
//!     → Transport (transport.rs pool, optionally OAuth-decorated)
//!         → tls.rs picks the verifying or non-verifying client
//!     → flush.rs wraps the streamed response body
//! ```
//!
//! # Design Decisions
//! - One shared pool for every route; per-route TLS policy is passed on each
//!   call, so one route opting out of verification cannot affect another
//! - No retries: a failed round trip maps straight to 502/504

pub mod balancer;
pub mod builder;
pub mod flush;
pub mod headers;
pub mod tls;
pub mod transport;

pub use builder::{ProxyBuilder, ProxyHandler};
pub use tls::TlsPolicy;
pub use transport::{PoolSettings, Transport, TransportError, TransportPool};
