//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, via axum-server)
//!     → Hand off to HTTP layer
//! ```

pub mod tls;
