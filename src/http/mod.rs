//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, tracing and timeout layers)
//!     → routing registry dispatch
//!     → middleware/ (recovery → stats → access log)
//!     → handler.rs route handler (proxy)
//!     → response.rs (gateway-generated errors)
//! ```

pub mod handler;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use handler::{handler_fn, Handler, HandlerRef};
pub use request::{MatchedRoute, X_REQUEST_ID};
pub use server::HttpServer;
