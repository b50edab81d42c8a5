//! OAuth credential enforcement.
//!
//! # Data Flow
//! ```text
//! Protected route handler
//!     → transport.rs OAuthAwareTransport
//!         → bearer token from Authorization header
//!         → validator.rs (local JWT → key-value store → introspection)
//!         → scope check against the server's permitted scopes
//!     → inner Transport (shared pool) only when every check passes
//! ```

pub mod error;
pub mod transport;
pub mod validator;

pub use error::AuthError;
pub use transport::{bearer_token, OAuthAwareTransport};
pub use validator::{cache_key, Grant, TokenValidator};
