//! Dynamic API gateway library.
//!
//! Routes are loaded from a definition repository, turned into reverse-proxy
//! handlers wrapped in a middleware pipeline, and published through a route
//! registry that can be reloaded while traffic flows.

pub mod config;
pub mod definitions;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod oauth;
pub mod observability;
pub mod proxy;
pub mod routing;
pub mod store;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Gateway, GatewayBuilder, Shutdown, StartupError};
pub use routing::RouteRegistry;
