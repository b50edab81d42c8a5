//! Route and OAuth server definitions.
//!
//! # Data Flow
//! ```text
//! Repository (repository.rs trait; file.rs or in-memory backend)
//!     → loader.rs plan (validate, detect duplicates, resolve OAuth servers)
//!     → loader.rs apply (build handlers, one registry update)
//!
//! Reload triggers:
//!     watcher.rs (directory change) / SIGHUP / manual
//!     → reload.rs (coalesce) → single reload task → loader
//! ```

pub mod file;
pub mod loader;
pub mod reload;
pub mod repository;
pub mod types;
pub mod watcher;

pub use file::FileSystemRepository;
pub use loader::{
    plan, DefinitionLoader, DefinitionPlan, LoadError, LoadReport, RouteSource, SkippedDefinition,
};
pub use reload::{run_reloader, ReloadReason, ReloadTrigger};
pub use repository::{open, DefinitionRepository, InMemoryRepository, RepositoryError};
pub use types::{
    AuthRequirement, DefinitionError, JwtAlgorithm, OAuthServerDefinition, ProxySettings,
    RouteDefinition, TokenValidation, Upstream, ValidProxy,
};
pub use watcher::DefinitionWatcher;
