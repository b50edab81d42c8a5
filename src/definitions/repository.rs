//! Read access to persisted definitions.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::definitions::file::FileSystemRepository;
use crate::definitions::types::{OAuthServerDefinition, RouteDefinition};

/// Errors that make a whole repository read fail.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("invalid repository DSN: {0}")]
    InvalidDsn(String),

    #[error("unsupported repository scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A source of route and OAuth server definitions.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    async fn list_route_definitions(&self) -> Result<Vec<RouteDefinition>, RepositoryError>;

    async fn list_oauth_servers(&self) -> Result<Vec<OAuthServerDefinition>, RepositoryError>;

    /// Directory whose changes should trigger a reload, if any.
    fn watch_path(&self) -> Option<&Path> {
        None
    }
}

/// Open the repository selected by the DSN scheme.
pub fn open(dsn: &str) -> Result<Arc<dyn DefinitionRepository>, RepositoryError> {
    let url = Url::parse(dsn).map_err(|e| RepositoryError::InvalidDsn(e.to_string()))?;

    match url.scheme() {
        "file" => {
            let root = url
                .to_file_path()
                .map_err(|_| RepositoryError::InvalidDsn(format!("{} is not a local path", dsn)))?;
            tracing::debug!(root = %root.display(), "Using filesystem definition repository");
            Ok(Arc::new(FileSystemRepository::new(root)))
        }
        "memory" => {
            tracing::debug!("Using in-memory definition repository");
            Ok(Arc::new(InMemoryRepository::new()))
        }
        other => Err(RepositoryError::UnsupportedScheme(other.to_string())),
    }
}

/// Writable in-process repository.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    routes: RwLock<Vec<RouteDefinition>>,
    servers: RwLock<Vec<OAuthServerDefinition>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a route definition by id.
    pub fn upsert_route(&self, definition: RouteDefinition) {
        let mut routes = self.routes.write().expect("repository lock poisoned");
        match routes.iter_mut().find(|r| r.id == definition.id) {
            Some(existing) => *existing = definition,
            None => routes.push(definition),
        }
    }

    /// Remove a route definition; returns whether it existed.
    pub fn remove_route(&self, id: &str) -> bool {
        let mut routes = self.routes.write().expect("repository lock poisoned");
        let before = routes.len();
        routes.retain(|r| r.id != id);
        routes.len() != before
    }

    pub fn set_routes(&self, definitions: Vec<RouteDefinition>) {
        *self.routes.write().expect("repository lock poisoned") = definitions;
    }

    /// Insert or replace an OAuth server definition by id.
    pub fn upsert_oauth_server(&self, server: OAuthServerDefinition) {
        let mut servers = self.servers.write().expect("repository lock poisoned");
        match servers.iter_mut().find(|s| s.id == server.id) {
            Some(existing) => *existing = server,
            None => servers.push(server),
        }
    }

    pub fn remove_oauth_server(&self, id: &str) -> bool {
        let mut servers = self.servers.write().expect("repository lock poisoned");
        let before = servers.len();
        servers.retain(|s| s.id != id);
        servers.len() != before
    }
}

#[async_trait]
impl DefinitionRepository for InMemoryRepository {
    async fn list_route_definitions(&self) -> Result<Vec<RouteDefinition>, RepositoryError> {
        Ok(self.routes.read().expect("repository lock poisoned").clone())
    }

    async fn list_oauth_servers(&self) -> Result<Vec<OAuthServerDefinition>, RepositoryError> {
        Ok(self.servers.read().expect("repository lock poisoned").clone())
    }
}
