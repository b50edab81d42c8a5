//! Filesystem definition repository.
//!
//! Layout under the root directory:
//! ```text
//! <root>/apis/*.json   route definitions
//! <root>/auth/*.json   OAuth server definitions
//! ```
//! Each file holds one definition or an array of them. Files are read in
//! name order. A file that cannot be parsed is logged and skipped; a root
//! that cannot be read fails the whole listing.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::definitions::repository::{DefinitionRepository, RepositoryError};
use crate::definitions::types::{OAuthServerDefinition, RouteDefinition};

const APIS_DIR: &str = "apis";
const AUTH_DIR: &str = "auth";

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

#[derive(Debug, Clone)]
pub struct FileSystemRepository {
    root: PathBuf,
}

impl FileSystemRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, RepositoryError> {
        let io_error = |path: &Path, source: io::Error| RepositoryError::Io {
            path: path.to_path_buf(),
            source,
        };

        tokio::fs::metadata(&self.root)
            .await
            .map_err(|e| io_error(&self.root, e))?;

        let dir = self.root.join(dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "Definition directory absent, treating as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();

        let mut definitions = Vec::new();
        for path in files {
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable definition file");
                    continue;
                }
            };
            match serde_json::from_str::<OneOrMany<T>>(&content) {
                Ok(OneOrMany::One(definition)) => definitions.push(definition),
                Ok(OneOrMany::Many(many)) => definitions.extend(many),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping malformed definition file");
                }
            }
        }

        Ok(definitions)
    }
}

#[async_trait]
impl DefinitionRepository for FileSystemRepository {
    async fn list_route_definitions(&self) -> Result<Vec<RouteDefinition>, RepositoryError> {
        self.read_all(APIS_DIR).await
    }

    async fn list_oauth_servers(&self) -> Result<Vec<OAuthServerDefinition>, RepositoryError> {
        self.read_all(AUTH_DIR).await
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
