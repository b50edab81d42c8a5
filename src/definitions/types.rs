//! Route and OAuth server definitions.
//!
//! These are the persisted shapes read from a repository. They are plain
//! data; [`ProxySettings::validate`] and [`OAuthServerDefinition::validate`]
//! turn them into the checked forms the loader builds handlers from.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use axum::http::Method;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::routing::matcher::{ListenPath, PatternError};
use crate::routing::MethodSet;

/// Why a single definition was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("definition has an empty id")]
    MissingId,

    #[error("invalid listen path: {0}")]
    ListenPath(#[from] PatternError),

    #[error("no upstream targets configured")]
    NoTargets,

    #[error("invalid upstream target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid method {0:?}")]
    InvalidMethod(String),

    #[error("listen path {0} is already used by an active definition")]
    DuplicateListenPath(String),

    #[error("duplicate id {0}")]
    DuplicateId(String),

    #[error("referenced OAuth server {0:?} is not loaded")]
    UnknownOAuthServer(String),

    #[error("invalid token validation: {0}")]
    TokenValidation(String),
}

/// The proxy half of a definition: where to listen and where to forward.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxySettings {
    /// Inbound path pattern, optionally ending in `/*`.
    pub listen_path: String,

    /// Upstream base URLs, tried in round-robin order.
    pub upstream_targets: Vec<String>,

    /// Remove the matched prefix before forwarding.
    #[serde(default)]
    pub strip_listen_path: bool,

    /// Forward the inbound `Host` header unchanged.
    #[serde(default)]
    pub preserve_host: bool,

    /// Skip upstream certificate verification for this route only.
    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// Allowed methods; empty means any.
    #[serde(default)]
    pub methods: Vec<String>,
}

/// Credential requirement of a route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthRequirement {
    #[default]
    None,
    Oauth { server_id: String },
}

/// A persisted API route definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_active")]
    pub active: bool,

    #[serde(flatten)]
    pub proxy: ProxySettings,

    #[serde(default)]
    pub auth: AuthRequirement,
}

fn default_active() -> bool {
    true
}

impl RouteDefinition {
    /// Label used in logs: the name when set, otherwise the id.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// One upstream base URL, pre-split for request rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub url: Url,
}

impl Upstream {
    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// `host[:port]` as written in the target URL.
    pub fn authority(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    /// Base path with any trailing slash removed (`""` for the root).
    pub fn base_path(&self) -> &str {
        self.url.path().trim_end_matches('/')
    }
}

impl FromStr for Upstream {
    type Err = DefinitionError;

    fn from_str(target: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| DefinitionError::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(target).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host"));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed"));
        }
        Ok(Self { url })
    }
}

/// Proxy settings that passed validation.
#[derive(Debug, Clone)]
pub struct ValidProxy {
    pub listen_path: ListenPath,
    pub upstreams: Vec<Upstream>,
    pub methods: MethodSet,
    pub strip_listen_path: bool,
    pub preserve_host: bool,
    pub insecure_skip_verify: bool,
}

impl ProxySettings {
    pub fn validate(&self) -> Result<ValidProxy, DefinitionError> {
        let listen_path = ListenPath::parse(&self.listen_path)?;

        if self.upstream_targets.is_empty() {
            return Err(DefinitionError::NoTargets);
        }
        let upstreams = self
            .upstream_targets
            .iter()
            .map(|t| t.parse::<Upstream>())
            .collect::<Result<Vec<_>, _>>()?;

        let methods = self
            .methods
            .iter()
            .map(|m| {
                Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|_| DefinitionError::InvalidMethod(m.clone()))
            })
            .collect::<Result<MethodSet, _>>()?;

        Ok(ValidProxy {
            listen_path,
            upstreams,
            methods,
            strip_listen_path: self.strip_listen_path,
            preserve_host: self.preserve_host,
            insecure_skip_verify: self.insecure_skip_verify,
        })
    }
}

/// Signing algorithm for locally verified JWTs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum JwtAlgorithm {
    #[default]
    HS256,
    HS384,
    HS512,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

/// How an OAuth server's bearer credentials are checked.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum TokenValidation {
    /// Shared-secret signature and expiry check, done locally.
    Jwt {
        secret: String,
        #[serde(default)]
        algorithm: JwtAlgorithm,
        #[serde(default)]
        leeway_secs: u64,
    },
    /// RFC 7662 introspection, results cached in the key-value store.
    Introspection {
        endpoint: String,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        client_secret: Option<String>,
        #[serde(default = "default_cache_ttl_secs")]
        cache_ttl_secs: u64,
    },
    /// Tokens are valid only while a grant is present in the key-value store.
    Store,
}

impl TokenValidation {
    /// Upper bound for cached grants, when this strategy caches at all.
    pub fn cache_ttl(&self) -> Option<Duration> {
        match self {
            TokenValidation::Introspection { cache_ttl_secs, .. } => {
                Some(Duration::from_secs(*cache_ttl_secs))
            }
            _ => None,
        }
    }
}

/// A persisted OAuth server definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct OAuthServerDefinition {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub token_validation: TokenValidation,

    /// Permitted scopes; empty accepts any authenticated token.
    #[serde(default)]
    pub scopes: BTreeSet<String>,

    /// The server's own endpoints, exposed without credential checks.
    #[serde(default)]
    pub endpoints: Vec<ProxySettings>,
}

impl OAuthServerDefinition {
    pub fn validate(&self) -> Result<(), DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::MissingId);
        }

        match &self.token_validation {
            TokenValidation::Jwt { secret, .. } if secret.is_empty() => Err(
                DefinitionError::TokenValidation("jwt secret must not be empty".into()),
            ),
            TokenValidation::Introspection { endpoint, .. } => match Url::parse(endpoint) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
                Ok(_) => Err(DefinitionError::TokenValidation(
                    "introspection endpoint must be http or https".into(),
                )),
                Err(e) => Err(DefinitionError::TokenValidation(format!(
                    "introspection endpoint: {}",
                    e
                ))),
            },
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(listen_path: &str, targets: &[&str]) -> ProxySettings {
        ProxySettings {
            listen_path: listen_path.into(),
            upstream_targets: targets.iter().map(|t| t.to_string()).collect(),
            strip_listen_path: false,
            preserve_host: false,
            insecure_skip_verify: false,
            methods: Vec::new(),
        }
    }

    #[test]
    fn route_definition_json_shape() {
        let def: RouteDefinition = serde_json::from_str(
            r#"{
                "id": "users",
                "listen_path": "/users/*",
                "upstream_targets": ["http://users.internal:8080/api"],
                "strip_listen_path": true,
                "methods": ["get", "POST"],
                "auth": {"type": "oauth", "server_id": "main"}
            }"#,
        )
        .unwrap();

        assert!(def.active);
        assert_eq!(def.label(), "users");
        assert_eq!(def.auth, AuthRequirement::Oauth { server_id: "main".into() });

        let valid = def.proxy.validate().unwrap();
        assert_eq!(valid.listen_path.as_str(), "/users");
        assert!(valid.methods.allows(&Method::GET));
        assert!(!valid.methods.allows(&Method::DELETE));
        assert_eq!(valid.upstreams[0].authority(), "users.internal:8080");
        assert_eq!(valid.upstreams[0].base_path(), "/api");
    }

    #[test]
    fn rejects_bad_targets() {
        assert_eq!(settings("/a", &[]).validate().unwrap_err(), DefinitionError::NoTargets);
        assert!(matches!(
            settings("/a", &["ftp://files"]).validate(),
            Err(DefinitionError::InvalidTarget { .. })
        ));
        assert!(matches!(
            settings("/a", &["not a url"]).validate(),
            Err(DefinitionError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn rejects_bad_listen_path_and_method() {
        assert!(matches!(
            settings("no-slash", &["http://a"]).validate(),
            Err(DefinitionError::ListenPath(_))
        ));

        let mut s = settings("/a", &["http://a"]);
        s.methods = vec!["GE T".into()];
        assert!(matches!(s.validate(), Err(DefinitionError::InvalidMethod(_))));
    }

    #[test]
    fn oauth_server_json_shape() {
        let server: OAuthServerDefinition = serde_json::from_str(
            r#"{
                "id": "main",
                "name": "Main auth",
                "token_validation": {
                    "strategy": "introspection",
                    "endpoint": "https://auth.internal/introspect"
                },
                "scopes": ["read"]
            }"#,
        )
        .unwrap();

        server.validate().unwrap();
        assert_eq!(server.token_validation.cache_ttl(), Some(Duration::from_secs(300)));
        assert!(server.endpoints.is_empty());
    }

    #[test]
    fn oauth_server_rejects_empty_secret() {
        let server = OAuthServerDefinition {
            id: "jwt".into(),
            name: String::new(),
            token_validation: TokenValidation::Jwt {
                secret: String::new(),
                algorithm: JwtAlgorithm::HS256,
                leeway_secs: 0,
            },
            scopes: BTreeSet::new(),
            endpoints: Vec::new(),
        };
        assert!(matches!(server.validate(), Err(DefinitionError::TokenValidation(_))));
    }
}
