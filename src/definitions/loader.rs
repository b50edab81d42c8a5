//! Startup and reload orchestration.
//!
//! # Responsibilities
//! - Read every definition from the repository
//! - Validate and plan the desired route set
//! - Build handlers for new or changed definitions only
//! - Publish the whole change set as one registry update
//!
//! # Design Decisions
//! - Planning is pure and independent of the registry, so it can also run
//!   offline (definition linting)
//! - A definition whose source is unchanged keeps its handler, so repeated
//!   loads of the same definitions are no-ops
//! - Loads are serialized; a repository failure leaves the table untouched

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::definitions::repository::{DefinitionRepository, RepositoryError};
use crate::definitions::types::{
    AuthRequirement, DefinitionError, OAuthServerDefinition, ProxySettings, RouteDefinition,
    ValidProxy,
};
use crate::http::handler::HandlerRef;
use crate::http::middleware::Pipeline;
use crate::oauth::{OAuthAwareTransport, TokenValidator};
use crate::proxy::{ProxyBuilder, Transport};
use crate::routing::{ListenPath, RegisteredRoute, RouteRegistry};
use crate::store::KeyValueStore;

/// The definition a registered route was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteSource {
    Api {
        definition: RouteDefinition,
        /// The referenced OAuth server as it was when the handler was built.
        oauth_server: Option<OAuthServerDefinition>,
    },
    OAuthEndpoint {
        server_id: String,
        settings: ProxySettings,
    },
}

impl RouteSource {
    pub fn label(&self) -> String {
        match self {
            RouteSource::Api { definition, .. } => definition.label().to_string(),
            RouteSource::OAuthEndpoint { server_id, settings } => {
                format!("oauth:{}:{}", server_id, settings.listen_path)
            }
        }
    }
}

/// What kind of definition was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DefinitionKind {
    Api,
    OAuthServer,
    OAuthEndpoint,
}

/// A definition left out of the route set, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDefinition {
    pub kind: DefinitionKind,
    pub id: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: DefinitionError,
}

fn serialize_display<S: serde::Serializer>(
    error: &DefinitionError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// One route the plan wants registered.
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub proxy: ValidProxy,
    pub source: RouteSource,
}

impl PlannedRoute {
    pub fn pattern(&self) -> &ListenPath {
        &self.proxy.listen_path
    }
}

/// The validated, desired route set.
#[derive(Debug, Default)]
pub struct DefinitionPlan {
    /// Keyed by listen path key (parameter names erased).
    pub routes: BTreeMap<String, PlannedRoute>,
    pub skipped: Vec<SkippedDefinition>,
    /// Inactive definitions left out.
    pub inactive: usize,
}

/// Validate definitions into the route set they describe.
///
/// Route definitions are processed in repository order; on a listen path
/// or id collision the first one wins. OAuth server endpoints come after
/// every route definition.
pub fn plan(servers: Vec<OAuthServerDefinition>, routes: Vec<RouteDefinition>) -> DefinitionPlan {
    let mut plan = DefinitionPlan::default();

    let mut valid_servers: BTreeMap<String, OAuthServerDefinition> = BTreeMap::new();
    for server in servers {
        let result = server.validate().and_then(|()| {
            if valid_servers.contains_key(&server.id) {
                Err(DefinitionError::DuplicateId(server.id.clone()))
            } else {
                Ok(())
            }
        });
        match result {
            Ok(()) => {
                valid_servers.insert(server.id.clone(), server);
            }
            Err(error) => plan.skip(DefinitionKind::OAuthServer, &server.id, error),
        }
    }

    let mut seen_ids = HashSet::new();
    for definition in routes {
        if !definition.active {
            plan.inactive += 1;
            continue;
        }
        if let Err(error) = plan_route(&mut plan, &valid_servers, &mut seen_ids, &definition) {
            plan.skip(DefinitionKind::Api, &definition.id, error);
        }
    }

    for server in valid_servers.values() {
        for settings in &server.endpoints {
            let result = settings.validate().and_then(|proxy| {
                plan.insert(PlannedRoute {
                    proxy,
                    source: RouteSource::OAuthEndpoint {
                        server_id: server.id.clone(),
                        settings: settings.clone(),
                    },
                })
            });
            if let Err(error) = result {
                let id = format!("{}:{}", server.id, settings.listen_path);
                plan.skip(DefinitionKind::OAuthEndpoint, &id, error);
            }
        }
    }

    plan
}

fn plan_route(
    plan: &mut DefinitionPlan,
    servers: &BTreeMap<String, OAuthServerDefinition>,
    seen_ids: &mut HashSet<String>,
    definition: &RouteDefinition,
) -> Result<(), DefinitionError> {
    if definition.id.trim().is_empty() {
        return Err(DefinitionError::MissingId);
    }
    if !seen_ids.insert(definition.id.clone()) {
        return Err(DefinitionError::DuplicateId(definition.id.clone()));
    }

    let proxy = definition.proxy.validate()?;
    let oauth_server = match &definition.auth {
        AuthRequirement::None => None,
        AuthRequirement::Oauth { server_id } => Some(
            servers
                .get(server_id)
                .cloned()
                .ok_or_else(|| DefinitionError::UnknownOAuthServer(server_id.clone()))?,
        ),
    };

    plan.insert(PlannedRoute {
        proxy,
        source: RouteSource::Api {
            definition: definition.clone(),
            oauth_server,
        },
    })
}

impl DefinitionPlan {
    fn insert(&mut self, route: PlannedRoute) -> Result<(), DefinitionError> {
        let key = route.pattern().key().to_string();
        if self.routes.contains_key(&key) {
            return Err(DefinitionError::DuplicateListenPath(
                route.pattern().to_string(),
            ));
        }
        self.routes.insert(key, route);
        Ok(())
    }

    fn skip(&mut self, kind: DefinitionKind, id: &str, error: DefinitionError) {
        tracing::warn!(kind = ?kind, id = %id, error = %error, "Skipping invalid definition");
        self.skipped.push(SkippedDefinition {
            kind,
            id: id.to_string(),
            error,
        });
    }
}

/// Outcome of one load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Patterns installed or replaced by this load.
    pub registered: Vec<String>,
    /// Patterns whose handler was kept as is.
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub skipped: Vec<SkippedDefinition>,
}

impl LoadReport {
    pub fn is_noop(&self) -> bool {
        self.registered.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read definitions: {0}")]
    Repository(#[from] RepositoryError),
}

/// Applies repository contents to the route registry.
pub struct DefinitionLoader {
    registry: Arc<RouteRegistry>,
    builder: ProxyBuilder,
    pipeline: Pipeline,
    store: Arc<dyn KeyValueStore>,
    introspection: reqwest::Client,
    load_lock: Mutex<()>,
}

impl DefinitionLoader {
    pub fn new(
        registry: Arc<RouteRegistry>,
        builder: ProxyBuilder,
        pipeline: Pipeline,
        store: Arc<dyn KeyValueStore>,
        introspection: reqwest::Client,
    ) -> Self {
        Self {
            registry,
            builder,
            pipeline,
            store,
            introspection,
            load_lock: Mutex::new(()),
        }
    }

    pub fn registry(&self) -> &Arc<RouteRegistry> {
        &self.registry
    }

    /// Bring the registry in line with the repository.
    pub async fn load(&self, repository: &dyn DefinitionRepository) -> Result<LoadReport, LoadError> {
        let _guard = self.load_lock.lock().await;

        let servers = repository.list_oauth_servers().await?;
        let routes = repository.list_route_definitions().await?;
        let plan = plan(servers, routes);
        let inactive = plan.inactive;

        let report = self.apply(plan);

        tracing::info!(
            registered = report.registered.len(),
            unchanged = report.unchanged.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            inactive,
            "Definitions loaded"
        );
        Ok(report)
    }

    fn apply(&self, plan: DefinitionPlan) -> LoadReport {
        let DefinitionPlan {
            routes: desired,
            skipped,
            ..
        } = plan;
        let mut report = LoadReport {
            skipped,
            ..LoadReport::default()
        };
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();

        self.registry.update(|edit| {
            for pattern in edit.patterns() {
                if !desired.contains_key(&pattern) && edit.remove(&pattern) {
                    tracing::info!(pattern = %pattern, "Route removed");
                    report.removed.push(pattern);
                }
            }

            for (pattern, planned) in desired {
                let unchanged = edit
                    .get(&pattern)
                    .is_some_and(|existing| existing.source.as_ref() == Some(&planned.source));
                if unchanged {
                    report.unchanged.push(pattern);
                    continue;
                }

                let handler = self.build_handler(&planned, &mut transports);
                tracing::info!(
                    pattern = %planned.proxy.listen_path,
                    methods = %planned.proxy.methods,
                    route = %planned.source.label(),
                    "Route registered"
                );
                edit.insert(RegisteredRoute {
                    pattern: planned.proxy.listen_path.clone(),
                    methods: planned.proxy.methods.clone(),
                    handler,
                    source: Some(planned.source),
                });
                report.registered.push(pattern);
            }
        });

        report
    }

    fn build_handler(
        &self,
        planned: &PlannedRoute,
        transports: &mut HashMap<String, Arc<dyn Transport>>,
    ) -> HandlerRef {
        let label = planned.source.label();
        let proxy = match &planned.source {
            RouteSource::Api {
                oauth_server: Some(server),
                ..
            } => {
                let transport = transports
                    .entry(server.id.clone())
                    .or_insert_with(|| {
                        let validator = TokenValidator::new(
                            server,
                            self.store.clone(),
                            self.introspection.clone(),
                        );
                        Arc::new(OAuthAwareTransport::new(
                            self.builder.pool(),
                            validator,
                            server.scopes.clone(),
                        ))
                    })
                    .clone();
                self.builder.build_with_transport(&label, &planned.proxy, transport)
            }
            _ => self.builder.build(&label, &planned.proxy),
        };

        self.pipeline.wrap(Arc::new(proxy))
    }
}
