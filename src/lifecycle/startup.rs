//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order (store, transport pool,
//!   pipeline, loader)
//! - Load definitions before the first request is accepted
//! - Start background tasks (eviction, store sweep, reload, watcher, SIGHUP)
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when routes are loaded)

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::RecommendedWatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::GatewayConfig;
use crate::definitions::{
    self, run_reloader, DefinitionLoader, DefinitionRepository, DefinitionWatcher, LoadError,
    LoadReport, ReloadReason, ReloadTrigger, RepositoryError,
};
use crate::http::middleware::{Pipeline, StatsSink};
use crate::http::HttpServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::reload_on_sighup;
use crate::net::tls::load_tls_config;
use crate::observability::PrometheusStatsSink;
use crate::proxy::{PoolSettings, ProxyBuilder, TransportPool};
use crate::routing::RouteRegistry;
use crate::store::{self, KeyValueStore, StoreError};

/// How often expired keys are purged from the store.
const STORE_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("key-value store: {0}")]
    Store(#[from] StoreError),

    #[error("definition repository: {0}")]
    Repository(#[from] RepositoryError),

    #[error("initial definition load: {0}")]
    Load(#[from] LoadError),

    #[error("upstream TLS setup: {0}")]
    Tls(#[from] rustls::Error),

    #[error("introspection client: {0}")]
    Http(#[from] reqwest::Error),

    #[error("definition watcher: {0}")]
    Watch(#[from] notify::Error),

    #[error("invalid bind address {0}")]
    BindAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Assembles a [`Gateway`] from configuration, with optional overrides for
/// the collaborators that would otherwise be opened from DSNs.
pub struct GatewayBuilder {
    config: GatewayConfig,
    repository: Option<Arc<dyn DefinitionRepository>>,
    store: Option<Arc<dyn KeyValueStore>>,
    stats: Option<Arc<dyn StatsSink>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            repository: None,
            store: None,
            stats: None,
        }
    }

    pub fn repository(mut self, repository: Arc<dyn DefinitionRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn build(self) -> Result<Gateway, StartupError> {
        let config = self.config;

        let store = match self.store {
            Some(store) => store,
            None => store::connect(&config.storage.dsn)?,
        };
        let repository = match self.repository {
            Some(repository) => repository,
            None => definitions::open(&config.definitions.dsn)?,
        };
        let stats = self
            .stats
            .unwrap_or_else(|| Arc::new(PrometheusStatsSink) as Arc<dyn StatsSink>);

        let pool = Arc::new(TransportPool::new(PoolSettings::from(&config.proxy))?);
        let builder = ProxyBuilder::new(pool.clone(), config.proxy.flush_interval());
        let introspection = reqwest::Client::builder()
            .no_proxy()
            .connect_timeout(config.proxy.connect_timeout())
            .timeout(config.proxy.upstream_timeout())
            .build()?;

        let registry = Arc::new(RouteRegistry::new());
        let loader = Arc::new(DefinitionLoader::new(
            registry.clone(),
            builder,
            Pipeline::standard(stats),
            store.clone(),
            introspection,
        ));

        let (reload_trigger, reload_rx) = ReloadTrigger::channel();

        Ok(Gateway {
            config,
            registry,
            pool,
            loader,
            repository,
            store,
            reload_trigger,
            reload_rx,
        })
    }
}

/// A fully wired gateway, ready to load definitions and serve.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<RouteRegistry>,
    pool: Arc<TransportPool>,
    loader: Arc<DefinitionLoader>,
    repository: Arc<dyn DefinitionRepository>,
    store: Arc<dyn KeyValueStore>,
    reload_trigger: ReloadTrigger,
    reload_rx: mpsc::Receiver<ReloadReason>,
}

impl Gateway {
    pub fn builder(config: GatewayConfig) -> GatewayBuilder {
        GatewayBuilder::new(config)
    }

    pub fn registry(&self) -> Arc<RouteRegistry> {
        self.registry.clone()
    }

    pub fn loader(&self) -> Arc<DefinitionLoader> {
        self.loader.clone()
    }

    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.reload_trigger.clone()
    }

    /// Load definitions now and wait for the result.
    pub async fn reload(&self) -> Result<LoadReport, LoadError> {
        self.loader.load(self.repository.as_ref()).await
    }

    /// Bind the configured address (plain or TLS) and serve until shutdown.
    pub async fn run(self, shutdown: &Shutdown) -> Result<(), StartupError> {
        match self.config.listener.tls.clone() {
            Some(tls) => {
                let addr: SocketAddr = self
                    .config
                    .listener
                    .bind_address
                    .parse()
                    .map_err(|_| StartupError::BindAddress(self.config.listener.bind_address.clone()))?;
                let tls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;

                let (server, _watcher) = self.start(shutdown).await?;
                server.run_tls(addr, tls, shutdown.subscribe()).await?;
                Ok(())
            }
            None => {
                let listener = TcpListener::bind(&self.config.listener.bind_address).await?;
                self.serve(listener, shutdown).await
            }
        }
    }

    /// Serve plain HTTP on an already bound listener until shutdown.
    pub async fn serve(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), StartupError> {
        let (server, _watcher) = self.start(shutdown).await?;
        server.run(listener, shutdown.subscribe()).await?;
        Ok(())
    }

    /// Initial load plus background tasks. The returned watcher, if any,
    /// stops watching when dropped.
    async fn start(
        self,
        shutdown: &Shutdown,
    ) -> Result<(HttpServer, Option<RecommendedWatcher>), StartupError> {
        let report = self.reload().await?;
        tracing::info!(
            routes = self.registry.snapshot().len(),
            skipped = report.skipped.len(),
            "Initial definitions loaded"
        );

        tokio::spawn(
            self.pool
                .clone()
                .run_eviction(self.config.proxy.close_idle_conns_period(), shutdown.subscribe()),
        );
        tokio::spawn(store::run_sweeper(
            self.store.clone(),
            STORE_SWEEP_PERIOD,
            shutdown.subscribe(),
        ));
        tokio::spawn(run_reloader(
            self.loader.clone(),
            self.repository.clone(),
            self.reload_rx,
            shutdown.subscribe(),
        ));
        tokio::spawn(reload_on_sighup(self.reload_trigger.clone(), shutdown.subscribe()));

        let watcher = match (self.config.definitions.watch, self.repository.watch_path()) {
            (true, Some(path)) => {
                let debounce = self.config.definitions.watch_debounce();
                Some(DefinitionWatcher::new(path, self.reload_trigger.clone(), debounce).run()?)
            }
            _ => None,
        };

        let request_timeout = Duration::from_secs(self.config.proxy.request_timeout_secs);
        Ok((HttpServer::new(self.registry, request_timeout), watcher))
    }
}
