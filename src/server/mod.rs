//! HTTP server
//!
//! Wires the registry, harvester, search index, ingestion dispatcher, status
//! tracker and read proxy into one axum application. Handlers live in
//! [`api`].

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::catalog::{CatalogRegistry, CollectionStore};
use crate::config::Config;
use crate::error::Result;
use crate::harvester::CollectionHarvester;
use crate::ingestion::{
    BackgroundRunner, EndpointCache, HttpIngesterClient, IngestionBackend, IngestionDispatcher,
    IngestionStatusTracker, JobRunner, SearchParameterStore,
};
use crate::search::SearchIndex;
use crate::stac::{StacClient, StacProxy};
use crate::storage::Database;

pub use api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: CatalogRegistry,
    pub collections: CollectionStore,
    pub parameters: SearchParameterStore,
    pub tracker: IngestionStatusTracker,
    pub search: SearchIndex,
    pub harvester: CollectionHarvester,
    pub dispatcher: IngestionDispatcher,
    pub proxy: StacProxy,

    /// Server start time
    pub start_time: Instant,
}

impl AppState {
    /// Assemble the state around `db`, with an injected ingestion backend and job runner
    pub fn build(
        db: Database,
        config: &Config,
        backend: Arc<dyn IngestionBackend>,
        runner: Arc<dyn JobRunner>,
    ) -> Result<Self> {
        let registry = CatalogRegistry::new(db.clone());
        let parameters = SearchParameterStore::new(db.clone());
        let tracker = IngestionStatusTracker::new(db.clone());

        let client = Arc::new(StacClient::from_config(&config.harvester)?);
        let harvester = CollectionHarvester::new(client, db.clone(), &config.harvester);

        let dispatcher = IngestionDispatcher::new(
            registry.clone(),
            parameters.clone(),
            tracker.clone(),
            backend,
            runner,
            config.stac_api.target_url.clone(),
        );

        let proxy_client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        let proxy = StacProxy::new(proxy_client, &config.stac_api.base_url);

        Ok(Self {
            registry,
            collections: CollectionStore::new(db.clone()),
            parameters,
            tracker,
            search: SearchIndex::new(db),
            harvester,
            dispatcher,
            proxy,
            start_time: Instant::now(),
        })
    }
}

// ============================================================================
// Server
// ============================================================================

/// The stacport HTTP server
pub struct StacportServer {
    config: Config,
    state: AppState,
    runner: BackgroundRunner,
}

impl StacportServer {
    /// Open the database and build production components from `config`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::open(&config.database.sqlite_path)?;
        let backend = Arc::new(HttpIngesterClient::from_config(
            &config.ingestion,
            EndpointCache::new(),
        )?);
        let runner = BackgroundRunner::new();
        let state = AppState::build(db, &config, backend, Arc::new(runner.clone()))?;

        Ok(Self {
            config,
            state,
            runner,
        })
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        let mut router = create_router(self.state.clone());

        if self.config.server.enable_cors {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        if self.config.server.enable_request_logging {
            router = router.layer(TraceLayer::new_for_http());
        }

        router
    }

    /// Serve until `shutdown_signal` resolves, then wait for running ingestion jobs
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = self.config.bind_address()?;

        tracing::info!(%addr, target = %self.config.stac_api.target_url, "Starting stacport server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        let running = self.runner.in_flight();
        if running > 0 {
            tracing::info!(running, "Waiting for in-flight ingestion jobs");
            self.runner.wait_idle().await;
        }

        tracing::info!("stacport server shutdown complete");
        Ok(())
    }

    /// Get server info
    pub fn info(&self) -> Result<ServerInfo> {
        Ok(ServerInfo {
            bind_address: self.config.bind_address()?,
            target_url: self.config.stac_api.target_url.clone(),
            cors_enabled: self.config.server.enable_cors,
            request_logging_enabled: self.config.server.enable_request_logging,
        })
    }
}

/// Server information
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub bind_address: SocketAddr,
    pub target_url: String,
    pub cors_enabled: bool,
    pub request_logging_enabled: bool,
}

impl ServerInfo {
    /// Format as display string
    pub fn display(&self) -> String {
        format!(
            "stacport server\n\
             {:-<40}\n\
             Bind Address: {}\n\
             Target STAC API: {}\n\
             CORS: {}\n\
             Request Logging: {}",
            "",
            self.bind_address,
            self.target_url,
            if self.cors_enabled { "enabled" } else { "disabled" },
            if self.request_logging_enabled { "enabled" } else { "disabled" }
        )
    }
}
