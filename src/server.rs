//! HTTP server wiring storage, queue, hub, and background tasks.

use axum::http::HeaderValue;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::events::Dispatcher;
use crate::hub::Hub;
use crate::queue::{JobQueue, LeaseSweeper, MemoryJobQueue};
use crate::router::{create_router, AppState};
use crate::storage::{
    BlobGarbageCollector, BlobStore, CatalogStore, FsBlobStore, MemoryBlobStore, MemoryCatalog,
};
use crate::upload::UploadService;
use crate::worker::{ProcessorContext, ProcessorRegistry, WorkerLoop};

/// Interval between blob GC passes.
const GC_INTERVAL: Duration = Duration::from_secs(3600);

/// Asset library server.
pub struct AssetServer {
    config: Arc<Config>,
    catalog: Arc<dyn CatalogStore>,
    queue: Arc<dyn JobQueue>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl AssetServer {
    /// Creates a server with in-memory catalog and queue. The blob store is
    /// chosen at startup from the configuration unless one is injected
    /// through the builder.
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(MemoryCatalog::new()),
            queue: Arc::new(MemoryJobQueue::new()),
            blobs: None,
        }
    }

    /// Runs the server.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.config.bind_address().parse()?;

        let blobs: Arc<dyn BlobStore> = match self.blobs {
            Some(blobs) => blobs,
            None => match &self.config.blob_root {
                Some(root) => Arc::new(FsBlobStore::new(root.clone()).await?),
                None => Arc::new(MemoryBlobStore::new()),
            },
        };

        let hub = Arc::new(Hub::new());
        let dispatcher = Arc::new(Dispatcher::new(
            self.queue.clone(),
            self.catalog.clone(),
            hub.clone(),
            self.config.max_attempts,
        ));
        let uploads = Arc::new(UploadService::new(
            blobs.clone(),
            self.catalog.clone(),
            dispatcher.clone(),
            self.config.clone(),
        ));

        let state = AppState {
            config: self.config.clone(),
            blobs: blobs.clone(),
            catalog: self.catalog.clone(),
            queue: self.queue.clone(),
            hub,
            dispatcher: dispatcher.clone(),
            uploads,
        };

        // Background sweeper: the single reclaimer of expired leases.
        let sweeper = LeaseSweeper::new(
            self.queue.clone(),
            dispatcher.clone(),
            self.config.reclaim_interval,
        );
        tokio::spawn(async move { sweeper.run().await });

        // Blob GC off the hot path.
        let gc = BlobGarbageCollector::new(self.catalog.clone(), blobs.clone(), GC_INTERVAL);
        tokio::spawn(async move { gc.run().await });

        // Optional in-process worker pool.
        if self.config.embedded_workers {
            let registry = Arc::new(ProcessorRegistry::with_default_processors());
            let ctx = ProcessorContext {
                blobs: blobs.clone(),
                queue: self.queue.clone(),
                config: self.config.clone(),
            };
            let worker = WorkerLoop::new(
                self.queue.clone(),
                registry,
                Some(dispatcher.clone()),
                ctx,
                format!("embedded-{}", uuid::Uuid::new_v4()),
                self.config.lease_duration,
                self.config.idle_backoff,
            );
            tokio::spawn(async move { worker.run().await });
            info!("embedded worker pool started");
        }

        let cors = cors_layer(&self.config);
        let app = create_router(state)
            .layer(cors)
            .layer(TraceLayer::new_for_http());

        info!("asset library service is starting at http://{}", addr);
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Returns the bind address.
    pub fn bind_address(&self) -> String {
        self.config.bind_address()
    }

    /// Returns the base URL for the service.
    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    if config.cors_allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Builder for creating an asset server with custom storage.
pub struct AssetServerBuilder {
    config: Config,
    catalog: Option<Arc<dyn CatalogStore>>,
    queue: Option<Arc<dyn JobQueue>>,
    blobs: Option<Arc<dyn BlobStore>>,
}

impl AssetServerBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            catalog: None,
            queue: None,
            blobs: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn catalog(mut self, catalog: Arc<dyn CatalogStore>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn blobs(mut self, blobs: Arc<dyn BlobStore>) -> Self {
        self.blobs = Some(blobs);
        self
    }

    pub fn build(self) -> AssetServer {
        AssetServer {
            config: Arc::new(self.config),
            catalog: self
                .catalog
                .unwrap_or_else(|| Arc::new(MemoryCatalog::new())),
            queue: self.queue.unwrap_or_else(|| Arc::new(MemoryJobQueue::new())),
            blobs: self.blobs,
        }
    }
}

impl Default for AssetServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
