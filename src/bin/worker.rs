//! Out-of-process worker: leases jobs over the worker API and runs the
//! built-in processors against the content endpoints.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use assetvault_rs::worker::{
    ProcessorContext, ProcessorRegistry, RemoteBlobStore, RemoteQueue, WorkerLoop,
};
use assetvault_rs::Config;

/// Command-line arguments for the worker process.
#[derive(Parser, Debug)]
#[command(name = "assetvault-worker")]
#[command(about = "Out-of-process derivation worker for assetvault-rs")]
#[command(version)]
struct WorkerArgs {
    /// Base URL of the asset library service.
    #[arg(long, default_value = "http://127.0.0.1:5200")]
    server_url: String,

    /// Worker id reported on lease; defaults to a random id.
    #[arg(long)]
    worker_id: Option<String>,

    /// Lease duration requested per job, in seconds.
    #[arg(long, default_value_t = assetvault_rs::DEFAULT_LEASE_SECONDS)]
    lease_seconds: u64,

    /// Sleep between empty lease attempts, in milliseconds.
    #[arg(long, default_value_t = 5000)]
    idle_backoff_ms: u64,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let args = WorkerArgs::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.debug { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));
    let base_url = args.server_url.trim_end_matches('/').to_string();

    let queue = Arc::new(RemoteQueue::new(base_url.clone()));
    let blobs = Arc::new(RemoteBlobStore::new(base_url.clone()));
    let registry = Arc::new(ProcessorRegistry::with_default_processors());

    let mut config = Config::default();
    config.apply_env();
    let ctx = ProcessorContext {
        blobs,
        queue: queue.clone(),
        config: Arc::new(config),
    };

    // Terminal calls go through the worker API, where the server fires the
    // completion side effects; no local dispatcher.
    let worker = WorkerLoop::new(
        queue,
        registry,
        None,
        ctx,
        worker_id.clone(),
        Duration::from_secs(args.lease_seconds),
        Duration::from_millis(args.idle_backoff_ms),
    );

    tracing::info!(worker = %worker_id, server = %base_url, "remote worker connecting");
    worker.run().await;
}
