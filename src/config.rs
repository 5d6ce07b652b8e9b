//! Server configuration.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 5200;

/// Default lease duration handed to workers, in seconds.
pub const DEFAULT_LEASE_SECONDS: u64 = 600;

/// Default attempt cap for jobs.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default worker idle backoff, in milliseconds.
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 5000;

/// Default interval between expired-lease sweeps, in milliseconds.
pub const DEFAULT_RECLAIM_INTERVAL_MS: u64 = 30_000;

/// Default upload size cap: 1 GiB.
pub const DEFAULT_UPLOAD_MAX_BYTES: u64 = 1_073_741_824;

/// Default thumbnail image size cap: 10 MiB.
pub const DEFAULT_THUMBNAIL_MAX_BYTES: u64 = 10_485_760;

/// Command-line arguments for the server.
#[derive(Parser, Debug, Clone)]
#[command(name = "assetvault-rs")]
#[command(about = "Asset-processing backbone for a self-hosted 3D asset library")]
#[command(version)]
pub struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the HTTP service.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Root directory for the content-addressed blob store.
    #[arg(long, short = 'l')]
    pub blob_root: Option<PathBuf>,

    /// Run the in-process worker pool alongside the API.
    #[arg(long)]
    pub embedded_workers: bool,

    /// Enable debug logging.
    #[arg(long, short = 'd')]
    pub debug: bool,

    /// Enable silent mode (minimal logging).
    #[arg(long, short = 's')]
    pub silent: bool,

    /// In-memory mode (no blob persistence).
    #[arg(long)]
    pub in_memory: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            blob_root: None,
            embedded_workers: false,
            debug: false,
            silent: false,
            in_memory: true,
        }
    }
}

/// Server configuration derived from command-line arguments and environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Host address to bind to.
    pub host: String,
    /// Port for the HTTP service.
    pub port: u16,
    /// Root directory for the blob store; `None` means in-memory.
    pub blob_root: Option<PathBuf>,
    /// Run the in-process worker pool alongside the API.
    pub embedded_workers: bool,
    /// Enable debug logging.
    pub debug: bool,
    /// Lease duration handed to workers.
    pub lease_duration: Duration,
    /// Attempt cap applied to enqueued jobs by default.
    pub max_attempts: u32,
    /// Sleep between empty lease attempts in the worker loop.
    pub idle_backoff: Duration,
    /// Interval between expired-lease sweeps.
    pub reclaim_interval: Duration,
    /// Size cap for model and auxiliary uploads, in bytes.
    pub upload_max_bytes: u64,
    /// Size cap for thumbnail image blobs, in bytes.
    pub thumbnail_max_bytes: u64,
    /// Allowed CORS origins; empty means allow any.
    pub cors_allowed_origins: Vec<String>,
    /// Whether the image classifier side channel is enabled.
    pub classification_enabled: bool,
    /// Minimum classifier confidence for a tag to be kept.
    pub classification_min_confidence: f64,
    /// Maximum number of classifier tags kept per model.
    pub classification_max_tags: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            blob_root: None,
            embedded_workers: false,
            debug: false,
            lease_duration: Duration::from_secs(DEFAULT_LEASE_SECONDS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            idle_backoff: Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS),
            reclaim_interval: Duration::from_millis(DEFAULT_RECLAIM_INTERVAL_MS),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            thumbnail_max_bytes: DEFAULT_THUMBNAIL_MAX_BYTES,
            cors_allowed_origins: Vec::new(),
            classification_enabled: false,
            classification_min_confidence: 0.1,
            classification_max_tags: 10,
        }
    }
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        let blob_root = if args.in_memory { None } else { args.blob_root };
        let mut config = Self {
            host: args.host,
            port: args.port,
            blob_root,
            embedded_workers: args.embedded_workers,
            debug: args.debug,
            ..Self::default()
        };
        config.apply_env();
        config
    }
}

impl Config {
    /// Overlays the environment variables recognized at startup.
    pub fn apply_env(&mut self) {
        if let Some(secs) = env_parse::<u64>("QUEUE_LEASE_SECONDS") {
            self.lease_duration = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<u32>("QUEUE_MAX_ATTEMPTS") {
            self.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_IDLE_BACKOFF_MS") {
            self.idle_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("QUEUE_RECLAIM_INTERVAL_MS") {
            self.reclaim_interval = Duration::from_millis(ms);
        }
        if let Ok(root) = std::env::var("BLOB_STORE_ROOT") {
            if !root.is_empty() {
                self.blob_root = Some(PathBuf::from(root));
            }
        }
        if let Some(n) = env_parse::<u64>("UPLOAD_MAX_BYTES") {
            self.upload_max_bytes = n;
        }
        if let Some(n) = env_parse::<u64>("THUMBNAIL_MAX_BYTES") {
            self.thumbnail_max_bytes = n;
        }
        if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.cors_allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(enabled) = env_parse::<bool>("IMAGE_CLASSIFICATION_ENABLED") {
            self.classification_enabled = enabled;
        }
        if let Some(c) = env_parse::<f64>("CLASSIFICATION_MIN_CONFIDENCE") {
            self.classification_min_confidence = c;
        }
        if let Some(n) = env_parse::<usize>("CLASSIFICATION_MAX_TAGS") {
            self.classification_max_tags = n;
        }
    }

    /// Returns the bind address for the HTTP service.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
