//! Assetvault-rs: asset-processing backbone for a self-hosted 3D asset
//! library.
//!
//! The crate wires a content-addressed blob store, a versioned asset
//! catalog, a durable lease-based job queue, and a WebSocket push hub
//! behind one HTTP surface. Derivation work (thumbnails, waveforms) runs
//! through pluggable processors, in-process or against the worker API.
//!
//! # Example
//!
//! ```no_run
//! use assetvault_rs::{AssetServer, Config};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = AssetServer::new(Config::default());
//!     server.run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod queue;
pub mod router;
pub mod server;
pub mod storage;
pub mod upload;
pub mod worker;

// Re-exports for convenience
pub use config::{Args, Config, DEFAULT_LEASE_SECONDS, DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use server::{AssetServer, AssetServerBuilder};
pub use storage::{BlobStore, CatalogStore, FsBlobStore, MemoryBlobStore, MemoryCatalog};
