//! Processor registry and the worker loop.

mod processors;
mod remote;
mod runner;

pub use processors::{
    MeshAnalysisProcessor, ModelThumbnailProcessor, SoundWaveformProcessor,
    TextureSetThumbnailProcessor,
};
pub use remote::{RemoteBlobStore, RemoteQueue};
pub use runner::WorkerLoop;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiResult;
use crate::models::{Job, JobKind};
use crate::queue::JobQueue;
use crate::storage::BlobStore;

/// Shared dependencies handed to processors. The blob store and queue may
/// be the in-process implementations or the HTTP-backed remote pair, so
/// the same processors run embedded or out of process.
#[derive(Clone)]
pub struct ProcessorContext {
    pub blobs: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub config: Arc<Config>,
}

/// Strategy for executing one job kind. The worker loop owns the
/// lifecycle; processors only transform bytes into derived output.
#[async_trait]
pub trait Processor: Send + Sync {
    /// The job kind this processor handles.
    fn kind(&self) -> JobKind;

    /// Runs the derivation and returns the result payload recorded on the
    /// COMPLETED event. Derivation processors return a serialized
    /// [`crate::events::DerivedOutput`].
    async fn process(&self, ctx: &ProcessorContext, job: &Job) -> ApiResult<serde_json::Value>;

    /// Optional hook after the queue accepted the completion.
    async fn on_complete(&self, _job: &Job, _result: &serde_json::Value) {}

    /// Optional hook after the queue recorded the failure.
    async fn on_fail(&self, _job: &Job, _error: &str) {}

    /// Releases processor-held resources at shutdown.
    async fn cleanup(&self) {}
}

/// Lookup table from job kind to processor, populated at startup.
pub struct ProcessorRegistry {
    processors: HashMap<JobKind, Arc<dyn Processor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registers the v1 processor set.
    pub fn with_default_processors() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ModelThumbnailProcessor));
        registry.register(Arc::new(SoundWaveformProcessor));
        registry.register(Arc::new(TextureSetThumbnailProcessor));
        registry.register(Arc::new(MeshAnalysisProcessor));
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors.insert(processor.kind(), processor);
    }

    pub fn lookup(&self, kind: JobKind) -> Option<Arc<dyn Processor>> {
        self.processors.get(&kind).cloned()
    }

    /// Kinds this worker pool declares on lease.
    pub fn accepted_kinds(&self) -> Vec<JobKind> {
        let mut kinds: Vec<JobKind> = self.processors.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub async fn cleanup(&self) {
        for processor in self.processors.values() {
            processor.cleanup().await;
        }
    }
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::with_default_processors()
    }
}
