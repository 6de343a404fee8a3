//! Resource collectors.
//!
//! A collector discovers the resources of one external scope (an account,
//! a region, a file). The sync engine only needs "poll once":
//! - `registry`: static and dynamic collector registration
//! - `orchestrator`: bounded-concurrency polling of all collectors
//! - `file`: a collector backed by a JSON file

pub mod file;
pub mod orchestrator;
pub mod registry;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::resource::ResourceSet;

pub use file::FileCollector;
pub use orchestrator::{poll_all, PollErrors, PollReport, PollResult, MAX_CONCURRENT_POLLS};
pub use registry::CollectorRegistry;

/// Errors a collector poll can fail with.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// The poll observed cancellation and stopped early.
    #[error("poll cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid resource data: {0}")]
    Decode(#[from] serde_json::Error),

    /// The poll task ended without reporting a result.
    #[error("poll task aborted")]
    Aborted,

    #[error("{0}")]
    Other(String),
}

/// A pollable source of resource state.
///
/// `poll` may be called concurrently with other collectors' polls. The
/// returned set belongs to the caller. Long-running polls should watch
/// `cancel` and return [`CollectorError::Cancelled`] promptly.
#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable name used in logs and error reports.
    fn name(&self) -> &str;

    async fn poll(&self, cancel: &CancellationToken) -> Result<ResourceSet, CollectorError>;
}
