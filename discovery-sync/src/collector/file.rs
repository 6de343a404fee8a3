//! Collector that reads resources from a JSON file.
//!
//! The file holds an array of resources:
//! ```json
//! [{"kind": "ec2_instance", "id": "i-0abc", "attributes": {"region": "eu-west-1"}}]
//! ```
//! It is re-read on every poll, so edits show up in the next cycle.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Collector, CollectorError};
use crate::resource::{Resource, ResourceSet};

pub struct FileCollector {
    name: String,
    path: PathBuf,
}

impl FileCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Collector for FileCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, cancel: &CancellationToken) -> Result<ResourceSet, CollectorError> {
        let data = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
            data = tokio::fs::read(&self.path) => data?,
        };
        let resources: Vec<Resource> = serde_json::from_slice(&data)?;
        debug!(path = %self.path.display(), count = resources.len(), "Read resources from file");
        Ok(resources.into_iter().collect())
    }
}
