//! Collector registration.
//!
//! Static collectors are fixed when the registry is built. Dynamic collectors
//! come in named groups (one per discovery configuration) that can be
//! replaced or removed at any time. A cycle takes a snapshot with
//! [`CollectorRegistry::collectors`] and polls exactly that list, so changes
//! only take effect on the next cycle.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::info;

use super::Collector;

pub struct CollectorRegistry {
    static_collectors: Vec<Arc<dyn Collector>>,
    dynamic: RwLock<BTreeMap<String, Vec<Arc<dyn Collector>>>>,
    /// Bumped on every dynamic change and on explicit reload requests.
    generation: watch::Sender<u64>,
}

impl CollectorRegistry {
    pub fn new(static_collectors: Vec<Arc<dyn Collector>>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            static_collectors,
            dynamic: RwLock::new(BTreeMap::new()),
            generation,
        }
    }

    /// Snapshot of every registered collector, in precedence order.
    ///
    /// Static collectors come first in configuration order, then dynamic
    /// groups sorted by group name. The merge keeps the first resource seen
    /// per key, so this order decides who wins a collision.
    pub async fn collectors(&self) -> Vec<Arc<dyn Collector>> {
        let dynamic = self.dynamic.read().await;
        let mut all = Vec::with_capacity(
            self.static_collectors.len() + dynamic.values().map(Vec::len).sum::<usize>(),
        );
        all.extend(self.static_collectors.iter().cloned());
        for group in dynamic.values() {
            all.extend(group.iter().cloned());
        }
        all
    }

    /// Register a dynamic group, replacing any group with the same name.
    pub async fn register(&self, group: impl Into<String>, collectors: Vec<Arc<dyn Collector>>) {
        let group = group.into();
        {
            let mut dynamic = self.dynamic.write().await;
            info!(group = %group, collectors = collectors.len(), "Registering dynamic collectors");
            dynamic.insert(group, collectors);
        }
        self.request_reload();
    }

    /// Drop a dynamic group. Returns whether it existed.
    pub async fn unregister(&self, group: &str) -> bool {
        let removed = self.dynamic.write().await.remove(group).is_some();
        if removed {
            info!(group = %group, "Removed dynamic collectors");
            self.request_reload();
        }
        removed
    }

    /// Ask subscribers for an immediate extra cycle.
    pub fn request_reload(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }

    /// Receiver that wakes up on every reload request.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}
