//! discovery-sync: keeps the access graph service in sync with discovered resources.
//!
//! Every cycle the agent
//! - polls all registered collectors (at most three at a time)
//! - merges their results into one resource set
//! - diffs it against what the service already has
//! - streams the diff as upsert/delete batches followed by a sync marker
//!
//! Connection loss, push failures and configuration reloads are handled by
//! [`SyncAgent`]; each new connection starts with a full resync.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use discovery_sync::{CollectorRegistry, FileCollector, GraphConfig, GraphTransport, SyncAgent};
//!
//! let registry = Arc::new(CollectorRegistry::new(vec![Arc::new(FileCollector::new("resources.json"))]));
//! let agent = SyncAgent::new(GraphTransport::new(config), registry);
//! agent.run(shutdown).await;
//! ```

pub mod agent;
pub mod client;
pub mod collector;
pub mod config;
pub mod proto;
pub mod push;
pub mod reconcile;
pub mod resource;
pub mod transport;

pub use agent::{run_cycle, SyncAgent, FULL_SYNC_INTERVAL, RECONNECT_DELAY};
pub use client::{GraphConnection, GraphStream, GraphTransport};
pub use collector::{Collector, CollectorError, CollectorRegistry, FileCollector};
pub use config::GraphConfig;
pub use push::{push, EventSink, PushError, SyncEvent, BATCH_SIZE};
pub use reconcile::{reconcile, Diff};
pub use resource::{Resource, ResourceKey, ResourceSet};
pub use transport::{Connection, Transport, TransportError};
