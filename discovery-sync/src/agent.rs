//! Sync agent: owns the connection to the access graph service and drives
//! reconciliation cycles over it.
//!
//! ```text
//! Connecting ──ok──▶ Streaming ──health lost / push failed──▶ Disconnected
//!     ▲                  │  ▲                                     │
//!     │                  └──┘ cycle, then wait for                │
//!     │                       15 min tick or reload               │
//!     └──────────────────── 30s delay ◀───────────────────────────┘
//!
//! any state ──shutdown──▶ Terminated
//! ```
//!
//! Every time a stream is opened the snapshot starts empty, so the first
//! cycle on a connection is a full resync.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collector::{poll_all, CollectorRegistry};
use crate::push::{push, EventSink, PushError};
use crate::reconcile::reconcile;
use crate::resource::ResourceSet;
use crate::transport::{Connection, Transport};

/// Interval between cycles when nothing else triggers one.
pub const FULL_SYNC_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Delay before reconnecting after the connection was lost.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Connection lifecycle states.
enum State<C> {
    Connecting,
    Streaming(C),
    Disconnected { reason: String },
    Terminated,
}

/// Run one reconciliation cycle: poll all collectors, merge, diff against
/// `snapshot` and push the diff.
///
/// On success `snapshot` becomes the merged state. On failure it is left
/// alone; the caller is expected to drop the connection.
pub async fn run_cycle<S>(
    registry: &CollectorRegistry,
    snapshot: &mut ResourceSet,
    sink: &mut S,
    cancel: &CancellationToken,
) -> Result<(), PushError>
where
    S: EventSink + ?Sized,
{
    let collectors = registry.collectors().await;
    let (sets, errors) = poll_all(&collectors, cancel).await.into_parts();

    // Partial results from an interrupted round would turn into deletes, and
    // its failures are just the cancellation.
    if cancel.is_cancelled() {
        return Err(PushError::Cancelled);
    }
    if let Some(errors) = errors {
        error!(error = %errors, "Error polling collectors");
    }

    let current = ResourceSet::merge(&sets);
    let diff = reconcile(snapshot, &current);
    info!(
        collectors = collectors.len(),
        resources = current.len(),
        upserts = diff.upsert.len(),
        deletes = diff.delete.len(),
        "Reconciled discovered resources"
    );

    let pushed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PushError::Cancelled),
        result = push(sink, &diff) => result,
    };
    if let Err(e) = pushed {
        error!(error = %e, "Error pushing resources to access graph service");
        return Err(e);
    }

    *snapshot = current;
    Ok(())
}

/// Watches a connection and cancels the cycle token once it stops being usable.
///
/// Resolves to the reason if it fired, `None` if the cycle ended first.
fn spawn_health_observer(
    closed: BoxFuture<'static, String>,
    cycle: CancellationToken,
) -> JoinHandle<Option<String>> {
    tokio::spawn(async move {
        tokio::select! {
            reason = closed => {
                info!(reason = %reason, "Access graph connection is no longer ready");
                cycle.cancel();
                Some(reason)
            }
            _ = cycle.cancelled() => None,
        }
    })
}

/// Keeps the access graph service in sync with the registered collectors.
pub struct SyncAgent<T: Transport> {
    transport: T,
    registry: Arc<CollectorRegistry>,
    reload: watch::Receiver<u64>,
    reload_closed: bool,
}

impl<T: Transport> SyncAgent<T> {
    /// Create an agent; reload requests come from the registry.
    pub fn new(transport: T, registry: Arc<CollectorRegistry>) -> Self {
        let reload = registry.subscribe();
        Self::with_reload(transport, registry, reload)
    }

    /// Create an agent with an explicit reload signal.
    pub fn with_reload(
        transport: T,
        registry: Arc<CollectorRegistry>,
        reload: watch::Receiver<u64>,
    ) -> Self {
        Self {
            transport,
            registry,
            reload,
            reload_closed: false,
        }
    }

    /// Run until `shutdown` is cancelled. Never returns early on errors.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Sync agent started");

        let mut state = State::Connecting;
        loop {
            state = match state {
                State::Connecting => self.connect(&shutdown).await,
                State::Streaming(connection) => self.stream(connection, &shutdown).await,
                State::Disconnected { reason } => Self::back_off(reason, &shutdown).await,
                State::Terminated => break,
            };
        }

        info!("Sync agent stopped");
    }

    async fn connect(&self, shutdown: &CancellationToken) -> State<T::Connection> {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => State::Terminated,
            result = self.transport.connect() => match result {
                Ok(connection) => {
                    info!("Connected to access graph service");
                    State::Streaming(connection)
                }
                Err(e) => State::Disconnected {
                    reason: format!("connect failed: {e}"),
                },
            },
        }
    }

    async fn back_off(reason: String, shutdown: &CancellationToken) -> State<T::Connection> {
        warn!(
            reason = %reason,
            "Disconnected from access graph service, reconnecting in {}s",
            RECONNECT_DELAY.as_secs()
        );
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => State::Terminated,
            _ = tokio::time::sleep(RECONNECT_DELAY) => State::Connecting,
        }
    }

    async fn stream(
        &mut self,
        mut connection: T::Connection,
        shutdown: &CancellationToken,
    ) -> State<T::Connection> {
        let reason = self.stream_cycles(&mut connection, shutdown).await;
        connection.shutdown().await;

        if shutdown.is_cancelled() {
            State::Terminated
        } else {
            State::Disconnected { reason }
        }
    }

    /// Run cycles on a fresh stream until something ends it; returns why.
    async fn stream_cycles(
        &mut self,
        connection: &mut T::Connection,
        shutdown: &CancellationToken,
    ) -> String {
        let mut stream = match connection.open_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to get access graph service stream");
                return e.to_string();
            }
        };

        let cycle = shutdown.child_token();
        let observer = spawn_health_observer(connection.closed(), cycle.clone());

        // Nothing is known to be on the remote side for this stream yet.
        let mut snapshot = ResourceSet::new();
        self.reload.borrow_and_update();
        let mut ticker = interval_at(Instant::now() + FULL_SYNC_INTERVAL, FULL_SYNC_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let failure = loop {
            if let Err(e) = run_cycle(&self.registry, &mut snapshot, &mut stream, &cycle).await {
                break Some(e);
            }
            if !self.next_cycle(&mut ticker, &cycle).await {
                break None;
            }
        };

        cycle.cancel();
        let lost = observer.await.unwrap_or(None);
        drop(stream);

        match (lost, failure) {
            (Some(reason), _) => reason,
            (None, Some(e)) if !shutdown.is_cancelled() => format!("push failed: {e}"),
            _ => "shutdown".to_string(),
        }
    }

    /// Wait for the next cycle trigger. Returns `false` once `cycle` is cancelled.
    async fn next_cycle(&mut self, ticker: &mut Interval, cycle: &CancellationToken) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = cycle.cancelled() => return false,
                _ = ticker.tick() => {
                    debug!("Periodic sync cycle");
                    return true;
                }
                changed = self.reload.changed(), if !self.reload_closed => match changed {
                    Ok(()) => {
                        info!("Collector configuration changed, starting extra sync cycle");
                        return true;
                    }
                    Err(_) => self.reload_closed = true,
                },
            }
        }
    }
}
