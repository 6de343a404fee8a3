//! Shared test infrastructure: a scripted in-memory transport and
//! collectors whose output can be changed between cycles.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use discovery_sync::{
    Collector, CollectorError, Connection, EventSink, PushError, Resource, ResourceSet,
    SyncEvent, Transport, TransportError,
};

/// What the transport does on one connect attempt.
#[derive(Debug, Clone, Copy)]
pub enum Attempt {
    /// Fail the attempt.
    Refuse,
    /// Accept; the stream fails on the send after `fail_after` successful ones.
    Accept { fail_after: Option<usize> },
}

#[derive(Default)]
struct Shared {
    script: Mutex<VecDeque<Attempt>>,
    attempts: Mutex<usize>,
    /// Events per established connection, in connection order.
    events: Mutex<Vec<Vec<SyncEvent>>>,
    kill_switches: Mutex<Vec<CancellationToken>>,
    shutdowns: Mutex<Vec<usize>>,
}

/// In-memory transport that follows a script of connect attempts.
///
/// Once the script runs out every attempt is accepted.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Attempt>) -> Self {
        let transport = Self::default();
        transport.shared.script.lock().unwrap().extend(script);
        transport
    }

    /// Number of connect attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        *self.shared.attempts.lock().unwrap()
    }

    /// Number of established connections.
    pub fn connections(&self) -> usize {
        self.shared.events.lock().unwrap().len()
    }

    pub fn events(&self, connection: usize) -> Vec<SyncEvent> {
        self.shared
            .events
            .lock()
            .unwrap()
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of sync markers received on a connection.
    pub fn syncs(&self, connection: usize) -> usize {
        self.events(connection)
            .iter()
            .filter(|e| matches!(e, SyncEvent::Sync))
            .count()
    }

    /// Events of the `cycle`-th cycle (0-based) on a connection, sync marker included.
    pub fn cycle(&self, connection: usize, cycle: usize) -> Vec<SyncEvent> {
        self.events(connection)
            .split_inclusive(|e| matches!(e, SyncEvent::Sync))
            .nth(cycle)
            .map(<[SyncEvent]>::to_vec)
            .unwrap_or_default()
    }

    /// Simulate the transport dying underneath a connection.
    pub fn kill(&self, connection: usize) {
        self.shared.kill_switches.lock().unwrap()[connection].cancel();
    }

    /// Whether the agent released a connection.
    pub fn was_shut_down(&self, connection: usize) -> bool {
        self.shared.shutdowns.lock().unwrap().contains(&connection)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    type Connection = ScriptedConnection;

    async fn connect(&self) -> Result<ScriptedConnection, TransportError> {
        *self.shared.attempts.lock().unwrap() += 1;
        let attempt = self
            .shared
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Attempt::Accept { fail_after: None });

        match attempt {
            Attempt::Refuse => Err(TransportError::InvalidEndpoint("connection refused".into())),
            Attempt::Accept { fail_after } => {
                let mut events = self.shared.events.lock().unwrap();
                let id = events.len();
                events.push(Vec::new());
                let killed = CancellationToken::new();
                self.shared.kill_switches.lock().unwrap().push(killed.clone());
                Ok(ScriptedConnection {
                    id,
                    shared: Arc::clone(&self.shared),
                    killed,
                    fail_after,
                })
            }
        }
    }
}

pub struct ScriptedConnection {
    id: usize,
    shared: Arc<Shared>,
    killed: CancellationToken,
    fail_after: Option<usize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    type Stream = ScriptedStream;

    async fn open_stream(&mut self) -> Result<ScriptedStream, TransportError> {
        Ok(ScriptedStream {
            id: self.id,
            shared: Arc::clone(&self.shared),
            sent: 0,
            fail_after: self.fail_after,
        })
    }

    fn closed(&self) -> BoxFuture<'static, String> {
        let killed = self.killed.clone();
        Box::pin(async move {
            killed.cancelled().await;
            "connection reset".to_string()
        })
    }

    async fn shutdown(&mut self) {
        self.shared.shutdowns.lock().unwrap().push(self.id);
    }
}

pub struct ScriptedStream {
    id: usize,
    shared: Arc<Shared>,
    sent: usize,
    fail_after: Option<usize>,
}

#[async_trait]
impl EventSink for ScriptedStream {
    async fn send(&mut self, event: SyncEvent) -> Result<(), PushError> {
        if self.fail_after == Some(self.sent) {
            return Err(PushError::StreamClosed);
        }
        self.sent += 1;
        self.shared.events.lock().unwrap()[self.id].push(event);
        Ok(())
    }
}

/// Collector whose output can be swapped between cycles.
pub struct SwitchableCollector {
    name: String,
    resources: Mutex<Vec<Resource>>,
}

impl SwitchableCollector {
    pub fn new(name: &str, resources: Vec<Resource>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            resources: Mutex::new(resources),
        })
    }

    pub fn set(&self, resources: Vec<Resource>) {
        *self.resources.lock().unwrap() = resources;
    }
}

#[async_trait]
impl Collector for SwitchableCollector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&self, _cancel: &CancellationToken) -> Result<ResourceSet, CollectorError> {
        Ok(self.resources.lock().unwrap().iter().cloned().collect())
    }
}

/// How long a [`HeldCollector`] poll takes.
#[derive(Debug, Clone, Copy)]
pub enum Hold {
    Nothing,
    For(Duration),
    UntilCancelled,
}

/// Collector with a fixed result whose polls can be slowed down or blocked.
pub struct HeldCollector {
    resources: Vec<Resource>,
    hold: Mutex<Hold>,
    polls: AtomicUsize,
}

impl HeldCollector {
    pub fn new(resources: Vec<Resource>) -> Arc<Self> {
        Arc::new(Self {
            resources,
            hold: Mutex::new(Hold::Nothing),
            polls: AtomicUsize::new(0),
        })
    }

    pub fn hold(&self, hold: Hold) {
        *self.hold.lock().unwrap() = hold;
    }

    /// Polls started so far.
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for HeldCollector {
    fn name(&self) -> &str {
        "held"
    }

    async fn poll(&self, cancel: &CancellationToken) -> Result<ResourceSet, CollectorError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let hold = *self.hold.lock().unwrap();
        match hold {
            Hold::Nothing => {}
            Hold::For(delay) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
                }
            }
            Hold::UntilCancelled => {
                cancel.cancelled().await;
                return Err(CollectorError::Cancelled);
            }
        }
        Ok(self.resources.iter().cloned().collect())
    }
}

pub fn users(ids: &[&str]) -> Vec<Resource> {
    ids.iter().map(|id| Resource::new("iam_user", *id)).collect()
}

/// Poll `condition` until it holds, letting (paused) time move forward.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("condition not reached");
}
