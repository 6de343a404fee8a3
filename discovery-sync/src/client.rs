//! gRPC client for the access graph service.
//!
//! Connections use mutual TLS 1.3 and HTTP/2 keepalive. TLS is done by our
//! own connector so the protocol version can be pinned. Each connection
//! carries one bidirectional `ResourceEventsStream` call, driven by a task
//! that the connection owns. The connection counts as closed once that call
//! ends or the server's health service stops reporting `SERVING`.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Code;
use tower::service_fn;
use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::proto::accessgraph::access_graph_service_client::AccessGraphServiceClient;
use crate::proto::accessgraph::{
    resource_events_request, ResourceEventsRequest, ResourceList, SyncMarker,
};
use crate::proto::health::health_check_response::ServingStatus;
use crate::proto::health::health_client::HealthClient;
use crate::proto::health::HealthCheckRequest;
use crate::push::{EventSink, PushError, SyncEvent};
use crate::transport::{Connection, Transport, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(20);
/// Outbound messages buffered before `send` waits on the transport.
const STREAM_BUFFER: usize = 16;
const DEFAULT_PORT: u16 = 443;

impl From<SyncEvent> for ResourceEventsRequest {
    fn from(event: SyncEvent) -> Self {
        let operation = match event {
            SyncEvent::Upsert(resources) => resource_events_request::Operation::Upsert(ResourceList {
                resources: resources.iter().map(Into::into).collect(),
            }),
            SyncEvent::Delete(resources) => resource_events_request::Operation::Delete(ResourceList {
                resources: resources.iter().map(Into::into).collect(),
            }),
            SyncEvent::Sync => resource_events_request::Operation::Sync(SyncMarker {}),
        };
        ResourceEventsRequest {
            operation: Some(operation),
        }
    }
}

/// Resolved dial target of a `https://host:port` endpoint.
#[derive(Debug, Clone)]
struct Target {
    host: String,
    port: u16,
    server_name: ServerName<'static>,
    /// What tonic sees. TLS happens below it, so the scheme is plain `http`.
    uri: Uri,
}

impl Target {
    fn parse(config: &GraphConfig) -> Result<Self, TransportError> {
        let invalid =
            |reason: String| TransportError::InvalidEndpoint(format!("{}: {reason}", config.endpoint));

        let uri: Uri = config.endpoint.parse().map_err(|e| invalid(format!("{e}")))?;
        if uri.scheme_str() != Some("https") {
            return Err(invalid("scheme must be https".to_string()));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| invalid("missing host".to_string()))?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = authority.port_u16().unwrap_or(DEFAULT_PORT);

        let name = config.server_name.clone().unwrap_or_else(|| host.clone());
        let server_name = ServerName::try_from(name).map_err(|e| invalid(e.to_string()))?;

        let uri = Uri::builder()
            .scheme("http")
            .authority(authority.as_str())
            .path_and_query("/")
            .build()
            .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            host,
            port,
            server_name,
            uri,
        })
    }
}

/// Open a TCP connection and run the TLS handshake on it.
async fn dial(connector: TlsConnector, target: Target) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect((target.host.as_str(), target.port)).await?;
    tcp.set_nodelay(true)?;
    let tls = connector.connect(target.server_name, tcp).await?;
    debug!(
        version = ?tls.get_ref().1.protocol_version(),
        "TLS handshake with access graph service complete"
    );
    Ok(tls)
}

/// Connects to the access graph service.
pub struct GraphTransport {
    config: GraphConfig,
}

impl GraphTransport {
    pub fn new(config: GraphConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for GraphTransport {
    type Connection = GraphConnection;

    async fn connect(&self) -> Result<GraphConnection, TransportError> {
        let target = Target::parse(&self.config)?;
        let connector = TlsConnector::from(Arc::new(self.config.tls_config().await?));

        info!("Connecting to access graph service: {}", self.config.endpoint);
        let channel = Endpoint::from(target.uri.clone())
            .connect_timeout(CONNECT_TIMEOUT)
            .http2_keep_alive_interval(KEEPALIVE_INTERVAL)
            .keep_alive_timeout(KEEPALIVE_TIMEOUT)
            .keep_alive_while_idle(true)
            .connect_with_connector(service_fn(move |_: Uri| {
                let handshake = dial(connector.clone(), target.clone());
                async move { handshake.await.map(TokioIo::new) }
            }))
            .await?;

        Ok(GraphConnection::new(channel))
    }
}

/// An established channel plus the event stream running on it.
pub struct GraphConnection {
    channel: Channel,
    /// Task driving the `ResourceEventsStream` call.
    driver: Option<JoinHandle<()>>,
    /// Cancelled when the driver exits.
    stream_ended: CancellationToken,
}

impl GraphConnection {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            driver: None,
            stream_ended: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Connection for GraphConnection {
    type Stream = GraphStream;

    async fn open_stream(&mut self) -> Result<GraphStream, TransportError> {
        if self.driver.is_some() {
            return Err(TransportError::OpenStream(
                "event stream already open on this connection".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut client = AccessGraphServiceClient::new(self.channel.clone());
        let ended = self.stream_ended.clone();

        // The call only resolves once the server sends headers, so it runs in
        // its own task and sends go through the channel right away.
        self.driver = Some(tokio::spawn(async move {
            let _ended = ended.drop_guard();
            let mut inbound = match client.resource_events_stream(ReceiverStream::new(rx)).await {
                Ok(response) => response.into_inner(),
                Err(status) => {
                    warn!(error = %status, "Access graph service rejected event stream");
                    return;
                }
            };
            loop {
                match inbound.message().await {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        info!("Access graph service closed the event stream");
                        return;
                    }
                    Err(status) => {
                        warn!(error = %status, "Event stream failed");
                        return;
                    }
                }
            }
        }));

        Ok(GraphStream { tx })
    }

    fn closed(&self) -> BoxFuture<'static, String> {
        let channel = self.channel.clone();
        let stream_ended = self.stream_ended.clone();
        Box::pin(async move {
            tokio::select! {
                _ = stream_ended.cancelled() => "event stream ended".to_string(),
                reason = watch_health(channel) => reason,
            }
        })
    }

    async fn shutdown(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
            let _ = driver.await;
        }
    }
}

impl Drop for GraphConnection {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

/// Wait until the server's health service reports anything but `SERVING`.
///
/// Servers without a health service answer `UNIMPLEMENTED`; for those only
/// the event stream itself is watched, so this never resolves.
async fn watch_health(channel: Channel) -> String {
    let mut client = HealthClient::new(channel);
    let request = HealthCheckRequest {
        service: String::new(),
    };

    let mut updates = match client.watch(request).await {
        Ok(response) => response.into_inner(),
        Err(status) if status.code() == Code::Unimplemented => {
            debug!("Access graph service has no health service, watching the event stream only");
            return std::future::pending().await;
        }
        Err(status) => return format!("health watch failed: {status}"),
    };

    loop {
        match updates.message().await {
            Ok(Some(update)) => match update.status() {
                ServingStatus::Serving => debug!("Access graph service is serving"),
                other => return format!("access graph service is {}", other.as_str_name()),
            },
            Ok(None) => return "health watch ended".to_string(),
            Err(status) => return format!("health watch failed: {status}"),
        }
    }
}

/// Write half of the event stream.
pub struct GraphStream {
    tx: mpsc::Sender<ResourceEventsRequest>,
}

#[async_trait]
impl EventSink for GraphStream {
    async fn send(&mut self, event: SyncEvent) -> Result<(), PushError> {
        self.tx
            .send(event.into())
            .await
            .map_err(|_| PushError::StreamClosed)
    }
}
