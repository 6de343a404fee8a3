//! Transport seam between the sync agent and the access graph service.
//!
//! The agent only sees these traits, which keeps the connection state
//! machine independent of gRPC. [`crate::client`] has the tonic version.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::push::EventSink;

/// Errors while establishing a connection or opening the event stream.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to read {what} {}: {source}", .path.display())]
    ReadFile {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid {what} {}: {reason}", .path.display())]
    InvalidPem {
        what: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid endpoint {0}")]
    InvalidEndpoint(String),

    #[error("invalid TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("transport error: {0}")]
    Connect(#[from] tonic::transport::Error),

    #[error("failed to open event stream: {0}")]
    OpenStream(String),
}

/// Factory for connections to the graph service.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection;

    /// Establish an authenticated connection. No retries.
    async fn connect(&self) -> Result<Self::Connection, TransportError>;
}

/// One established connection.
#[async_trait]
pub trait Connection: Send + 'static {
    type Stream: EventSink + 'static;

    /// Open the bidirectional event stream.
    async fn open_stream(&mut self) -> Result<Self::Stream, TransportError>;

    /// Resolves with a reason once the connection is no longer usable.
    fn closed(&self) -> BoxFuture<'static, String>;

    /// Release the connection and join its background tasks.
    async fn shutdown(&mut self);
}
