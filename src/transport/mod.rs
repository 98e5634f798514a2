//! # Transport Seam
//!
//! The realtime layer owns one logical connection to an event source,
//! but never opens sockets itself: the actual wire protocol lives
//! behind the [`Transport`] trait. The managers drive connect,
//! channel, send and heartbeat primitives and consume two raw streams:
//! per-channel events and connection-level signals.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::event::ChannelEvent;

pub mod mock;

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Receiver for raw events on one channel
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelEvent>;

/// Receiver for connection-level signals
pub type SignalReceiver = mpsc::UnboundedReceiver<TransportSignal>;

/// Errors produced by the transport implementation
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection attempt failed
    #[error("Transport connect failed: {0}")]
    ConnectFailed(String),

    /// Operation requires an established connection
    #[error("Transport not connected")]
    NotConnected,

    /// Channel could not be opened or closed
    #[error("Channel operation failed: {0}")]
    ChannelFailed(String),

    /// Outbound send failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Heartbeat was not acknowledged
    #[error("Heartbeat failed: {0}")]
    HeartbeatFailed(String),

    /// Credentials were rejected
    #[error("Auth rejected: {0}")]
    AuthRejected(String),
}

/// Out-of-band signal from the transport about the connection itself.
#[derive(Debug, Clone)]
pub enum TransportSignal {
    /// The connection closed unexpectedly
    Closed { reason: String },

    /// A recoverable transport error occurred
    Error { message: String },
}

/// Handle returned from a successful connect.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Opaque connection identifier assigned by the transport
    pub connection_id: String,

    /// Signal stream; ends when the connection is closed locally
    pub signals: SignalReceiver,
}

/// The wire-level collaborator: connect/disconnect, multiplexed
/// channels, sends and heartbeats. Implementations must be cheap to
/// share (`Arc<dyn Transport>`).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the logical connection with the given credentials.
    async fn connect(&self, auth_token: &str) -> TransportResult<ConnectionHandle>;

    /// Close the logical connection. Idempotent.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Open a named channel and return its raw event stream.
    async fn open_channel(&self, name: &str) -> TransportResult<EventReceiver>;

    /// Close a named channel. Idempotent for unknown names.
    async fn close_channel(&self, name: &str) -> TransportResult<()>;

    /// Send an event on an open channel.
    async fn send(&self, channel: &str, event: &str, payload: &Value) -> TransportResult<()>;

    /// Send a heartbeat; resolves when acknowledged.
    async fn heartbeat(&self) -> TransportResult<()>;

    /// Swap credentials for subsequent operations without reconnecting.
    async fn update_auth(&self, token: &str) -> TransportResult<()>;
}
