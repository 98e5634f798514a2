//! # Connection Errors
//!
//! Failure domain of the connection manager.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Result type for connection operations
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Connection-layer errors
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    /// The circuit breaker rejected the attempt before it was made
    #[error("Circuit breaker is open; next attempt allowed at {next_attempt}")]
    CircuitOpen { next_attempt: DateTime<Utc> },

    /// A connection attempt failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Channel cap reached; existing channels are untouched
    #[error("Maximum concurrent channels exceeded (max: {0})")]
    MaxConnectionsExceeded(usize),

    /// Per-channel operation addressed an unknown channel
    #[error("Channel not found: {0}")]
    ChannelNotFound(Uuid),

    /// Channel could not be registered
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Outbound send failed; the message was not delivered
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// The transport connection is gone
    #[error("Transport closed")]
    TransportClosed,
}
