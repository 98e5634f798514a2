//! # Subscription Errors
//!
//! Failure domain of the subscription manager.

use thiserror::Error;

use crate::connection::errors::ConnectionError;

/// Result type for subscription operations
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;

/// Subscription-layer errors
#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    /// The channel's token bucket is exhausted; retry after the window
    #[error("Rate limit exceeded for channel: {0}")]
    RateLimitExceeded(String),

    /// A guardian action the permission set does not allow
    #[error("Unauthorized guardian action: {0}")]
    UnauthorizedGuardianAction(String),

    /// An inbound payload did not match the expected event shape
    #[error("Invalid event payload: {0}")]
    InvalidPayload(String),

    /// Connection-layer failure, passed through
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}
