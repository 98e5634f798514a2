//! # Connection Layer
//!
//! The single logical transport connection and everything guarding it:
//!
//! - **Circuit Breaker**: stops reconnect hot-loops against a failing
//!   endpoint
//! - **Health / Metrics**: replaced-whole health snapshots and decaying
//!   performance figures
//! - **Manager**: connect/disconnect, heartbeat, reconnection state
//!   machine, channel registry

pub mod circuit_breaker;
pub mod errors;
pub mod health;
pub mod manager;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot, CircuitState};
pub use errors::{ConnectionError, ConnectionResult};
pub use health::{ConnectionHealth, ConnectionStatus, PerformanceMetrics};
pub use manager::{ChannelId, ChannelInfo, ConnectionManager};
