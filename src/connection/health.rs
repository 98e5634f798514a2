//! # Connection Health & Performance
//!
//! `ConnectionHealth` is replaced whole on every state transition so a
//! reader never observes a half-updated value; `PerformanceMetrics`
//! decays on a periodic tick rather than resetting, so spikes fade
//! gradually. Both are handed out as clones only.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Connection lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Error => write!(f, "error"),
        }
    }
}

/// Point-in-time health of the logical connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    /// Lifecycle status
    pub status: ConnectionStatus,

    /// Most recent heartbeat round-trip, in milliseconds
    pub latency_ms: u64,

    /// When the last heartbeat completed
    pub last_heartbeat: Option<DateTime<Utc>>,

    /// Reconnect attempts since the last successful connect
    pub reconnect_attempts: u32,

    /// Transport-assigned connection identifier
    pub connection_id: Option<String>,

    /// Bytes moved in the current monitor window
    pub bandwidth_bytes: u64,
}

impl ConnectionHealth {
    /// Fresh health: disconnected, nothing measured yet.
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            latency_ms: 0,
            last_heartbeat: None,
            reconnect_attempts: 0,
            connection_id: None,
            bandwidth_bytes: 0,
        }
    }

    /// Human-readable guidance for the application layer, derived from
    /// status instead of raw errors.
    pub fn recommendations(&self) -> Vec<String> {
        let mut out = Vec::new();

        match self.status {
            ConnectionStatus::Disconnected => {
                out.push("Real-time features unavailable; reconnect to resume live updates".to_string());
            }
            ConnectionStatus::Connecting => {
                out.push("Connecting; live updates will resume shortly".to_string());
            }
            ConnectionStatus::Error => {
                out.push("Connection degraded; retrying automatically".to_string());
            }
            ConnectionStatus::Connected => {}
        }

        if self.reconnect_attempts > 0 && self.status != ConnectionStatus::Connected {
            out.push(format!(
                "{} reconnection attempt(s) made; check network connectivity",
                self.reconnect_attempts
            ));
        }

        if self.status == ConnectionStatus::Connected && self.latency_ms > 5000 {
            out.push("High latency detected; real-time updates may lag".to_string());
        }

        out
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolling performance figures for the connection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceMetrics {
    /// Most recent heartbeat latency, milliseconds
    pub connection_latency_ms: u64,

    /// Most recent send round-trip, milliseconds
    pub message_delivery_ms: u64,

    /// Open channels at the last monitor tick
    pub subscription_count: usize,

    /// Decayed count of events processed
    pub event_throughput: f64,

    /// Decayed count of errors observed
    pub error_rate: f64,

    /// Cumulative reconnection attempts
    pub reconnection_rate: f64,

    /// Bytes received in the current monitor window
    pub bandwidth_incoming: u64,

    /// Bytes sent in the current monitor window
    pub bandwidth_outgoing: u64,
}

impl PerformanceMetrics {
    /// Periodic decay: rates fade by ×0.9, window counters reset.
    pub fn decay_tick(&mut self) {
        self.error_rate *= 0.9;
        self.event_throughput *= 0.9;
        self.bandwidth_incoming = 0;
        self.bandwidth_outgoing = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_health_is_disconnected() {
        let health = ConnectionHealth::new();
        assert_eq!(health.status, ConnectionStatus::Disconnected);
        assert_eq!(health.reconnect_attempts, 0);
        assert!(health.connection_id.is_none());
    }

    #[test]
    fn test_recommendations_by_status() {
        let mut health = ConnectionHealth::new();
        assert!(!health.recommendations().is_empty());

        health.status = ConnectionStatus::Connected;
        assert!(health.recommendations().is_empty());

        health.latency_ms = 6000;
        let recs = health.recommendations();
        assert_eq!(recs.len(), 1);
        assert!(recs[0].contains("latency"));
    }

    #[test]
    fn test_decay_fades_rates_and_resets_windows() {
        let mut metrics = PerformanceMetrics {
            error_rate: 10.0,
            event_throughput: 100.0,
            bandwidth_incoming: 4096,
            bandwidth_outgoing: 2048,
            ..Default::default()
        };

        metrics.decay_tick();

        assert!((metrics.error_rate - 9.0).abs() < f64::EPSILON);
        assert!((metrics.event_throughput - 90.0).abs() < f64::EPSILON);
        assert_eq!(metrics.bandwidth_incoming, 0);
        assert_eq!(metrics.bandwidth_outgoing, 0);

        // Decays toward zero but never resets abruptly
        metrics.decay_tick();
        assert!(metrics.error_rate > 8.0);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connected.to_string(), "connected");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
    }
}
