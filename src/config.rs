//! # Configuration
//!
//! All tunables for the realtime layer, with production defaults.

use std::time::Duration;

/// Configuration for the connection and subscription managers.
///
/// Every field has a production default; construct with
/// `RealtimeConfig::default()` and override what you need.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Maximum automatic reconnection attempts before giving up.
    pub max_retries: u32,

    /// Base delay for reconnection backoff (doubles per attempt).
    pub retry_delay: Duration,

    /// Ceiling for the reconnection backoff delay.
    pub max_reconnect_delay: Duration,

    /// Interval between heartbeats on an established connection.
    pub heartbeat_interval: Duration,

    /// Time allowed for a single connection attempt.
    pub reconnect_timeout: Duration,

    /// Maximum number of concurrently open channels.
    pub max_concurrent_connections: usize,

    /// Advisory pool sizing for transports that pool sockets; the
    /// manager itself holds one logical connection.
    pub connection_pool_size: usize,

    /// Heartbeat latency above this emits `connection:high_latency`.
    pub high_latency_threshold: Duration,

    /// Interval between performance-metric decay ticks.
    pub monitor_interval: Duration,

    /// Circuit breaker thresholds and cool-down.
    pub breaker: CircuitBreakerConfig,

    /// Per-channel rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Compliance cache and heuristic checker settings.
    pub compliance: ComplianceConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_delay: Duration::from_millis(1000),
            max_reconnect_delay: Duration::from_millis(30_000),
            heartbeat_interval: Duration::from_millis(30_000),
            reconnect_timeout: Duration::from_millis(5000),
            max_concurrent_connections: 10,
            connection_pool_size: 5,
            high_latency_threshold: Duration::from_millis(5000),
            monitor_interval: Duration::from_secs(60),
            breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            compliance: ComplianceConfig::default(),
        }
    }
}

/// Circuit breaker thresholds.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit.
    pub success_threshold: u32,

    /// Cool-down before an open circuit admits a probe attempt.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Token-bucket rate limiting, per channel.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens per window.
    pub burst_limit: u32,

    /// Window length; the bucket refills whole at each window boundary.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst_limit: 50,
            window: Duration::from_secs(1),
        }
    }
}

/// Compliance gate settings.
#[derive(Debug, Clone)]
pub struct ComplianceConfig {
    /// Time-to-live for cached verdicts.
    pub cache_ttl: Duration,

    /// Terms the built-in heuristic checker flags (case-insensitive
    /// substring match).
    pub denylist: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_millis(3_600_000),
            denylist: vec![
                "meet alone".to_string(),
                "phone number".to_string(),
                "home address".to_string(),
                "whatsapp".to_string(),
                "telegram".to_string(),
                "send money".to_string(),
                "bank account".to_string(),
            ],
        }
    }
}
