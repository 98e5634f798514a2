//! # Connection Manager
//!
//! Owns the single logical transport connection: connect/disconnect
//! gated by the circuit breaker, an explicit reconnection state machine
//! with exponential backoff, the heartbeat and performance-monitor
//! loops, and the registry of open channels.
//!
//! Lifecycle failures are absorbed here (breaker + backoff) and
//! surfaced as events; per-operation failures return typed errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerSnapshot};
use super::errors::{ConnectionError, ConnectionResult};
use super::health::{ConnectionHealth, ConnectionStatus, PerformanceMetrics};
use crate::config::RealtimeConfig;
use crate::dispatcher::{ConnectionEvent, EventBus};
use crate::tasks::TimerRegistry;
use crate::transport::{EventReceiver, SignalReceiver, Transport, TransportSignal};

/// Opaque identifier for an open channel
pub type ChannelId = Uuid;

/// Settle time between sending a heartbeat and sampling latency.
const HEARTBEAT_SETTLE: Duration = Duration::from_millis(100);

/// A channel tracked by the manager.
#[derive(Debug, Clone)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
    pub user_id: String,
    pub filter: Option<Value>,
    pub opened_at: DateTime<Utc>,
}

/// Reconnection state machine. A single owned phase prevents a manual
/// `connect()` from racing a scheduled retry.
#[derive(Debug)]
enum ReconnectPhase {
    Idle,
    BackingOff { timer_id: u64 },
    Attempting,
}

/// Manager for the single logical realtime connection.
pub struct ConnectionManager {
    config: RealtimeConfig,
    transport: Arc<dyn Transport>,
    breaker: CircuitBreaker,
    health: RwLock<ConnectionHealth>,
    metrics: RwLock<PerformanceMetrics>,
    channels: RwLock<HashMap<ChannelId, ChannelInfo>>,
    auth_token: RwLock<String>,
    events: EventBus<ConnectionEvent>,
    timers: Arc<TimerRegistry>,
    reconnect: Mutex<ReconnectPhase>,
    heartbeat_timer: Mutex<Option<u64>>,
    monitor_timer: Mutex<Option<u64>>,
    destroyed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(
        config: RealtimeConfig,
        transport: Arc<dyn Transport>,
        auth_token: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            breaker: CircuitBreaker::new(config.breaker.clone()),
            config,
            transport,
            health: RwLock::new(ConnectionHealth::new()),
            metrics: RwLock::new(PerformanceMetrics::default()),
            channels: RwLock::new(HashMap::new()),
            auth_token: RwLock::new(auth_token.into()),
            events: EventBus::new(),
            timers: Arc::new(TimerRegistry::new()),
            reconnect: Mutex::new(ReconnectPhase::Idle),
            heartbeat_timer: Mutex::new(None),
            monitor_timer: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        })
    }

    /// Subscribe to connection lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    /// The configuration this manager was built with.
    pub fn config(&self) -> &RealtimeConfig {
        &self.config
    }

    /// Establish the connection.
    ///
    /// Rejected without an attempt when the circuit breaker is open.
    /// A pending scheduled reconnect is cancelled: the manual call
    /// takes over as the one current attempt.
    pub async fn connect(self: &Arc<Self>) -> ConnectionResult<()> {
        {
            let Ok(mut phase) = self.reconnect.lock() else {
                return Err(ConnectionError::ConnectionFailed("manager poisoned".to_string()));
            };
            match *phase {
                ReconnectPhase::Attempting => {
                    return Err(ConnectionError::ConnectionFailed(
                        "connection attempt already in progress".to_string(),
                    ));
                }
                ReconnectPhase::BackingOff { timer_id } => {
                    self.timers.cancel(timer_id);
                }
                ReconnectPhase::Idle => {}
            }
            *phase = ReconnectPhase::Attempting;
        }

        let result = self.connect_once().await;
        self.set_reconnect_phase(ReconnectPhase::Idle);

        if result.is_err() && !matches!(result, Err(ConnectionError::CircuitOpen { .. })) {
            self.schedule_reconnect();
        }
        result
    }

    /// One connection attempt: breaker gate, transport connect with
    /// timeout, state + breaker + event updates. Never schedules.
    async fn connect_once(self: &Arc<Self>) -> ConnectionResult<()> {
        if !self.breaker.allow_attempt() {
            let next_attempt = self.breaker.next_attempt_time().unwrap_or_else(Utc::now);
            return Err(ConnectionError::CircuitOpen { next_attempt });
        }

        self.replace_health(|prev| ConnectionHealth {
            status: ConnectionStatus::Connecting,
            ..prev
        });

        let token = self
            .auth_token
            .read()
            .map(|t| t.clone())
            .unwrap_or_default();

        let attempt = tokio::time::timeout(self.config.reconnect_timeout, self.transport.connect(&token));

        match attempt.await {
            Ok(Ok(handle)) => {
                self.breaker.record_success();

                let connection_id = handle.connection_id.clone();
                self.replace_health(|prev| ConnectionHealth {
                    status: ConnectionStatus::Connected,
                    reconnect_attempts: 0,
                    connection_id: Some(connection_id.clone()),
                    ..prev
                });

                self.spawn_signal_watcher(handle.signals);
                self.start_heartbeat();
                self.start_monitor();

                info!(connection_id = %connection_id, "realtime connection established");
                self.events.emit(ConnectionEvent::Established { connection_id });
                Ok(())
            }
            Ok(Err(e)) => self.fail_attempt(e.to_string()),
            Err(_) => self.fail_attempt(format!(
                "connect timed out after {:?}",
                self.config.reconnect_timeout
            )),
        }
    }

    fn fail_attempt(&self, message: String) -> ConnectionResult<()> {
        self.breaker.record_failure();
        self.replace_health(|prev| ConnectionHealth {
            status: ConnectionStatus::Error,
            ..prev
        });
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.error_rate += 1.0;
        }

        warn!(%message, "realtime connection attempt failed");
        self.events.emit(ConnectionEvent::Error {
            message: message.clone(),
        });
        Err(ConnectionError::ConnectionFailed(message))
    }

    /// Close the connection and release every channel. Idempotent.
    pub async fn disconnect(&self) -> ConnectionResult<()> {
        self.stop_heartbeat();
        self.stop_monitor();
        self.cancel_pending_reconnect();

        let drained: Vec<ChannelInfo> = match self.channels.write() {
            Ok(mut channels) => channels.drain().map(|(_, info)| info).collect(),
            Err(_) => Vec::new(),
        };
        for info in drained {
            let _ = self.transport.close_channel(&info.name).await;
            self.events.emit(ConnectionEvent::ChannelUnsubscribed {
                channel_id: info.id,
                channel: info.name,
            });
        }

        let _ = self.transport.disconnect().await;

        self.replace_health(|prev| ConnectionHealth {
            status: ConnectionStatus::Disconnected,
            connection_id: None,
            reconnect_attempts: 0,
            ..prev
        });

        info!("realtime connection closed");
        self.events.emit(ConnectionEvent::Closed);
        Ok(())
    }

    /// Tear down entirely: disconnect plus cancellation of every
    /// remaining background task. Idempotent.
    pub async fn destroy(&self) -> ConnectionResult<()> {
        self.destroyed.store(true, Ordering::SeqCst);
        self.disconnect().await?;
        self.timers.cancel_all();
        Ok(())
    }

    /// Open a named channel; fails at the configured cap.
    pub async fn subscribe_to_channel(
        &self,
        name: &str,
        user_id: &str,
        filter: Option<Value>,
    ) -> ConnectionResult<(ChannelId, EventReceiver)> {
        let cap = self.config.max_concurrent_connections;
        let open = self.channels.read().map(|c| c.len()).unwrap_or(0);
        if open >= cap {
            return Err(ConnectionError::MaxConnectionsExceeded(cap));
        }

        let receiver = self
            .transport
            .open_channel(name)
            .await
            .map_err(|e| ConnectionError::SubscriptionFailed(e.to_string()))?;

        let info = ChannelInfo {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id: user_id.to_string(),
            filter,
            opened_at: Utc::now(),
        };
        let id = info.id;

        if let Ok(mut channels) = self.channels.write() {
            channels.insert(id, info);
        }

        debug!(channel = name, %id, "channel subscribed");
        self.events.emit(ConnectionEvent::ChannelSubscribed {
            channel_id: id,
            channel: name.to_string(),
        });
        Ok((id, receiver))
    }

    /// Close a channel. Idempotent for unknown ids.
    pub async fn unsubscribe_from_channel(&self, channel_id: ChannelId) -> ConnectionResult<()> {
        let info = match self.channels.write() {
            Ok(mut channels) => channels.remove(&channel_id),
            Err(_) => None,
        };

        if let Some(info) = info {
            let _ = self.transport.close_channel(&info.name).await;
            debug!(channel = %info.name, %channel_id, "channel unsubscribed");
            self.events.emit(ConnectionEvent::ChannelUnsubscribed {
                channel_id,
                channel: info.name,
            });
        }
        Ok(())
    }

    /// Send an event on a registered channel, recording delivery
    /// metrics on success.
    pub async fn send_to_channel(
        &self,
        channel_id: ChannelId,
        event: &str,
        payload: &Value,
    ) -> ConnectionResult<()> {
        let name = self
            .channels
            .read()
            .ok()
            .and_then(|c| c.get(&channel_id).map(|info| info.name.clone()))
            .ok_or(ConnectionError::ChannelNotFound(channel_id))?;

        let started = tokio::time::Instant::now();
        self.transport
            .send(&name, event, payload)
            .await
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))?;

        if let Ok(mut metrics) = self.metrics.write() {
            metrics.message_delivery_ms = started.elapsed().as_millis() as u64;
            metrics.bandwidth_outgoing += payload_size(payload);
            metrics.event_throughput += 1.0;
        }
        Ok(())
    }

    /// Swap credentials for subsequent operations without dropping the
    /// connection.
    pub async fn update_auth_token(&self, token: &str) -> ConnectionResult<()> {
        if let Ok(mut current) = self.auth_token.write() {
            *current = token.to_string();
        }
        self.transport
            .update_auth(token)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))
    }

    /// Defensive copy of the current health.
    pub fn get_health(&self) -> ConnectionHealth {
        self.health
            .read()
            .map(|h| h.clone())
            .unwrap_or_else(|_| ConnectionHealth::new())
    }

    /// Defensive copy of the current metrics.
    pub fn get_metrics(&self) -> PerformanceMetrics {
        self.metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Circuit breaker snapshot, for health reporting.
    pub fn breaker_snapshot(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.read().map(|c| c.len()).unwrap_or(0)
    }

    /// Live background tasks (heartbeat, monitor, reconnect, watcher).
    pub fn active_timer_count(&self) -> usize {
        self.timers.active_count()
    }

    /// Backoff delay for the given 0-indexed attempt:
    /// `min(retry_delay * 2^attempt, max_reconnect_delay)`.
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.config.retry_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let capped = base
            .saturating_mul(factor)
            .min(self.config.max_reconnect_delay.as_millis() as u64);
        Duration::from_millis(capped)
    }

    /// Account an inbound event against throughput and bandwidth.
    /// Called by the subscription layer, which consumes the raw stream.
    pub(crate) fn note_incoming_event(&self, payload: &Value) {
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.event_throughput += 1.0;
            metrics.bandwidth_incoming += payload_size(payload);
        }
    }

    // ------------------------------------------------------------------
    // Reconnection
    // ------------------------------------------------------------------

    /// Schedule a retry if attempts remain; settle disconnected
    /// otherwise. Never errors: the background path reports through
    /// events only.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        let Ok(mut phase) = self.reconnect.lock() else {
            return;
        };
        if !matches!(*phase, ReconnectPhase::Idle) {
            return;
        }

        let attempts = self.get_health().reconnect_attempts;
        if attempts >= self.config.max_retries {
            drop(phase);
            info!(attempts, "reconnect attempts exhausted; staying disconnected");
            self.replace_health(|prev| ConnectionHealth {
                status: ConnectionStatus::Disconnected,
                connection_id: None,
                ..prev
            });
            self.events.emit(ConnectionEvent::Closed);
            return;
        }

        let delay = self.reconnect_delay(attempts);
        debug!(attempt = attempts, ?delay, "scheduling reconnect");

        let manager = Arc::clone(self);
        let timer_id = self.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            manager.run_reconnect_attempt().await;
        });
        *phase = ReconnectPhase::BackingOff { timer_id };
    }

    async fn run_reconnect_attempt(self: Arc<Self>) {
        {
            let Ok(mut phase) = self.reconnect.lock() else {
                return;
            };
            if !matches!(*phase, ReconnectPhase::BackingOff { .. }) {
                // A manual connect() took over in the meantime
                return;
            }
            *phase = ReconnectPhase::Attempting;
        }

        // Attempt counters advance before the attempt is made
        self.replace_health(|prev| ConnectionHealth {
            reconnect_attempts: prev.reconnect_attempts + 1,
            ..prev
        });
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.reconnection_rate += 1.0;
        }

        let result = self.connect_once().await;
        self.set_reconnect_phase(ReconnectPhase::Idle);

        if result.is_err() {
            self.schedule_reconnect();
        }
    }

    fn cancel_pending_reconnect(&self) {
        if let Ok(mut phase) = self.reconnect.lock() {
            if let ReconnectPhase::BackingOff { timer_id } = *phase {
                self.timers.cancel(timer_id);
            }
            *phase = ReconnectPhase::Idle;
        }
    }

    fn set_reconnect_phase(&self, next: ReconnectPhase) {
        if let Ok(mut phase) = self.reconnect.lock() {
            *phase = next;
        }
    }

    /// React to an unexpected close or transport error.
    fn on_connection_lost(self: &Arc<Self>, reason: &str) {
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }

        warn!(%reason, "realtime connection lost");
        self.stop_heartbeat();
        self.replace_health(|prev| ConnectionHealth {
            status: ConnectionStatus::Error,
            connection_id: None,
            ..prev
        });
        if let Ok(mut metrics) = self.metrics.write() {
            metrics.error_rate += 1.0;
        }
        self.events.emit(ConnectionEvent::Error {
            message: reason.to_string(),
        });
        self.schedule_reconnect();
    }

    fn spawn_signal_watcher(self: &Arc<Self>, mut signals: SignalReceiver) {
        let manager = Arc::clone(self);
        self.timers.spawn(async move {
            while let Some(signal) = signals.recv().await {
                match signal {
                    TransportSignal::Closed { reason } => {
                        manager.on_connection_lost(&reason);
                        break;
                    }
                    TransportSignal::Error { message } => {
                        manager.on_connection_lost(&message);
                        break;
                    }
                }
            }
        });
    }

    // ------------------------------------------------------------------
    // Heartbeat & performance monitor
    // ------------------------------------------------------------------

    fn start_heartbeat(self: &Arc<Self>) {
        self.stop_heartbeat();

        let manager = Arc::clone(self);
        let id = self.timers.spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // immediate first tick is not a heartbeat
            loop {
                ticker.tick().await;
                manager.heartbeat_once().await;
            }
        });

        if let Ok(mut timer) = self.heartbeat_timer.lock() {
            *timer = Some(id);
        }
    }

    fn stop_heartbeat(&self) {
        if let Ok(mut timer) = self.heartbeat_timer.lock() {
            if let Some(id) = timer.take() {
                self.timers.cancel(id);
            }
        }
    }

    async fn heartbeat_once(self: &Arc<Self>) {
        let started = tokio::time::Instant::now();

        match self.transport.heartbeat().await {
            Ok(()) => {
                // Sample latency after a settle delay so transports that
                // acknowledge out-of-band have reported by now.
                tokio::time::sleep(HEARTBEAT_SETTLE).await;
                let latency = started.elapsed();
                let latency_ms = latency.as_millis() as u64;

                self.replace_health(|prev| ConnectionHealth {
                    latency_ms,
                    last_heartbeat: Some(Utc::now()),
                    ..prev
                });
                if let Ok(mut metrics) = self.metrics.write() {
                    metrics.connection_latency_ms = latency_ms;
                }

                // A slow heartbeat is a warning, not a failure
                if latency > self.config.high_latency_threshold {
                    warn!(latency_ms, "high heartbeat latency");
                    self.events.emit(ConnectionEvent::HighLatency { latency_ms });
                }
            }
            Err(e) => {
                self.on_connection_lost(&format!("heartbeat failed: {e}"));
            }
        }
    }

    fn start_monitor(self: &Arc<Self>) {
        self.stop_monitor();

        let manager = Arc::clone(self);
        let id = self.timers.spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.monitor_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;

                let snapshot = match manager.metrics.write() {
                    Ok(mut metrics) => {
                        metrics.decay_tick();
                        metrics.subscription_count = manager.channel_count();
                        metrics.clone()
                    }
                    Err(_) => break,
                };
                manager.events.emit(ConnectionEvent::PerformanceUpdate(snapshot));
            }
        });

        if let Ok(mut timer) = self.monitor_timer.lock() {
            *timer = Some(id);
        }
    }

    fn stop_monitor(&self) {
        if let Ok(mut timer) = self.monitor_timer.lock() {
            if let Some(id) = timer.take() {
                self.timers.cancel(id);
            }
        }
    }

    fn replace_health(&self, f: impl FnOnce(ConnectionHealth) -> ConnectionHealth) {
        if let Ok(mut health) = self.health.write() {
            // Whole-value replacement: readers clone either the old or
            // the new health, never a blend.
            let next = f(health.clone());
            *health = next;
        }
    }
}

fn payload_size(payload: &Value) -> u64 {
    serde_json::to_vec(payload).map(|v| v.len() as u64).unwrap_or(0)
}
