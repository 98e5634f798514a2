//! # In-Memory Transport
//!
//! A scriptable [`Transport`] for tests: connect attempts can be made
//! to fail, raw events can be injected into open channels, unexpected
//! disconnects can be simulated, and outbound sends are recorded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{
    ConnectionHandle, EventReceiver, Transport, TransportError, TransportResult, TransportSignal,
};
use crate::event::ChannelEvent;

/// A message sent through the mock, recorded for assertions.
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

#[derive(Default)]
struct MockInner {
    fail_connects: u32,
    fail_heartbeats: bool,
    connected: bool,
    signal_tx: Option<mpsc::UnboundedSender<TransportSignal>>,
    channels: HashMap<String, mpsc::UnboundedSender<ChannelEvent>>,
    sent: Vec<SentMessage>,
    auth_token: String,
}

/// Scriptable in-memory transport.
#[derive(Default)]
pub struct MockTransport {
    inner: Mutex<MockInner>,
    connect_calls: AtomicU32,
    heartbeat_calls: AtomicU32,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.lock().unwrap().fail_connects = n;
    }

    /// Make heartbeats fail until cleared.
    pub fn fail_heartbeats(&self, fail: bool) {
        self.inner.lock().unwrap().fail_heartbeats = fail;
    }

    /// Inject a raw event into an open channel. Returns false when the
    /// channel is not open (event is dropped).
    pub fn inject(&self, channel: &str, event: ChannelEvent) -> bool {
        let inner = self.inner.lock().unwrap();
        match inner.channels.get(channel) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Simulate an unexpected disconnect.
    pub fn drop_connection(&self, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        if let Some(tx) = inner.signal_tx.take() {
            let _ = tx.send(TransportSignal::Closed {
                reason: reason.to_string(),
            });
        }
    }

    /// Everything sent through the mock so far.
    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Number of connect attempts made, including failed ones.
    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::Relaxed)
    }

    /// Number of heartbeats attempted.
    pub fn heartbeat_calls(&self) -> u32 {
        self.heartbeat_calls.load(Ordering::Relaxed)
    }

    /// Whether the mock currently considers itself connected.
    pub fn is_connected(&self) -> bool {
        self.inner.lock().unwrap().connected
    }

    /// Names of channels currently open.
    pub fn open_channels(&self) -> Vec<String> {
        self.inner.lock().unwrap().channels.keys().cloned().collect()
    }

    /// The auth token most recently supplied.
    pub fn auth_token(&self) -> String {
        self.inner.lock().unwrap().auth_token.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, auth_token: &str) -> TransportResult<ConnectionHandle> {
        self.connect_calls.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().unwrap();
        if inner.fail_connects > 0 {
            inner.fail_connects -= 1;
            return Err(TransportError::ConnectFailed(
                "scripted connect failure".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.connected = true;
        inner.signal_tx = Some(tx);
        inner.auth_token = auth_token.to_string();

        Ok(ConnectionHandle {
            connection_id: format!("mock-{}", Uuid::new_v4()),
            signals: rx,
        })
    }

    async fn disconnect(&self) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.connected = false;
        inner.signal_tx = None;
        inner.channels.clear();
        Ok(())
    }

    async fn open_channel(&self, name: &str) -> TransportResult<EventReceiver> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .unwrap()
            .channels
            .insert(name.to_string(), tx);
        Ok(rx)
    }

    async fn close_channel(&self, name: &str) -> TransportResult<()> {
        self.inner.lock().unwrap().channels.remove(name);
        Ok(())
    }

    async fn send(&self, channel: &str, event: &str, payload: &Value) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.channels.contains_key(channel) {
            return Err(TransportError::SendFailed(format!(
                "channel not open: {channel}"
            )));
        }
        inner.sent.push(SentMessage {
            channel: channel.to_string(),
            event: event.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn heartbeat(&self) -> TransportResult<()> {
        self.heartbeat_calls.fetch_add(1, Ordering::Relaxed);

        let inner = self.inner.lock().unwrap();
        if inner.fail_heartbeats {
            return Err(TransportError::HeartbeatFailed(
                "scripted heartbeat failure".to_string(),
            ));
        }
        if !inner.connected {
            return Err(TransportError::NotConnected);
        }
        Ok(())
    }

    async fn update_auth(&self, token: &str) -> TransportResult<()> {
        self.inner.lock().unwrap().auth_token = token.to_string();
        Ok(())
    }
}
