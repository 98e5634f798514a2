//! # Event Dispatcher
//!
//! Typed in-process publish/subscribe. Each layer owns one bus:
//! [`ConnectionEvent`] for connection lifecycle and channel bookkeeping,
//! [`AppEvent`] for the policy-gated events the application consumes.
//!
//! Delivery is fan-out to every live subscriber; a bus with no
//! subscribers drops events silently.

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::connection::health::PerformanceMetrics;
use crate::event::{
    GuardianEvent, MatchEvent, MessageEvent, NotificationEvent, PresenceEvent, RealtimeEvent,
};
use crate::subscription::compliance::ComplianceValidation;

const BUS_CAPACITY: usize = 256;

/// A typed publish/subscribe bus.
#[derive(Debug)]
pub struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn emit(&self, event: T) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle and channel events emitted by the connection manager.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// `connection:established`
    Established { connection_id: String },

    /// `connection:closed`
    Closed,

    /// `connection:error`
    Error { message: String },

    /// `connection:high_latency`; a warning, not a failure
    HighLatency { latency_ms: u64 },

    /// `channel:subscribed`
    ChannelSubscribed { channel_id: Uuid, channel: String },

    /// `channel:unsubscribed`
    ChannelUnsubscribed { channel_id: Uuid, channel: String },

    /// `performance:update`
    PerformanceUpdate(PerformanceMetrics),
}

/// Typed, policy-gated events emitted to the application layer.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// `message:received`, after compliance and guardian gating
    MessageReceived(MessageEvent),

    /// `match:updated`
    MatchUpdated(MatchEvent),

    /// `guardian:activity`
    GuardianActivity(GuardianEvent),

    /// `guardian:review_required`: flagged or approval-gated message
    /// routed to the guardian queue instead of direct delivery
    GuardianReviewRequired {
        event: MessageEvent,
        validation: Option<ComplianceValidation>,
    },

    /// `guardian:approval_requested`: informational; the match event
    /// is still delivered
    GuardianApprovalRequested(MatchEvent),

    /// `presence:updated`
    PresenceUpdated(PresenceEvent),

    /// `notification:received`
    NotificationReceived(NotificationEvent),

    /// `subscription:error`
    SubscriptionError {
        subscription_id: Uuid,
        message: String,
    },
}

impl AppEvent {
    /// The underlying domain event, for consumers that handle all
    /// families uniformly. Errors carry no domain event.
    pub fn realtime_event(&self) -> Option<RealtimeEvent> {
        match self {
            AppEvent::MessageReceived(e) => Some(RealtimeEvent::Message(e.clone())),
            AppEvent::GuardianReviewRequired { event, .. } => {
                Some(RealtimeEvent::Message(event.clone()))
            }
            AppEvent::MatchUpdated(e) | AppEvent::GuardianApprovalRequested(e) => {
                Some(RealtimeEvent::Match(e.clone()))
            }
            AppEvent::GuardianActivity(e) => Some(RealtimeEvent::Guardian(e.clone())),
            AppEvent::PresenceUpdated(e) => Some(RealtimeEvent::Presence(e.clone())),
            AppEvent::NotificationReceived(e) => Some(RealtimeEvent::Notification(e.clone())),
            AppEvent::SubscriptionError { .. } => None,
        }
    }
}
