//! # Event Model
//!
//! Typed events delivered to the application layer, and the raw
//! channel events arriving from the transport underneath them.
//!
//! Every typed event carries exactly one tag and only the fields valid
//! for that tag; the enum makes any other shape unrepresentable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A new chat message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    /// Event ID (assigned by the backend)
    pub id: String,

    /// Conversation the message belongs to
    pub conversation_id: String,

    /// Sender user ID
    pub sender_id: String,

    /// Message body
    pub content: String,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Recipient user ID, when the backend scopes the event to one user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A match created or updated for the current user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchEvent {
    /// Event ID
    pub id: String,

    /// Match record ID
    pub match_id: String,

    /// Compatibility score, when the backend includes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compatibility_score: Option<f64>,

    /// Match status (e.g. "pending", "mutual", "expired")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// User the match belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Action carried by a guardian event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianAction {
    /// A supervised action awaits the guardian's approval
    ApprovalRequest,
    /// The guardian granted an approval
    ApprovalGranted,
    /// The guardian rejected an approval
    ApprovalRejected,
    /// General activity visible to the guardian
    ActivityUpdate,
}

impl std::fmt::Display for GuardianAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuardianAction::ApprovalRequest => write!(f, "approval_request"),
            GuardianAction::ApprovalGranted => write!(f, "approval_granted"),
            GuardianAction::ApprovalRejected => write!(f, "approval_rejected"),
            GuardianAction::ActivityUpdate => write!(f, "activity_update"),
        }
    }
}

/// An event on a guardian's supervision feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianEvent {
    /// Event ID
    pub id: String,

    /// Guardian the event is addressed to
    pub guardian_id: String,

    /// What happened
    pub action: GuardianAction,

    /// The supervised user the event concerns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_user_id: Option<String>,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Recipient user ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// A presence change in a conversation (online status, typing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEvent {
    /// Event ID
    pub id: String,

    /// Conversation the presence applies to
    pub conversation_id: String,

    /// Presence status (e.g. "online", "typing", "away", "offline")
    pub status: String,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// User whose presence changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// An application notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event ID
    pub id: String,

    /// Notification category (e.g. "match", "message", "system")
    pub category: String,

    /// Short title
    pub title: String,

    /// Body text
    #[serde(default)]
    pub body: String,

    /// When the event was produced
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Recipient user ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// The typed event family: exactly one variant per event, and only the
/// fields valid for that variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RealtimeEvent {
    Message(MessageEvent),
    Match(MatchEvent),
    Guardian(GuardianEvent),
    Presence(PresenceEvent),
    Notification(NotificationEvent),
}

impl RealtimeEvent {
    /// Event ID regardless of variant
    pub fn id(&self) -> &str {
        match self {
            RealtimeEvent::Message(e) => &e.id,
            RealtimeEvent::Match(e) => &e.id,
            RealtimeEvent::Guardian(e) => &e.id,
            RealtimeEvent::Presence(e) => &e.id,
            RealtimeEvent::Notification(e) => &e.id,
        }
    }

    /// Event timestamp regardless of variant
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            RealtimeEvent::Message(e) => e.timestamp,
            RealtimeEvent::Match(e) => e.timestamp,
            RealtimeEvent::Guardian(e) => e.timestamp,
            RealtimeEvent::Presence(e) => e.timestamp,
            RealtimeEvent::Notification(e) => e.timestamp,
        }
    }

    /// Recipient user ID regardless of variant
    pub fn user_id(&self) -> Option<&str> {
        match self {
            RealtimeEvent::Message(e) => e.user_id.as_deref(),
            RealtimeEvent::Match(e) => e.user_id.as_deref(),
            RealtimeEvent::Guardian(e) => e.user_id.as_deref(),
            RealtimeEvent::Presence(e) => e.user_id.as_deref(),
            RealtimeEvent::Notification(e) => e.user_id.as_deref(),
        }
    }
}

/// Kind of raw event arriving on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEventKind {
    /// User-generated broadcast message
    Broadcast,
    /// Row-level change notification
    Change,
    /// Full presence state sync
    PresenceSync,
    /// A participant joined
    PresenceJoin,
    /// A participant left
    PresenceLeave,
}

/// A raw event as it arrives from the transport, before typing and
/// policy gating.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    /// What kind of channel traffic this is
    pub kind: ChannelEventKind,

    /// Channel the event arrived on
    pub channel: String,

    /// Event name within the channel (user-defined for broadcasts)
    pub event: String,

    /// Untyped payload
    pub payload: Value,

    /// Arrival timestamp (assigned locally)
    pub received_at: DateTime<Utc>,
}

impl ChannelEvent {
    /// Create a broadcast event
    pub fn broadcast(channel: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self::new(ChannelEventKind::Broadcast, channel, event, payload)
    }

    /// Create a change-notification event
    pub fn change(channel: impl Into<String>, event: impl Into<String>, payload: Value) -> Self {
        Self::new(ChannelEventKind::Change, channel, event, payload)
    }

    /// Create a presence event of the given kind
    pub fn presence(kind: ChannelEventKind, channel: impl Into<String>, payload: Value) -> Self {
        Self::new(kind, channel, "presence", payload)
    }

    fn new(
        kind: ChannelEventKind,
        channel: impl Into<String>,
        event: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            kind,
            channel: channel.into(),
            event: event.into(),
            payload,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_message_event_parse() {
        let payload = json!({
            "id": "evt-1",
            "conversation_id": "conv-9",
            "sender_id": "user-3",
            "content": "salaam"
        });

        let event: MessageEvent = serde_json::from_value(payload).unwrap();
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.conversation_id, "conv-9");
        assert_eq!(event.content, "salaam");
        assert!(event.user_id.is_none());
    }

    #[test]
    fn test_realtime_event_tagging() {
        let event = RealtimeEvent::Match(MatchEvent {
            id: "evt-2".to_string(),
            match_id: "match-7".to_string(),
            compatibility_score: Some(87.5),
            status: Some("pending".to_string()),
            timestamp: Utc::now(),
            user_id: None,
        });

        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "match");
        assert_eq!(wire["match_id"], "match-7");

        // Round-trips back to the same variant
        let parsed: RealtimeEvent = serde_json::from_value(wire).unwrap();
        assert_eq!(parsed.id(), "evt-2");
        assert!(matches!(parsed, RealtimeEvent::Match(_)));
    }

    #[test]
    fn test_guardian_action_parse() {
        let action: GuardianAction = serde_json::from_value(json!("approval_request")).unwrap();
        assert_eq!(action, GuardianAction::ApprovalRequest);
        assert_eq!(action.to_string(), "approval_request");
    }

    #[test]
    fn test_channel_event_constructors() {
        let event = ChannelEvent::broadcast("messages:conv-1", "new_message", json!({"a": 1}));
        assert_eq!(event.kind, ChannelEventKind::Broadcast);
        assert_eq!(event.channel, "messages:conv-1");

        let presence = ChannelEvent::presence(
            ChannelEventKind::PresenceJoin,
            "presence:conv-1",
            json!({}),
        );
        assert_eq!(presence.kind, ChannelEventKind::PresenceJoin);
        assert_eq!(presence.event, "presence");
    }

    #[test]
    fn test_accessors_across_variants() {
        let event = RealtimeEvent::Notification(NotificationEvent {
            id: "n-1".to_string(),
            category: "match".to_string(),
            title: "New match".to_string(),
            body: String::new(),
            timestamp: Utc::now(),
            user_id: Some("user-5".to_string()),
        });

        assert_eq!(event.id(), "n-1");
        assert_eq!(event.user_id(), Some("user-5"));
    }
}
