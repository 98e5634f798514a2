//! # Subscription Manager
//!
//! Maps logical subscription requests (messages, matches, guardian
//! notifications, presence, notifications) onto underlying channels,
//! applies rate limiting and the compliance/guardian policy gates, and
//! re-emits typed application events.
//!
//! Events for one channel are pumped by a single task consuming an
//! ordered stream: gating may suppress delivery but never reorders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use super::compliance::{ComplianceCache, ComplianceChecker, DenylistChecker};
use super::errors::{SubscriptionError, SubscriptionResult};
use super::guardian::{route_message, GuardianStore, MessageRoute, PermissionCache};
use super::rate_limit::RateLimiter;
use crate::connection::manager::ConnectionManager;
use crate::dispatcher::{AppEvent, EventBus};
use crate::event::{
    ChannelEvent, ChannelEventKind, GuardianAction, GuardianEvent, MatchEvent, MessageEvent,
    NotificationEvent, PresenceEvent,
};
use crate::tasks::TimerRegistry;

/// A logical subscription and its bookkeeping.
#[derive(Debug, Clone)]
pub struct ChannelSubscription {
    /// Unique per subscribe call; also the connection-layer channel id
    pub id: Uuid,

    /// Underlying channel name
    pub channel: String,

    /// Owning user
    pub user_id: String,

    /// False once torn down
    pub is_active: bool,

    /// Last time an event arrived on this subscription
    pub last_activity: DateTime<Utc>,

    /// Events processed (including suppressed ones)
    pub event_count: u64,

    /// Server-side filter, when the family uses one
    pub filter: Option<Value>,
}

/// How a logical event family maps onto a channel.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    /// Channel name
    pub channel: String,

    /// Server-side filter
    pub filter: Option<Value>,

    /// Whether subscription creation counts against the rate limiter
    pub rate_limited: bool,
}

impl SubscriptionOptions {
    pub fn messages(conversation_id: &str) -> Self {
        Self {
            channel: format!("messages:{conversation_id}"),
            filter: Some(json!({ "conversation_id": conversation_id })),
            rate_limited: true,
        }
    }

    pub fn matches(user_id: &str) -> Self {
        Self {
            channel: format!("matches:{user_id}"),
            filter: Some(json!({ "user_id": user_id })),
            rate_limited: true,
        }
    }

    pub fn guardian(guardian_id: &str) -> Self {
        Self {
            channel: format!("guardian:{guardian_id}"),
            filter: Some(json!({ "guardian_id": guardian_id })),
            rate_limited: true,
        }
    }

    pub fn presence(conversation_id: &str) -> Self {
        Self {
            channel: format!("presence:{conversation_id}"),
            filter: None,
            rate_limited: true,
        }
    }

    pub fn notifications(user_id: &str) -> Self {
        Self {
            channel: format!("notifications:{user_id}"),
            filter: Some(json!({ "user_id": user_id })),
            rate_limited: true,
        }
    }
}

/// Which transformation and gates a pump applies.
#[derive(Debug, Clone)]
enum EventFamily {
    Message,
    Match,
    Guardian { guardian_id: String },
    Presence,
    Notification,
}

/// State shared with the pump tasks.
struct SubscriptionShared {
    connection: Arc<ConnectionManager>,
    user_id: String,
    rate_limiter: RateLimiter,
    compliance: ComplianceCache,
    permissions: PermissionCache,
    subscriptions: RwLock<HashMap<Uuid, ChannelSubscription>>,
    events: EventBus<AppEvent>,
}

/// Manager for logical, policy-gated subscriptions.
pub struct SubscriptionManager {
    shared: Arc<SubscriptionShared>,
    pump_tasks: Mutex<HashMap<Uuid, u64>>,
    timers: Arc<TimerRegistry>,
}

impl SubscriptionManager {
    /// Build with the built-in denylist checker from configuration.
    pub fn new(
        connection: Arc<ConnectionManager>,
        user_id: impl Into<String>,
        guardian_store: Arc<dyn GuardianStore>,
    ) -> Self {
        let denylist = connection.config().compliance.denylist.clone();
        Self::with_checker(
            connection,
            user_id,
            guardian_store,
            Arc::new(DenylistChecker::new(denylist)),
        )
    }

    /// Build with a custom compliance checker (e.g. a remote service).
    pub fn with_checker(
        connection: Arc<ConnectionManager>,
        user_id: impl Into<String>,
        guardian_store: Arc<dyn GuardianStore>,
        checker: Arc<dyn ComplianceChecker>,
    ) -> Self {
        let config = connection.config().clone();
        let timers = Arc::new(TimerRegistry::new());

        let shared = Arc::new(SubscriptionShared {
            connection,
            user_id: user_id.into(),
            rate_limiter: RateLimiter::new(config.rate_limit.clone()),
            compliance: ComplianceCache::new(checker, config.compliance.cache_ttl, Arc::clone(&timers)),
            permissions: PermissionCache::new(guardian_store),
            subscriptions: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        });

        Self {
            shared,
            pump_tasks: Mutex::new(HashMap::new()),
            timers,
        }
    }

    /// Subscribe to the typed application events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AppEvent> {
        self.shared.events.subscribe()
    }

    /// New chat messages for a conversation, compliance- and
    /// guardian-gated.
    pub async fn subscribe_to_messages(&self, conversation_id: &str) -> SubscriptionResult<Uuid> {
        self.subscribe(SubscriptionOptions::messages(conversation_id), EventFamily::Message)
            .await
    }

    /// Match updates for the owning user.
    pub async fn subscribe_to_matches(&self) -> SubscriptionResult<Uuid> {
        let options = SubscriptionOptions::matches(&self.shared.user_id);
        self.subscribe(options, EventFamily::Match).await
    }

    /// A guardian's supervision feed. Requires actual guardian
    /// permissions for `guardian_id`.
    pub async fn subscribe_to_guardian_notifications(
        &self,
        guardian_id: &str,
    ) -> SubscriptionResult<Uuid> {
        let permissions = self.shared.permissions.get(guardian_id).await;
        if !permissions.is_guardian() {
            return Err(SubscriptionError::UnauthorizedGuardianAction(format!(
                "no guardian permissions for {guardian_id}"
            )));
        }

        self.subscribe(
            SubscriptionOptions::guardian(guardian_id),
            EventFamily::Guardian {
                guardian_id: guardian_id.to_string(),
            },
        )
        .await
    }

    /// Presence and typing signals for a conversation.
    pub async fn subscribe_to_presence(&self, conversation_id: &str) -> SubscriptionResult<Uuid> {
        self.subscribe(SubscriptionOptions::presence(conversation_id), EventFamily::Presence)
            .await
    }

    /// Notifications for the owning user.
    pub async fn subscribe_to_notifications(&self) -> SubscriptionResult<Uuid> {
        let options = SubscriptionOptions::notifications(&self.shared.user_id);
        self.subscribe(options, EventFamily::Notification).await
    }

    async fn subscribe(
        &self,
        options: SubscriptionOptions,
        family: EventFamily,
    ) -> SubscriptionResult<Uuid> {
        if options.rate_limited && !self.shared.rate_limiter.allow(&options.channel) {
            return Err(SubscriptionError::RateLimitExceeded(options.channel));
        }

        let (channel_id, mut receiver) = self
            .shared
            .connection
            .subscribe_to_channel(&options.channel, &self.shared.user_id, options.filter.clone())
            .await?;

        let subscription = ChannelSubscription {
            id: channel_id,
            channel: options.channel.clone(),
            user_id: self.shared.user_id.clone(),
            is_active: true,
            last_activity: Utc::now(),
            event_count: 0,
            filter: options.filter,
        };

        if let Ok(mut subscriptions) = self.shared.subscriptions.write() {
            subscriptions.insert(channel_id, subscription);
        }

        let shared = Arc::clone(&self.shared);
        let timer_id = self.timers.spawn(async move {
            while let Some(raw) = receiver.recv().await {
                shared.handle_raw(channel_id, &family, raw).await;
            }
        });

        if let Ok(mut pumps) = self.pump_tasks.lock() {
            pumps.insert(channel_id, timer_id);
        }

        Ok(channel_id)
    }

    /// Best-effort typing signal: sent on the channel whose name
    /// contains the conversation id, dropped when none matches.
    pub async fn send_typing_indicator(
        &self,
        conversation_id: &str,
        is_typing: bool,
    ) -> SubscriptionResult<()> {
        let payload = json!({
            "conversation_id": conversation_id,
            "user_id": self.shared.user_id,
            "is_typing": is_typing,
        });
        self.send_best_effort(conversation_id, "typing", payload).await
    }

    /// Best-effort presence update, same routing as typing.
    pub async fn send_presence_update(
        &self,
        conversation_id: &str,
        status: &str,
    ) -> SubscriptionResult<()> {
        let payload = json!({
            "conversation_id": conversation_id,
            "user_id": self.shared.user_id,
            "status": status,
        });
        self.send_best_effort(conversation_id, "presence", payload).await
    }

    async fn send_best_effort(
        &self,
        conversation_id: &str,
        event: &str,
        payload: Value,
    ) -> SubscriptionResult<()> {
        match self.find_channel_for(conversation_id) {
            Some(channel_id) => {
                self.shared
                    .connection
                    .send_to_channel(channel_id, event, &payload)
                    .await?;
                Ok(())
            }
            None => {
                debug!(
                    conversation_id,
                    event, "no matching channel; best-effort signal dropped"
                );
                Ok(())
            }
        }
    }

    /// Substring match on channel names, preferring presence channels
    /// so signals land on the stream peers actually watch.
    fn find_channel_for(&self, conversation_id: &str) -> Option<Uuid> {
        let subscriptions = self.shared.subscriptions.read().ok()?;

        let mut candidates: Vec<&ChannelSubscription> = subscriptions
            .values()
            .filter(|s| s.channel.contains(conversation_id))
            .collect();
        candidates.sort_by_key(|s| {
            (
                if s.channel.starts_with("presence:") { 0 } else { 1 },
                s.channel.clone(),
            )
        });
        candidates.first().map(|s| s.id)
    }

    /// Tear down one subscription: transport channel, rate-limit
    /// bookkeeping, pump task. Idempotent for unknown ids.
    pub async fn unsubscribe(&self, id: Uuid) -> SubscriptionResult<()> {
        let removed = match self.shared.subscriptions.write() {
            Ok(mut subscriptions) => subscriptions.remove(&id),
            Err(_) => None,
        };

        if let Some(subscription) = removed {
            self.shared.rate_limiter.reset(&subscription.channel);
            if let Ok(mut pumps) = self.pump_tasks.lock() {
                if let Some(timer_id) = pumps.remove(&id) {
                    self.timers.cancel(timer_id);
                }
            }
            self.shared.connection.unsubscribe_from_channel(id).await?;
        }
        Ok(())
    }

    /// Tear down every subscription.
    pub async fn unsubscribe_all(&self) -> SubscriptionResult<()> {
        let ids: Vec<Uuid> = self
            .shared
            .subscriptions
            .read()
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default();

        for id in ids {
            self.unsubscribe(id).await?;
        }
        Ok(())
    }

    /// Full teardown: subscriptions, caches, and every background task.
    pub async fn destroy(&self) -> SubscriptionResult<()> {
        self.unsubscribe_all().await?;
        self.shared.compliance.clear();
        self.shared.permissions.clear();
        self.timers.cancel_all();
        Ok(())
    }

    /// Drop cached guardian permissions for a user.
    pub fn invalidate_permissions(&self, user_id: &str) {
        self.shared.permissions.invalidate(user_id);
    }

    /// Copy of one subscription's bookkeeping.
    pub fn subscription(&self, id: Uuid) -> Option<ChannelSubscription> {
        self.shared
            .subscriptions
            .read()
            .ok()
            .and_then(|s| s.get(&id).cloned())
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Live pump/expiry tasks owned by this manager.
    pub fn active_timer_count(&self) -> usize {
        self.timers.active_count()
    }
}

impl SubscriptionShared {
    /// One raw event: inbound rate limit, bookkeeping, transform, gate,
    /// re-emit.
    async fn handle_raw(&self, subscription_id: Uuid, family: &EventFamily, raw: ChannelEvent) {
        if !self.rate_limiter.allow(&raw.channel) {
            debug!(channel = %raw.channel, "inbound event dropped: rate limited");
            return;
        }

        self.connection.note_incoming_event(&raw.payload);
        self.touch(subscription_id);

        match family {
            EventFamily::Message => self.handle_message(subscription_id, raw).await,
            EventFamily::Match => self.handle_match(subscription_id, raw).await,
            EventFamily::Guardian { guardian_id } => {
                self.handle_guardian(subscription_id, guardian_id, raw).await
            }
            EventFamily::Presence => self.handle_presence(raw),
            EventFamily::Notification => self.handle_notification(subscription_id, raw),
        }
    }

    async fn handle_message(&self, subscription_id: Uuid, raw: ChannelEvent) {
        let event: MessageEvent = match serde_json::from_value(raw.payload) {
            Ok(event) => event,
            Err(e) => {
                self.emit_error(subscription_id, format!("invalid message payload: {e}"));
                return;
            }
        };

        // Compliance gate first: flagged content goes to review
        // regardless of guardian settings.
        let validation = self.compliance.validate(&event.content, "message").await;
        if validation.review_required {
            warn!(
                conversation_id = %event.conversation_id,
                flags = ?validation.flags,
                "message routed to guardian review"
            );
            self.events.emit(AppEvent::GuardianReviewRequired {
                event,
                validation: Some(validation),
            });
            return;
        }

        // Guardian gate: approval-gated users with a viewing guardian
        // get guardian-queue delivery instead of direct delivery.
        let permissions = self.permissions.get(&self.user_id).await;
        match route_message(&permissions) {
            MessageRoute::GuardianQueue => {
                self.events.emit(AppEvent::GuardianReviewRequired {
                    event,
                    validation: None,
                });
            }
            MessageRoute::Direct => {
                self.events.emit(AppEvent::MessageReceived(event));
            }
        }
    }

    async fn handle_match(&self, subscription_id: Uuid, raw: ChannelEvent) {
        let event: MatchEvent = match serde_json::from_value(raw.payload) {
            Ok(event) => event,
            Err(e) => {
                self.emit_error(subscription_id, format!("invalid match payload: {e}"));
                return;
            }
        };

        // Approval request is informational: the match event itself is
        // still delivered.
        let permissions = self.permissions.get(&self.user_id).await;
        if permissions.requires_approval {
            self.events
                .emit(AppEvent::GuardianApprovalRequested(event.clone()));
        }
        self.events.emit(AppEvent::MatchUpdated(event));
    }

    async fn handle_guardian(&self, subscription_id: Uuid, guardian_id: &str, raw: ChannelEvent) {
        let event: GuardianEvent = match serde_json::from_value(raw.payload) {
            Ok(event) => event,
            Err(e) => {
                self.emit_error(subscription_id, format!("invalid guardian payload: {e}"));
                return;
            }
        };

        if event.action == GuardianAction::ApprovalRequest {
            let permissions = self.permissions.get(guardian_id).await;
            if !permissions.can_approve_matches {
                warn!(guardian_id, "approval request for guardian without approval rights");
                self.emit_error(
                    subscription_id,
                    SubscriptionError::UnauthorizedGuardianAction(format!(
                        "guardian {guardian_id} cannot accept approval requests"
                    ))
                    .to_string(),
                );
                return;
            }
        }

        self.events.emit(AppEvent::GuardianActivity(event));
    }

    fn handle_presence(&self, raw: ChannelEvent) {
        // Presence payloads are best-effort; sync/join/leave frames
        // without a full event shape are synthesized from the raw frame.
        let event: PresenceEvent = serde_json::from_value(raw.payload.clone()).unwrap_or_else(|_| {
            PresenceEvent {
                id: Uuid::new_v4().to_string(),
                conversation_id: raw
                    .channel
                    .strip_prefix("presence:")
                    .unwrap_or(&raw.channel)
                    .to_string(),
                status: default_presence_status(raw.kind).to_string(),
                timestamp: raw.received_at,
                user_id: None,
            }
        });

        self.events.emit(AppEvent::PresenceUpdated(event));
    }

    fn handle_notification(&self, subscription_id: Uuid, raw: ChannelEvent) {
        let event: NotificationEvent = match serde_json::from_value(raw.payload) {
            Ok(event) => event,
            Err(e) => {
                self.emit_error(subscription_id, format!("invalid notification payload: {e}"));
                return;
            }
        };

        self.events.emit(AppEvent::NotificationReceived(event));
    }

    fn touch(&self, subscription_id: Uuid) {
        if let Ok(mut subscriptions) = self.subscriptions.write() {
            if let Some(subscription) = subscriptions.get_mut(&subscription_id) {
                subscription.event_count += 1;
                subscription.last_activity = Utc::now();
            }
        }
    }

    fn emit_error(&self, subscription_id: Uuid, message: String) {
        warn!(%subscription_id, %message, "subscription error");
        self.events.emit(AppEvent::SubscriptionError {
            subscription_id,
            message,
        });
    }
}

fn default_presence_status(kind: ChannelEventKind) -> &'static str {
    match kind {
        ChannelEventKind::PresenceJoin => "online",
        ChannelEventKind::PresenceLeave => "offline",
        _ => "sync",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RealtimeConfig;
    use crate::subscription::guardian::{GuardianPermissions, StaticGuardianStore};
    use crate::transport::mock::MockTransport;
    use std::time::Duration;
    use tokio::time::timeout;

    const RECV_WAIT: Duration = Duration::from_millis(500);

    struct Fixture {
        manager: SubscriptionManager,
        connection: Arc<ConnectionManager>,
        transport: Arc<MockTransport>,
        store: Arc<StaticGuardianStore>,
    }

    async fn fixture(config: RealtimeConfig) -> Fixture {
        let transport = Arc::new(MockTransport::new());
        let connection = ConnectionManager::new(config, transport.clone(), "token");
        connection.connect().await.unwrap();

        let store = Arc::new(StaticGuardianStore::new());
        let manager = SubscriptionManager::new(connection.clone(), "user-1", store.clone());

        Fixture {
            manager,
            connection,
            transport,
            store,
        }
    }

    fn quiet_config() -> RealtimeConfig {
        RealtimeConfig {
            heartbeat_interval: Duration::from_secs(600),
            monitor_interval: Duration::from_secs(600),
            ..RealtimeConfig::default()
        }
    }

    async fn recv(rx: &mut broadcast::Receiver<AppEvent>) -> AppEvent {
        timeout(RECV_WAIT, rx.recv()).await.unwrap().unwrap()
    }

    fn message_payload(content: &str) -> Value {
        json!({
            "id": "evt-1",
            "conversation_id": "conv-1",
            "sender_id": "user-2",
            "content": content,
        })
    }

    #[tokio::test]
    async fn test_message_delivered_when_clean_and_unsupervised() {
        let fx = fixture(quiet_config()).await;
        let mut events = fx.manager.subscribe_events();

        let id = fx.manager.subscribe_to_messages("conv-1").await.unwrap();
        fx.transport.inject(
            "messages:conv-1",
            ChannelEvent::broadcast("messages:conv-1", "new_message", message_payload("hello")),
        );

        match recv(&mut events).await {
            AppEvent::MessageReceived(event) => {
                assert_eq!(event.content, "hello");
                assert_eq!(event.conversation_id, "conv-1");
            }
            other => panic!("expected MessageReceived, got {other:?}"),
        }

        // Bookkeeping advanced
        let subscription = fx.manager.subscription(id).unwrap();
        assert_eq!(subscription.event_count, 1);
        assert!(subscription.is_active);

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_flagged_content_goes_to_review_queue() {
        let fx = fixture(quiet_config()).await;
        let mut events = fx.manager.subscribe_events();

        fx.manager.subscribe_to_messages("conv-1").await.unwrap();
        fx.transport.inject(
            "messages:conv-1",
            ChannelEvent::broadcast(
                "messages:conv-1",
                "new_message",
                message_payload(
                    "Let's meet alone for dinner tonight. Here's my phone number: 91234567",
                ),
            ),
        );

        match recv(&mut events).await {
            AppEvent::GuardianReviewRequired { event, validation } => {
                let validation = validation.expect("compliance verdict attached");
                assert!(!validation.approved);
                assert!(validation.review_required);
                assert!(!validation.flags.is_empty());
                assert_eq!(event.conversation_id, "conv-1");
            }
            other => panic!("expected GuardianReviewRequired, got {other:?}"),
        }

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_approval_gated_message_never_reaches_direct_delivery() {
        let fx = fixture(quiet_config()).await;
        fx.store.insert(
            "user-1",
            GuardianPermissions {
                requires_approval: true,
                can_view_messages: true,
                ..Default::default()
            },
        );

        let mut events = fx.manager.subscribe_events();
        fx.manager.subscribe_to_messages("conv-1").await.unwrap();

        fx.transport.inject(
            "messages:conv-1",
            ChannelEvent::broadcast("messages:conv-1", "new_message", message_payload("hello")),
        );

        // Exactly one review-queue event, no direct delivery
        match recv(&mut events).await {
            AppEvent::GuardianReviewRequired { validation, .. } => {
                assert!(validation.is_none(), "clean content, guardian-gated only");
            }
            other => panic!("expected GuardianReviewRequired, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_match_approval_requested_and_still_delivered() {
        let fx = fixture(quiet_config()).await;
        fx.store.insert(
            "user-1",
            GuardianPermissions {
                requires_approval: true,
                can_view_messages: false,
                ..Default::default()
            },
        );

        let mut events = fx.manager.subscribe_events();
        fx.manager.subscribe_to_matches().await.unwrap();

        fx.transport.inject(
            "matches:user-1",
            ChannelEvent::change(
                "matches:user-1",
                "match_update",
                json!({
                    "id": "evt-9",
                    "match_id": "match-3",
                    "compatibility_score": 91.0,
                    "status": "mutual",
                }),
            ),
        );

        // Informational request first, then the event itself
        assert!(matches!(
            recv(&mut events).await,
            AppEvent::GuardianApprovalRequested(_)
        ));
        match recv(&mut events).await {
            AppEvent::MatchUpdated(event) => assert_eq!(event.match_id, "match-3"),
            other => panic!("expected MatchUpdated, got {other:?}"),
        }

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_guardian_subscription_requires_permissions() {
        let fx = fixture(quiet_config()).await;

        // Unknown guardian: rejected synchronously
        let err = fx.manager.subscribe_to_guardian_notifications("g-1").await;
        assert!(matches!(
            err,
            Err(SubscriptionError::UnauthorizedGuardianAction(_))
        ));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_unauthorized_approval_request_suppressed() {
        let fx = fixture(quiet_config()).await;
        // Guardian can view but cannot approve
        fx.store.insert(
            "g-1",
            GuardianPermissions {
                can_view_messages: true,
                can_approve_matches: false,
                ..Default::default()
            },
        );

        let mut events = fx.manager.subscribe_events();
        fx.manager
            .subscribe_to_guardian_notifications("g-1")
            .await
            .unwrap();

        fx.transport.inject(
            "guardian:g-1",
            ChannelEvent::broadcast(
                "guardian:g-1",
                "guardian_event",
                json!({
                    "id": "evt-4",
                    "guardian_id": "g-1",
                    "action": "approval_request",
                }),
            ),
        );

        match recv(&mut events).await {
            AppEvent::SubscriptionError { message, .. } => {
                assert!(message.contains("Unauthorized guardian action"));
            }
            other => panic!("expected SubscriptionError, got {other:?}"),
        }

        // Activity updates still flow
        fx.transport.inject(
            "guardian:g-1",
            ChannelEvent::broadcast(
                "guardian:g-1",
                "guardian_event",
                json!({
                    "id": "evt-5",
                    "guardian_id": "g-1",
                    "action": "activity_update",
                }),
            ),
        );
        assert!(matches!(recv(&mut events).await, AppEvent::GuardianActivity(_)));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_presence_synthesized_from_join_frame() {
        let fx = fixture(quiet_config()).await;
        let mut events = fx.manager.subscribe_events();

        fx.manager.subscribe_to_presence("conv-1").await.unwrap();
        fx.transport.inject(
            "presence:conv-1",
            ChannelEvent::presence(
                ChannelEventKind::PresenceJoin,
                "presence:conv-1",
                json!({ "participants": ["user-2"] }),
            ),
        );

        match recv(&mut events).await {
            AppEvent::PresenceUpdated(event) => {
                assert_eq!(event.conversation_id, "conv-1");
                assert_eq!(event.status, "online");
            }
            other => panic!("expected PresenceUpdated, got {other:?}"),
        }

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_rate_limited() {
        let mut config = quiet_config();
        config.rate_limit.burst_limit = 1;
        let fx = fixture(config).await;

        fx.manager.subscribe_to_messages("conv-1").await.unwrap();

        // Same channel again within the window: the bucket is dry
        let err = fx.manager.subscribe_to_messages("conv-1").await;
        assert!(matches!(err, Err(SubscriptionError::RateLimitExceeded(_))));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_typing_indicator_best_effort() {
        let fx = fixture(quiet_config()).await;

        // No channel yet: silently dropped, still Ok
        fx.manager
            .send_typing_indicator("conv-1", true)
            .await
            .unwrap();
        assert!(fx.transport.sent_messages().is_empty());

        fx.manager.subscribe_to_presence("conv-1").await.unwrap();
        fx.manager
            .send_typing_indicator("conv-1", true)
            .await
            .unwrap();

        let sent = fx.transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "presence:conv-1");
        assert_eq!(sent[0].event, "typing");
        assert_eq!(sent[0].payload["is_typing"], json!(true));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_presence_update_prefers_presence_channel() {
        let fx = fixture(quiet_config()).await;

        fx.manager.subscribe_to_messages("conv-1").await.unwrap();
        fx.manager.subscribe_to_presence("conv-1").await.unwrap();

        fx.manager
            .send_presence_update("conv-1", "away")
            .await
            .unwrap();

        let sent = fx.transport.sent_messages();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].channel, "presence:conv-1");
        assert_eq!(sent[0].payload["status"], json!("away"));

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_unsubscribe_all_clears_everything() {
        let fx = fixture(quiet_config()).await;

        fx.manager.subscribe_to_messages("conv-1").await.unwrap();
        fx.manager.subscribe_to_presence("conv-1").await.unwrap();
        fx.manager.subscribe_to_notifications().await.unwrap();
        assert_eq!(fx.manager.subscription_count(), 3);
        assert_eq!(fx.connection.channel_count(), 3);

        fx.manager.unsubscribe_all().await.unwrap();
        assert_eq!(fx.manager.subscription_count(), 0);
        assert_eq!(fx.connection.channel_count(), 0);

        // Idempotent on an empty manager
        fx.manager.unsubscribe_all().await.unwrap();

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fx.manager.active_timer_count(), 0);
        assert_eq!(fx.connection.active_timer_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_surfaces_subscription_error() {
        let fx = fixture(quiet_config()).await;
        let mut events = fx.manager.subscribe_events();

        let id = fx.manager.subscribe_to_messages("conv-1").await.unwrap();
        fx.transport.inject(
            "messages:conv-1",
            ChannelEvent::broadcast("messages:conv-1", "new_message", json!({"bogus": true})),
        );

        match recv(&mut events).await {
            AppEvent::SubscriptionError {
                subscription_id,
                message,
            } => {
                assert_eq!(subscription_id, id);
                assert!(message.contains("invalid message payload"));
            }
            other => panic!("expected SubscriptionError, got {other:?}"),
        }

        fx.manager.destroy().await.unwrap();
        fx.connection.destroy().await.unwrap();
    }
}
