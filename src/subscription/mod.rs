//! # Subscription Layer
//!
//! Logical, policy-gated subscriptions built on the connection layer:
//!
//! - **Rate Limiter**: per-channel token buckets for subscription
//!   creation and inbound bursts
//! - **Compliance**: content checking with a TTL verdict cache
//! - **Guardian**: permission store cache and approval gating
//! - **Manager**: one subscribe method per event family, raw-to-typed
//!   transformation, typed re-emission

pub mod compliance;
pub mod errors;
pub mod guardian;
pub mod manager;
pub mod rate_limit;

pub use compliance::{ComplianceCache, ComplianceChecker, ComplianceValidation, DenylistChecker};
pub use errors::{SubscriptionError, SubscriptionResult};
pub use guardian::{GuardianPermissions, GuardianStore, PermissionCache, StaticGuardianStore};
pub use manager::{ChannelSubscription, SubscriptionManager, SubscriptionOptions};
pub use rate_limit::{RateLimitState, RateLimiter};
