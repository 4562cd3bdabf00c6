//! Domain layer: subscriptions, watch sets, events, and the registry.
//!
//! This module holds the subscription data model, the decoded event
//! model handed to handlers, and the process-wide registry that owns
//! every live subscription.

pub mod event;
pub mod registry;
pub mod subscription;
pub mod subscription_id;
pub mod watch_set;

pub use event::{Change, Event, EventKind, Operation};
pub use registry::SubscriptionRegistry;
pub use subscription::{
    EventHandler, Scope, Subscription, SubscriptionHandle, SubscriptionSpec, SubscriptionSummary,
};
pub use subscription_id::SubscriptionId;
pub use watch_set::{PreparedQuery, QueryShape, WatchSet, WatchedQuery};
