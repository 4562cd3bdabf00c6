//! Subscription data model: scope, handler, handle, and summaries.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::event::{Event, EventKind};
use super::watch_set::{WatchSet, WatchedQuery};
use super::SubscriptionId;

/// Event kinds a subscription wants delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Lifecycle and object-change events.
    AnyChange,
    /// Object-change events only.
    ObjectChangeOnly,
}

impl Scope {
    /// Returns `true` if events of `kind` should reach the handler.
    ///
    /// `Deregistered` always passes: the owner must learn that the
    /// backend ended the subscription.
    #[must_use]
    pub const fn accepts(self, kind: &EventKind) -> bool {
        match self {
            Self::AnyChange => true,
            Self::ObjectChangeOnly => matches!(
                kind,
                EventKind::ObjectChanged { .. } | EventKind::Deregistered
            ),
        }
    }
}

/// User callback invoked once per delivered event.
///
/// Cheap to clone; every clone calls the same function.
#[derive(Clone)]
pub struct EventHandler(Arc<dyn Fn(&Event) + Send + Sync>);

impl EventHandler {
    /// Wraps a closure as a handler.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Calls the handler.
    pub fn call(&self, event: &Event) {
        (self.0)(event);
    }
}

impl fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler")
    }
}

/// Parameters of a registration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Unique subscription name.
    pub name: String,
    /// Event kinds wanted.
    pub scope: Scope,
    /// Port of this process's delivery endpoint.
    pub delivery_port: u16,
    /// Seconds until the backend may drop the subscription (0 = never).
    pub timeout_secs: u32,
}

impl SubscriptionSpec {
    /// Creates a spec with the given name and scope, no expiry, and the
    /// default delivery port.
    #[must_use]
    pub fn new(name: impl Into<String>, scope: Scope) -> Self {
        Self {
            name: name.into(),
            scope,
            delivery_port: 5468,
            timeout_secs: 0,
        }
    }

    /// Sets the delivery port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.delivery_port = port;
        self
    }

    /// Sets the backend-side time-to-live in seconds.
    #[must_use]
    pub const fn with_timeout(mut self, secs: u32) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// A live registration held by the registry.
#[derive(Debug)]
pub struct Subscription {
    /// Registration parameters.
    pub spec: SubscriptionSpec,
    /// Callback bound to this subscription.
    pub handler: EventHandler,
    /// Queries attached so far.
    pub watch_set: WatchSet,
    /// When the backend accepted the registration.
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Creates a subscription with an empty watch set.
    #[must_use]
    pub fn new(spec: SubscriptionSpec, handler: EventHandler) -> Self {
        Self {
            spec,
            handler,
            watch_set: WatchSet::new(),
            created_at: Utc::now(),
        }
    }
}

/// Caller-side reference to one registration.
///
/// Holds the name and the registration id; it never owns the
/// subscription. Operations on a handle whose registration is gone
/// either fail with `InvalidHandle` or are no-ops, never touch a newer
/// registration that reused the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    name: String,
    id: SubscriptionId,
}

impl SubscriptionHandle {
    pub(crate) const fn new(name: String, id: SubscriptionId) -> Self {
        Self { name, id }
    }

    /// Returns the subscription name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the registration id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Read-only snapshot of a subscription for list endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubscriptionSummary {
    /// Subscription name.
    pub name: String,
    /// Registration id.
    #[schema(value_type = String)]
    pub id: SubscriptionId,
    /// Event kinds wanted.
    pub scope: Scope,
    /// Delivery endpoint port.
    pub delivery_port: u16,
    /// Backend-side time-to-live in seconds (0 = never).
    pub timeout_secs: u32,
    /// Watched queries in attachment order.
    pub queries: Vec<WatchedQuery>,
    /// Registration timestamp.
    pub created_at: DateTime<Utc>,
}

impl SubscriptionSummary {
    pub(crate) fn new(id: SubscriptionId, subscription: &Subscription) -> Self {
        Self {
            name: subscription.spec.name.clone(),
            id,
            scope: subscription.spec.scope,
            delivery_port: subscription.spec.delivery_port,
            timeout_secs: subscription.spec.timeout_secs,
            queries: subscription
                .watch_set
                .iter()
                .map(WatchedQuery::from)
                .collect(),
            created_at: subscription.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::PreparedQuery;

    #[test]
    fn object_change_only_filters_lifecycle_events() {
        let scope = Scope::ObjectChangeOnly;
        assert!(!scope.accepts(&EventKind::Startup));
        assert!(!scope.accepts(&EventKind::DatabaseDropped));
        assert!(scope.accepts(&EventKind::Deregistered));
        assert!(Scope::AnyChange.accepts(&EventKind::ShutdownAny));
    }

    #[test]
    fn handler_clones_share_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = EventHandler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let event = Event {
            source: "XE".to_string(),
            subscription: "sub-00".to_string(),
            received_at: Utc::now(),
            kind: EventKind::Startup,
        };
        handler.call(&event);
        handler.clone().call(&event);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn spec_builder_sets_port_and_timeout() {
        let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange)
            .with_port(6000)
            .with_timeout(30);
        assert_eq!(spec.delivery_port, 6000);
        assert_eq!(spec.timeout_secs, 30);
    }

    #[test]
    fn summary_lists_queries_in_order() {
        let mut sub = Subscription::new(
            SubscriptionSpec::new("sub-00", Scope::AnyChange),
            EventHandler::new(|_| {}),
        );
        let _ = sub.watch_set.push(PreparedQuery::parse("select * from table1"));
        let _ = sub.watch_set.push(PreparedQuery::parse("select * from table2"));

        let summary = SubscriptionSummary::new(SubscriptionId::new(), &sub);
        assert_eq!(summary.name, "sub-00");
        assert_eq!(summary.queries.len(), 2);
        assert_eq!(summary.queries.first().map(|q| q.text.as_str()), Some("select * from table1"));
    }
}
