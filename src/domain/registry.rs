//! Process-wide subscription table.
//!
//! [`SubscriptionRegistry`] maps subscription names to live registrations.
//! The outer map sits behind a [`tokio::sync::RwLock`]; each registration
//! has its own [`tokio::sync::Mutex`] that the dispatcher holds while a
//! handler runs.
//!
//! # Concurrency
//!
//! - `register` and `unregister` take the map write lock for their whole
//!   duration, backend acknowledgment included, so they exclude each
//!   other and every attach.
//! - `attach_query` holds the map read lock plus the registration lock.
//! - Delivery clones the registration out under the map read lock, then
//!   takes the registration lock and re-checks that it is still active.
//!   Teardown clears that flag under the same lock, so an event racing
//!   with `unregister` is discarded, never delivered.
//! - Lock order is map, then registration. Nothing acquires the map while
//!   holding a registration lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, RwLock, mpsc};

use super::event::Event;
use super::subscription::{
    EventHandler, Subscription, SubscriptionHandle, SubscriptionSpec, SubscriptionSummary,
};
use super::watch_set::PreparedQuery;
use super::SubscriptionId;
use crate::backend::NotificationBackend;
use crate::error::NotifyError;
use crate::service::dispatcher;
use crate::service::error_channel::ErrorChannel;

/// Mutable part of a registration, guarded by the registration lock.
#[derive(Debug)]
pub(crate) struct SlotState {
    /// Cleared exactly once, by whoever tears the registration down.
    pub(crate) active: bool,
    pub(crate) subscription: Subscription,
}

/// Shared core of a registration, reachable from its worker task.
#[derive(Debug)]
pub(crate) struct SlotCore {
    pub(crate) id: SubscriptionId,
    pub(crate) name: String,
    pub(crate) state: Mutex<SlotState>,
}

/// Routing target handed to the dispatcher.
#[derive(Debug, Clone)]
pub(crate) struct RouteTarget {
    pub(crate) core: Arc<SlotCore>,
    pub(crate) queue: mpsc::Sender<Event>,
}

struct RegistryInner {
    slots: RwLock<HashMap<String, RouteTarget>>,
    backend: Arc<dyn NotificationBackend>,
    errors: Arc<ErrorChannel>,
    queue_capacity: usize,
}

/// Name-keyed table of live subscriptions.
///
/// Cheap to clone; clones share the same table.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("queue_capacity", &self.inner.queue_capacity)
            .finish_non_exhaustive()
    }
}

/// Non-owning reference held by worker tasks.
#[derive(Debug, Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl fmt::Debug for RegistryInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RegistryInner")
    }
}

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<SubscriptionRegistry> {
        self.0.upgrade().map(|inner| SubscriptionRegistry { inner })
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry bound to `backend`.
    ///
    /// `queue_capacity` bounds each subscription's pending event queue
    /// (minimum 1).
    #[must_use]
    pub fn new(
        backend: Arc<dyn NotificationBackend>,
        errors: Arc<ErrorChannel>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: RwLock::new(HashMap::new()),
                backend,
                errors,
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Registers a new subscription with the backend.
    ///
    /// Names are unique among live subscriptions; a second registration
    /// under a live name is rejected, never replaces the first.
    ///
    /// # Errors
    ///
    /// - [`NotifyError::InvalidConnection`] if the backend session is not live.
    /// - [`NotifyError::DuplicateName`] if the name is in use.
    /// - [`NotifyError::BackendRejected`] if the backend refuses.
    pub async fn register(
        &self,
        spec: SubscriptionSpec,
        handler: EventHandler,
    ) -> Result<SubscriptionHandle, NotifyError> {
        if !self.inner.backend.is_live() {
            return Err(NotifyError::InvalidConnection);
        }

        let mut slots = self.inner.slots.write().await;
        if slots.contains_key(&spec.name) {
            return Err(NotifyError::DuplicateName(spec.name));
        }

        self.inner.backend.register(&spec).await?;

        let id = SubscriptionId::new();
        let name = spec.name.clone();
        tracing::info!(
            subscription = %name,
            %id,
            port = spec.delivery_port,
            timeout = spec.timeout_secs,
            "subscription registered"
        );

        let core = Arc::new(SlotCore {
            id,
            name: name.clone(),
            state: Mutex::new(SlotState {
                active: true,
                subscription: Subscription::new(spec, handler),
            }),
        });
        let (queue, rx) = mpsc::channel(self.inner.queue_capacity);
        tokio::spawn(dispatcher::run_worker(
            Arc::clone(&core),
            rx,
            WeakRegistry(Arc::downgrade(&self.inner)),
        ));
        slots.insert(name.clone(), RouteTarget { core, queue });

        Ok(SubscriptionHandle::new(name, id))
    }

    /// Adds a prepared query to the subscription's watch set.
    ///
    /// May be called any number of times; queries are kept in order.
    ///
    /// # Errors
    ///
    /// - [`NotifyError::InvalidHandle`] if the subscription was torn down.
    /// - [`NotifyError::UnsupportedQuery`] if the query is not a row-set query.
    /// - [`NotifyError::BackendRejected`] if the backend refuses the query.
    pub async fn attach_query(
        &self,
        handle: &SubscriptionHandle,
        query: PreparedQuery,
    ) -> Result<(), NotifyError> {
        let slots = self.inner.slots.read().await;
        let target = slots
            .get(handle.name())
            .filter(|t| t.core.id == handle.id())
            .ok_or_else(|| NotifyError::InvalidHandle(handle.name().to_string()))?;

        let mut state = target.core.state.lock().await;
        if !state.active {
            return Err(NotifyError::InvalidHandle(handle.name().to_string()));
        }
        query.watched_objects()?;

        self.inner.backend.watch(handle.name(), &query).await?;
        tracing::debug!(subscription = %handle.name(), query = %query.text(), "query attached");
        state.subscription.watch_set.push(query)
    }

    /// Tears a subscription down.
    ///
    /// Idempotent: a handle whose registration is already gone (removed
    /// earlier, or ended by the backend) is a no-op. Waits for an
    /// in-flight handler call on this subscription to return; no handler
    /// runs for it afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::BackendRejected`] if the backend fails to
    /// release its side. The local entry is removed regardless.
    pub async fn unregister(&self, handle: &SubscriptionHandle) -> Result<(), NotifyError> {
        let mut slots = self.inner.slots.write().await;
        let owned = slots
            .get(handle.name())
            .is_some_and(|t| t.core.id == handle.id());
        let Some(target) = owned.then(|| slots.remove(handle.name())).flatten() else {
            tracing::debug!(subscription = %handle.name(), "unregister on removed subscription");
            return Ok(());
        };

        let was_active = {
            let mut state = target.core.state.lock().await;
            std::mem::replace(&mut state.active, false)
        };
        // Dropping the sender lets the worker drain and exit.
        drop(target);
        if !was_active {
            return Ok(());
        }

        self.inner.backend.unregister(handle.name()).await?;
        tracing::info!(subscription = %handle.name(), id = %handle.id(), "subscription unregistered");
        Ok(())
    }

    /// Tears down every live subscription.
    ///
    /// # Errors
    ///
    /// Returns the last backend failure, after attempting all of them.
    pub async fn unregister_all(&self) -> Result<(), NotifyError> {
        let handles: Vec<SubscriptionHandle> = {
            let slots = self.inner.slots.read().await;
            slots
                .values()
                .map(|t| SubscriptionHandle::new(t.core.name.clone(), t.core.id))
                .collect()
        };

        let mut result = Ok(());
        for handle in &handles {
            if let Err(e) = self.unregister(handle).await {
                tracing::warn!(subscription = %handle.name(), error = %e, "unregister failed");
                result = Err(e);
            }
        }
        result
    }

    /// Returns a handle to the live subscription named `name`.
    pub async fn lookup(&self, name: &str) -> Option<SubscriptionHandle> {
        let slots = self.inner.slots.read().await;
        slots
            .get(name)
            .map(|t| SubscriptionHandle::new(t.core.name.clone(), t.core.id))
    }

    /// Returns a snapshot of the subscription behind `handle`.
    pub async fn describe(&self, handle: &SubscriptionHandle) -> Option<SubscriptionSummary> {
        let slots = self.inner.slots.read().await;
        let target = slots
            .get(handle.name())
            .filter(|t| t.core.id == handle.id())?;
        let state = target.core.state.lock().await;
        state
            .active
            .then(|| SubscriptionSummary::new(target.core.id, &state.subscription))
    }

    /// Returns snapshots of all live subscriptions, sorted by name.
    pub async fn list(&self) -> Vec<SubscriptionSummary> {
        let slots = self.inner.slots.read().await;
        let mut summaries = Vec::with_capacity(slots.len());
        for target in slots.values() {
            let state = target.core.state.lock().await;
            if state.active {
                summaries.push(SubscriptionSummary::new(target.core.id, &state.subscription));
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        summaries
    }

    /// Returns the number of registered subscriptions.
    pub async fn len(&self) -> usize {
        self.inner.slots.read().await.len()
    }

    /// Returns `true` if nothing is registered.
    pub async fn is_empty(&self) -> bool {
        self.inner.slots.read().await.is_empty()
    }

    /// Returns the error channel used for delivery-path problems.
    #[must_use]
    pub fn errors(&self) -> &Arc<ErrorChannel> {
        &self.inner.errors
    }

    pub(crate) async fn route(&self, name: &str) -> Option<RouteTarget> {
        self.inner.slots.read().await.get(name).cloned()
    }

    /// Drops the entry for `name` if it still belongs to registration `id`.
    ///
    /// Used after the backend ended a subscription on its own. Callers must
    /// not hold the registration lock.
    pub(crate) async fn forget(&self, name: &str, id: SubscriptionId) {
        let mut slots = self.inner.slots.write().await;
        if slots.get(name).is_some_and(|t| t.core.id == id) {
            slots.remove(name);
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::LoopbackBackend;
    use crate::domain::Scope;
    use crate::transport::Inbox;

    fn setup() -> (Arc<LoopbackBackend>, SubscriptionRegistry) {
        let (inbox, _rx) = Inbox::channel(16);
        let channel = Arc::new(ErrorChannel::new());
        let backend = Arc::new(LoopbackBackend::new("XE", inbox, Arc::clone(&channel)));
        let registry = SubscriptionRegistry::new(
            Arc::clone(&backend) as Arc<dyn NotificationBackend>,
            channel,
            8,
        );
        (backend, registry)
    }

    fn noop() -> EventHandler {
        EventHandler::new(|_| {})
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let (_backend, registry) = setup();
        let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange);
        let Ok(handle) = registry.register(spec, noop()).await else {
            panic!("register failed");
        };
        assert_eq!(registry.lookup("sub-00").await, Some(handle));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let (_backend, registry) = setup();
        let first = registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), noop())
            .await;
        assert!(first.is_ok());

        let second = registry
            .register(SubscriptionSpec::new("sub-00", Scope::ObjectChangeOnly), noop())
            .await;
        assert_eq!(second, Err(NotifyError::DuplicateName("sub-00".to_string())));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn dead_session_is_invalid_connection() {
        let (backend, registry) = setup();
        backend.disconnect();
        let result = registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), noop())
            .await;
        assert_eq!(result, Err(NotifyError::InvalidConnection));
    }

    #[tokio::test]
    async fn backend_refusal_leaves_no_entry() {
        let (_backend, registry) = setup();
        let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange).with_port(0);
        let result = registry.register(spec, noop()).await;
        assert!(matches!(result, Err(NotifyError::BackendRejected(_))));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn attach_rejects_non_select() {
        let (_backend, registry) = setup();
        let Ok(handle) = registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), noop())
            .await
        else {
            panic!("register failed");
        };
        let result = registry
            .attach_query(&handle, PreparedQuery::parse("delete from table1"))
            .await;
        assert!(matches!(result, Err(NotifyError::UnsupportedQuery(_))));
    }

    #[tokio::test]
    async fn attach_after_unregister_is_invalid_handle() {
        let (_backend, registry) = setup();
        let Ok(handle) = registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), noop())
            .await
        else {
            panic!("register failed");
        };
        assert!(registry.unregister(&handle).await.is_ok());
        let result = registry
            .attach_query(&handle, PreparedQuery::parse("select * from table1"))
            .await;
        assert_eq!(result, Err(NotifyError::InvalidHandle("sub-00".to_string())));
    }

    #[tokio::test]
    async fn unregister_twice_is_noop() {
        let (_backend, registry) = setup();
        let Ok(handle) = registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), noop())
            .await
        else {
            panic!("register failed");
        };
        assert!(registry.unregister(&handle).await.is_ok());
        assert!(registry.unregister(&handle).await.is_ok());
        assert_eq!(registry.lookup("sub-00").await, None);
    }

    #[tokio::test]
    async fn stale_handle_does_not_touch_new_registration() {
        let (_backend, registry) = setup();
        let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange);
        let Ok(old) = registry.register(spec.clone(), noop()).await else {
            panic!("register failed");
        };
        assert!(registry.unregister(&old).await.is_ok());
        let Ok(new) = registry.register(spec, noop()).await else {
            panic!("re-register failed");
        };

        assert!(registry.unregister(&old).await.is_ok());
        assert_eq!(registry.lookup("sub-00").await, Some(new));
    }

    #[tokio::test]
    async fn describe_reports_watched_queries() {
        let (_backend, registry) = setup();
        let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange)
            .with_port(5468)
            .with_timeout(0);
        let Ok(handle) = registry.register(spec, noop()).await else {
            panic!("register failed");
        };
        for text in ["select * from table1", "select * from table2"] {
            assert!(registry.attach_query(&handle, PreparedQuery::parse(text)).await.is_ok());
        }

        let Some(summary) = registry.describe(&handle).await else {
            panic!("summary missing");
        };
        assert_eq!(summary.delivery_port, 5468);
        let texts: Vec<&str> = summary.queries.iter().map(|q| q.text.as_str()).collect();
        assert_eq!(texts, ["select * from table1", "select * from table2"]);
    }

    #[tokio::test]
    async fn unregister_all_empties_registry() {
        let (_backend, registry) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        for name in ["a", "b", "c"] {
            let counter = Arc::clone(&calls);
            let handler = EventHandler::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            let spec = SubscriptionSpec::new(name, Scope::AnyChange);
            assert!(registry.register(spec, handler).await.is_ok());
        }
        assert_eq!(registry.list().await.len(), 3);

        assert!(registry.unregister_all().await.is_ok());
        assert!(registry.is_empty().await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
