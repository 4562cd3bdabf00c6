//! Asynchronous delivery path from raw payloads to subscription handlers.
//!
//! ```text
//! transport ──► Inbox ──► Dispatcher::run ──► decode ──► route by name
//!                                                           │
//!                ┌──────────────────────────────────────────┤
//!                ▼                                          ▼
//!   [queue sub-00] ──► worker ──► handler      [queue sub-01] ──► worker ──► handler
//! ```
//!
//! Each subscription owns a bounded FIFO queue drained by one worker task,
//! so its handler sees events in arrival order and never overlaps with
//! itself, while different subscriptions run concurrently.
//!
//! [`Dispatcher::deliver`] is the direct path: decode, route, and invoke
//! inline, returning once the handler has run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::decoder;
use super::error_channel::ErrorRecord;
use crate::domain::registry::{SlotCore, WeakRegistry};
use crate::domain::{Event, SubscriptionRegistry};
use crate::error::DecodeError;
use crate::transport::RawPayload;

/// What happened to one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The handler ran.
    Delivered,
    /// The event is waiting in the subscription's queue.
    Queued,
    /// The subscription's scope excludes this event kind.
    Filtered,
    /// The subscription was torn down before the handler could run.
    Discarded,
    /// No live subscription carries the event's name.
    Unrouted,
    /// The subscription's queue was full; the event was dropped.
    Overflow,
    /// The payload could not be decoded.
    Undecodable(DecodeError),
}

/// Decodes inbound payloads and hands events to their subscriptions.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: SubscriptionRegistry,
}

impl Dispatcher {
    /// Creates a dispatcher routing through `registry`.
    #[must_use]
    pub const fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    /// Returns the registry this dispatcher routes through.
    #[must_use]
    pub const fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Decodes `payload` and invokes the owning handler before returning.
    ///
    /// Decode failures are reported on the error channel; routing misses
    /// are dropped silently.
    pub async fn deliver(&self, payload: &[u8]) -> DeliveryOutcome {
        let event = match self.decode(payload) {
            Ok(event) => event,
            Err(e) => return DeliveryOutcome::Undecodable(e),
        };
        let Some(target) = self.registry.route(&event.subscription).await else {
            tracing::debug!(subscription = %event.subscription, "no subscription for event");
            return DeliveryOutcome::Unrouted;
        };
        invoke(&target.core, event, &self.registry).await
    }

    /// Decodes `payload` and queues the event for its subscription's worker.
    pub async fn route(&self, payload: &[u8]) -> DeliveryOutcome {
        let event = match self.decode(payload) {
            Ok(event) => event,
            Err(e) => return DeliveryOutcome::Undecodable(e),
        };
        let Some(target) = self.registry.route(&event.subscription).await else {
            tracing::debug!(subscription = %event.subscription, "no subscription for event");
            return DeliveryOutcome::Unrouted;
        };

        match target.queue.try_send(event) {
            Ok(()) => DeliveryOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(subscription = %event.subscription, "subscription queue full");
                self.registry.errors().report(ErrorRecord::warning(format!(
                    "event queue for subscription {} is full; {} event dropped",
                    event.subscription,
                    event.kind.as_str()
                )));
                DeliveryOutcome::Overflow
            }
            Err(mpsc::error::TrySendError::Closed(_)) => DeliveryOutcome::Discarded,
        }
    }

    /// Consumes the inbound queue until every sender is dropped.
    pub async fn run(self, mut inbox: mpsc::Receiver<RawPayload>) {
        tracing::info!("dispatcher started");
        while let Some(payload) = inbox.recv().await {
            let _ = self.route(&payload).await;
        }
        tracing::info!("dispatcher stopped");
    }

    fn decode(&self, payload: &[u8]) -> Result<Event, DecodeError> {
        decoder::decode(payload).inspect_err(|e| {
            tracing::warn!(error = %e, "dropping undecodable notification");
            let record = match e {
                DecodeError::UnknownCode(_) => ErrorRecord::warning(e.to_string()),
                DecodeError::Malformed(_) | DecodeError::MissingField(_) => {
                    ErrorRecord::error(e.to_string())
                }
            };
            self.registry.errors().report(record);
        })
    }
}

/// Drains one subscription's queue until its sender is dropped.
pub(crate) async fn run_worker(
    core: Arc<SlotCore>,
    mut queue: mpsc::Receiver<Event>,
    registry: WeakRegistry,
) {
    while let Some(event) = queue.recv().await {
        let Some(registry) = registry.upgrade() else {
            break;
        };
        let _ = invoke(&core, event, &registry).await;
    }
    tracing::debug!(subscription = %core.name, id = %core.id, "subscription worker stopped");
}

/// Runs the handler for `event` under the registration lock.
///
/// A `Deregistered` event retires the registration after the handler
/// returns.
async fn invoke(core: &SlotCore, event: Event, registry: &SubscriptionRegistry) -> DeliveryOutcome {
    let mut state = core.state.lock().await;
    if !state.active {
        tracing::debug!(subscription = %core.name, "discarding event for retired subscription");
        return DeliveryOutcome::Discarded;
    }
    if !state.subscription.spec.scope.accepts(&event.kind) {
        tracing::debug!(subscription = %core.name, kind = event.kind.as_str(), "event filtered by scope");
        return DeliveryOutcome::Filtered;
    }

    let handler = &state.subscription.handler;
    if catch_unwind(AssertUnwindSafe(|| handler.call(&event))).is_err() {
        tracing::warn!(subscription = %core.name, "event handler panicked");
        registry.errors().report(ErrorRecord::error(format!(
            "handler for subscription {} panicked on {} event",
            core.name,
            event.kind.as_str()
        )));
    }

    if event.is_deregistration() {
        state.active = false;
        drop(state);
        registry.forget(&core.name, core.id).await;
        tracing::info!(subscription = %core.name, "subscription deregistered by backend");
    }
    DeliveryOutcome::Delivered
}
