//! Shared state injected into the delivery endpoint handlers.

use crate::domain::SubscriptionRegistry;
use crate::transport::Inbox;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Producer side of the dispatcher's inbound queue.
    pub inbox: Inbox,
    /// Registry, for read-only listing.
    pub registry: SubscriptionRegistry,
}
