//! Backend boundary: the session that accepts registrations and pushes
//! notifications.
//!
//! The registry talks to the backend only through [`NotificationBackend`].
//! Payload delivery goes the other way, through the
//! [`crate::transport::Inbox`] the backend (or its transport) was given.

pub mod loopback;

use async_trait::async_trait;

use crate::domain::{PreparedQuery, SubscriptionSpec};
use crate::error::BackendError;

pub use loopback::LoopbackBackend;

/// Registration side of a notification-capable session.
///
/// Calls may wait for backend acknowledgment; acknowledgment timeouts
/// belong to the implementation.
#[async_trait]
pub trait NotificationBackend: Send + Sync + 'static {
    /// Returns `true` while the session can accept registrations.
    fn is_live(&self) -> bool;

    /// Binds a subscription (name, delivery port, timeout) to the session.
    async fn register(&self, spec: &SubscriptionSpec) -> Result<(), BackendError>;

    /// Adds a query to the backend-side watch list of `subscription`.
    async fn watch(&self, subscription: &str, query: &PreparedQuery) -> Result<(), BackendError>;

    /// Releases backend-side resources for `subscription`.
    async fn unregister(&self, subscription: &str) -> Result<(), BackendError>;
}
