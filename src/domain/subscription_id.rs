//! Registration identity for one incarnation of a subscription.
//!
//! Names are reusable once a subscription is gone, so the registry pairs
//! each name with a fresh [`SubscriptionId`]. A handle whose id no longer
//! matches the live entry refers to a torn-down incarnation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a single registration.
///
/// Wraps a UUID v4 generated when the registry accepts a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(uuid::Uuid);

impl SubscriptionId {
    /// Creates a new random `SubscriptionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
