//! Decoded change notifications.
//!
//! An [`Event`] is built by the decoder for every raw payload and handed
//! to the owning subscription's handler. Fields that only make sense for
//! one kind live inside that kind's variant, and the row identity lives
//! inside the row-granular [`Change`] variants, so an `Alter` or `Drop`
//! can never carry one.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operation reported by an object change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Row inserted.
    Insert,
    /// Row updated.
    Update,
    /// Row deleted.
    Delete,
    /// Object definition altered.
    Alter,
    /// Object dropped.
    Drop,
}

impl Operation {
    /// Returns `true` for operations that affect a single row.
    #[must_use]
    pub const fn is_row_granular(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Returns the operation as a static string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Alter => "alter",
            Self::Drop => "drop",
        }
    }
}

/// What happened to a watched object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Change {
    /// A row was inserted.
    Insert {
        /// Identity of the inserted row.
        row_id: String,
    },
    /// A row was updated.
    Update {
        /// Identity of the updated row.
        row_id: String,
    },
    /// A row was deleted.
    Delete {
        /// Identity of the deleted row.
        row_id: String,
    },
    /// The object definition was altered.
    Alter,
    /// The object was dropped.
    Drop,
}

impl Change {
    /// Returns the flat operation tag.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Insert { .. } => Operation::Insert,
            Self::Update { .. } => Operation::Update,
            Self::Delete { .. } => Operation::Delete,
            Self::Alter => Operation::Alter,
            Self::Drop => Operation::Drop,
        }
    }

    /// Returns the row identity for row-granular changes.
    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        match self {
            Self::Insert { row_id } | Self::Update { row_id } | Self::Delete { row_id } => {
                Some(row_id)
            }
            Self::Alter | Self::Drop => None,
        }
    }
}

/// Event classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    /// The backend instance started.
    Startup,
    /// The backend instance shut down.
    Shutdown,
    /// Any instance of a clustered backend shut down.
    ShutdownAny,
    /// The database was dropped.
    DatabaseDropped,
    /// The backend ended the subscription.
    Deregistered,
    /// A watched object changed.
    ObjectChanged {
        /// Name of the watched entity.
        object_name: String,
        /// The change applied to it.
        #[serde(flatten)]
        change: Change,
    },
}

impl EventKind {
    /// Returns the kind as a static string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Shutdown => "shutdown",
            Self::ShutdownAny => "shutdown_any",
            Self::DatabaseDropped => "database_dropped",
            Self::Deregistered => "deregistered",
            Self::ObjectChanged { .. } => "object_changed",
        }
    }
}

/// One decoded notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Identifier of the backend instance that raised the event.
    pub source: String,
    /// Name of the subscription the event belongs to.
    pub subscription: String,
    /// When the decoder built this event.
    pub received_at: DateTime<Utc>,
    /// Kind-specific content.
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    /// Returns the changed object's name for `ObjectChanged` events.
    #[must_use]
    pub fn object_name(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ObjectChanged { object_name, .. } => Some(object_name),
            _ => None,
        }
    }

    /// Returns the operation for `ObjectChanged` events.
    #[must_use]
    pub fn operation(&self) -> Option<Operation> {
        match &self.kind {
            EventKind::ObjectChanged { change, .. } => Some(change.operation()),
            _ => None,
        }
    }

    /// Returns the row identity for row-granular `ObjectChanged` events.
    #[must_use]
    pub fn row_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ObjectChanged { change, .. } => change.row_id(),
            _ => None,
        }
    }

    /// Returns `true` if this event ends the subscription backend-side.
    #[must_use]
    pub const fn is_deregistration(&self) -> bool {
        matches!(self.kind, EventKind::Deregistered)
    }
}
