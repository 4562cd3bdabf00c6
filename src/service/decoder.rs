//! Raw notification payloads and their decoding into [`Event`]s.
//!
//! Backends push compact JSON objects keyed by numeric codes:
//!
//! ```json
//! { "event": 6, "database": "XE", "subscription": "sub-00",
//!   "object": "table1", "operation": 2, "rowid": "AAAR3sAAEAAAACXAAA" }
//! ```
//!
//! Which fields are meaningful depends on the codes. Decoding reads the
//! event code first, then the operation and object for object changes,
//! and the row id only for row-granular operations. A row id sent with an
//! `alter` or `drop` is ignored.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{Change, Event, EventKind};
use crate::error::DecodeError;

/// Event code: backend instance started.
pub const EVENT_STARTUP: u32 = 1;
/// Event code: backend instance shut down.
pub const EVENT_SHUTDOWN: u32 = 2;
/// Event code: any clustered instance shut down.
pub const EVENT_SHUTDOWN_ANY: u32 = 3;
/// Event code: database dropped.
pub const EVENT_DROP_DATABASE: u32 = 4;
/// Event code: subscription ended by the backend.
pub const EVENT_DEREGISTER: u32 = 5;
/// Event code: a watched object changed.
pub const EVENT_OBJECT_CHANGED: u32 = 6;

/// Operation code: row inserted.
pub const OP_INSERT: u32 = 0x2;
/// Operation code: row updated.
pub const OP_UPDATE: u32 = 0x4;
/// Operation code: row deleted.
pub const OP_DELETE: u32 = 0x8;
/// Operation code: object altered.
pub const OP_ALTER: u32 = 0x10;
/// Operation code: object dropped.
pub const OP_DROP: u32 = 0x20;

/// Wire shape of a raw notification.
///
/// Every field except the event code is optional on the wire; the
/// decoder decides which ones are required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RawNotification {
    /// Event code.
    pub event: u32,
    /// Backend instance identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Subscription name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Changed object, for object changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Operation code, for object changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<u32>,
    /// Row identity, for row-granular operations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rowid: Option<String>,
}

impl RawNotification {
    /// Builds a lifecycle notification (`startup`, `shutdown`, ...).
    #[must_use]
    pub fn lifecycle(event: u32, database: &str, subscription: &str) -> Self {
        Self {
            event,
            database: Some(database.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::default()
        }
    }

    /// Builds an object change notification.
    #[must_use]
    pub fn object_changed(
        database: &str,
        subscription: &str,
        object: &str,
        operation: u32,
        rowid: Option<&str>,
    ) -> Self {
        Self {
            event: EVENT_OBJECT_CHANGED,
            database: Some(database.to_string()),
            subscription: Some(subscription.to_string()),
            object: Some(object.to_string()),
            operation: Some(operation),
            rowid: rowid.map(str::to_string),
        }
    }

    /// Encodes the notification as a JSON payload.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

/// Decodes a raw payload into an [`Event`].
///
/// Pure apart from allocation and reading the clock for `received_at`.
///
/// # Errors
///
/// - [`DecodeError::Malformed`] if the payload is not a notification object.
/// - [`DecodeError::UnknownCode`] for an unrecognized event or operation code.
/// - [`DecodeError::MissingField`] if a field required by the codes is absent.
pub fn decode(payload: &[u8]) -> Result<Event, DecodeError> {
    let raw: RawNotification =
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    decode_raw(raw)
}

/// Decodes an already-parsed notification.
///
/// # Errors
///
/// Same as [`decode`], minus [`DecodeError::Malformed`].
pub fn decode_raw(raw: RawNotification) -> Result<Event, DecodeError> {
    let kind = match raw.event {
        EVENT_STARTUP => EventKind::Startup,
        EVENT_SHUTDOWN => EventKind::Shutdown,
        EVENT_SHUTDOWN_ANY => EventKind::ShutdownAny,
        EVENT_DROP_DATABASE => EventKind::DatabaseDropped,
        EVENT_DEREGISTER => EventKind::Deregistered,
        EVENT_OBJECT_CHANGED => {
            let operation = raw.operation.ok_or(DecodeError::MissingField("operation"))?;
            let change = decode_change(operation, raw.rowid)?;
            let object_name = raw.object.ok_or(DecodeError::MissingField("object"))?;
            EventKind::ObjectChanged {
                object_name,
                change,
            }
        }
        other => return Err(DecodeError::UnknownCode(other)),
    };

    let subscription = raw
        .subscription
        .ok_or(DecodeError::MissingField("subscription"))?;

    Ok(Event {
        source: raw.database.unwrap_or_default(),
        subscription,
        received_at: Utc::now(),
        kind,
    })
}

fn decode_change(operation: u32, rowid: Option<String>) -> Result<Change, DecodeError> {
    let row_id = || rowid.clone().ok_or(DecodeError::MissingField("rowid"));
    match operation {
        OP_INSERT => Ok(Change::Insert { row_id: row_id()? }),
        OP_UPDATE => Ok(Change::Update { row_id: row_id()? }),
        OP_DELETE => Ok(Change::Delete { row_id: row_id()? }),
        OP_ALTER => Ok(Change::Alter),
        OP_DROP => Ok(Change::Drop),
        other => Err(DecodeError::UnknownCode(other)),
    }
}
