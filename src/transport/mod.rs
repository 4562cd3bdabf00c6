//! Inbound side of the notification transport.
//!
//! Backends never call handlers directly. Whatever thread or task receives
//! a raw payload pushes it into the [`Inbox`]; the dispatcher consumes the
//! other end. The HTTP delivery endpoint in [`http`] is one such producer.

pub mod http;

use tokio::sync::mpsc;

use crate::error::NotifyError;

/// One undecoded notification as received from the backend.
pub type RawPayload = Vec<u8>;

/// Cloneable producer handle for the dispatcher's inbound queue.
///
/// Backed by a bounded `tokio::mpsc` channel. Producers wait for room
/// when the dispatcher falls behind.
#[derive(Debug, Clone)]
pub struct Inbox {
    sender: mpsc::Sender<RawPayload>,
}

impl Inbox {
    /// Creates an inbox with the given capacity and the receiver the
    /// dispatcher should consume.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RawPayload>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Pushes a payload, waiting for queue room.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::InboxClosed`] if the dispatcher is gone.
    pub async fn push(&self, payload: RawPayload) -> Result<(), NotifyError> {
        self.sender
            .send(payload)
            .await
            .map_err(|_| NotifyError::InboxClosed)
    }

    /// Pushes a payload without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::InboxFull`] if the queue has no room, or
    /// [`NotifyError::InboxClosed`] if the dispatcher is gone.
    pub fn try_push(&self, payload: RawPayload) -> Result<(), NotifyError> {
        self.sender.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotifyError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => NotifyError::InboxClosed,
        })
    }

    /// Returns `true` once the dispatcher side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
