//! Service layer: payload decoding, event dispatch, and the error channel.
//!
//! [`Dispatcher`] turns raw payloads into [`crate::domain::Event`]s via the
//! [`decoder`] and routes them through the
//! [`crate::domain::SubscriptionRegistry`]. Problems on that path go to the
//! [`ErrorChannel`].

pub mod decoder;
pub mod dispatcher;
pub mod error_channel;

pub use dispatcher::{DeliveryOutcome, Dispatcher};
pub use error_channel::{ErrorChannel, ErrorRecord, ErrorSinkGuard, Severity};
