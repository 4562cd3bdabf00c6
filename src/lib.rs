//! # change-notify
//!
//! Change-notification subscription core.
//!
//! A client registers named subscriptions against a notification-capable
//! backend session, attaches the queries whose result sets it wants to
//! watch, and receives decoded [`domain::Event`]s on a per-subscription
//! handler whenever the backend pushes a lifecycle transition or an
//! object change. Delivery is asynchronous relative to the caller's own
//! statement execution.
//!
//! ## Architecture
//!
//! ```text
//! Backend session
//!     │  register / watch / unregister         raw payloads
//!     │◄──────────────────────────┐    ┌──────────────────────────┐
//!     │                           │    ▼                          │
//!     │              SubscriptionRegistry (domain/)      HTTP endpoint /
//!     │                           ▲    │                 loopback push
//!     │                           │    │                 (transport/)
//!     │                           │    ▼                          │
//!     │                    Dispatcher ◄── Inbox ◄──────────────────┘
//!     │                    (service/)
//!     │                       │  decode (service/decoder)
//!     │                       ├──► per-subscription queue ──► handler(Event)
//!     │                       └──► ErrorChannel (undecodable, overflow, panics)
//! ```

pub mod app_state;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod transport;
