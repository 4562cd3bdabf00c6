//! Delivery endpoint tests against a real listener.
//!
//! Each test binds the router on an ephemeral port, posts raw payloads
//! with `reqwest`, and observes the handler through a channel.

#![allow(clippy::panic, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_test::assert_ok;

use change_notify::app_state::AppState;
use change_notify::backend::{LoopbackBackend, NotificationBackend};
use change_notify::domain::{Event, EventHandler, Scope, SubscriptionRegistry, SubscriptionSpec};
use change_notify::service::decoder::{EVENT_STARTUP, OP_UPDATE, RawNotification};
use change_notify::service::{Dispatcher, ErrorChannel, ErrorRecord, Severity};
use change_notify::transport::{Inbox, http};

struct Server {
    addr: SocketAddr,
    registry: SubscriptionRegistry,
    errors: mpsc::UnboundedReceiver<ErrorRecord>,
    _sink: change_notify::service::ErrorSinkGuard,
}

async fn serve() -> Server {
    let (inbox, inbox_rx) = Inbox::channel(32);
    let channel = Arc::new(ErrorChannel::new());
    let backend: Arc<dyn NotificationBackend> = Arc::new(LoopbackBackend::new(
        "XE",
        inbox.clone(),
        Arc::clone(&channel),
    ));
    let (err_tx, errors) = mpsc::unbounded_channel();
    let sink = channel
        .install(move |r: &ErrorRecord| {
            let _ = err_tx.send(r.clone());
        })
        .unwrap();
    let registry = SubscriptionRegistry::new(backend, channel, 32);
    tokio::spawn(Dispatcher::new(registry.clone()).run(inbox_rx));

    let app = http::build_router(
        AppState {
            inbox,
            registry: registry.clone(),
        },
        Duration::from_secs(5),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await });

    Server {
        addr,
        registry,
        errors,
        _sink: sink,
    }
}

fn forwarding() -> (EventHandler, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = EventHandler::new(move |e: &Event| {
        let _ = tx.send(e.clone());
    });
    (handler, rx)
}

#[tokio::test]
async fn posted_payload_reaches_handler() {
    let server = serve().await;
    let (handler, mut rx) = forwarding();
    assert_ok!(
        server
            .registry
            .register(SubscriptionSpec::new("sub-00", Scope::AnyChange), handler)
            .await
    );

    let client = reqwest::Client::new();
    let raw = RawNotification::object_changed("XE", "sub-00", "table1", OP_UPDATE, Some("AAB"));
    let response = client
        .post(format!("http://{}/notify", server.addr))
        .json(&raw)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.object_name(), Some("table1"));
    assert_eq!(event.row_id(), Some("AAB"));
}

#[tokio::test]
async fn malformed_payload_is_accepted_then_reported() {
    let mut server = serve().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/notify", server.addr))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    let record = tokio::time::timeout(Duration::from_secs(2), server.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.severity, Severity::Error);
}

#[tokio::test]
async fn unknown_event_code_is_a_warning() {
    let mut server = serve().await;
    let raw = RawNotification::lifecycle(0x40, "XE", "sub-00");

    reqwest::Client::new()
        .post(format!("http://{}/notify", server.addr))
        .json(&raw)
        .send()
        .await
        .unwrap();

    let record = tokio::time::timeout(Duration::from_secs(2), server.errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.severity, Severity::Warning);
}

#[tokio::test]
async fn subscriptions_endpoint_lists_registrations() {
    let server = serve().await;
    let (handler, mut rx) = forwarding();
    assert_ok!(
        server
            .registry
            .register(SubscriptionSpec::new("sub-01", Scope::ObjectChangeOnly), handler)
            .await
    );

    let body: serde_json::Value = reqwest::get(format!("http://{}/subscriptions", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["count"], 1);
    assert_eq!(body["data"][0]["name"], "sub-01");

    // Lifecycle events are outside this subscription's scope.
    let raw = RawNotification::lifecycle(EVENT_STARTUP, "XE", "sub-01");
    reqwest::Client::new()
        .post(format!("http://{}/notify", server.addr))
        .json(&raw)
        .send()
        .await
        .unwrap();
    assert!(
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn health_is_healthy() {
    let server = serve().await;
    let body: serde_json::Value = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["subscriptions"], 0);
    assert!(matches!(
        body["version"].as_str(),
        Some(v) if v == env!("CARGO_PKG_VERSION")
    ));
}
