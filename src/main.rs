//! change-notify demonstration entry point.
//!
//! Starts the dispatcher and the HTTP delivery endpoint, then drives a
//! loopback session through DDL and DML while a subscription watches two
//! tables, logging every notification it receives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use change_notify::app_state::AppState;
use change_notify::backend::{LoopbackBackend, NotificationBackend};
use change_notify::config::NotifyConfig;
use change_notify::domain::{
    Event, EventHandler, EventKind, Scope, SubscriptionRegistry, SubscriptionSpec,
};
use change_notify::service::{Dispatcher, ErrorChannel, ErrorRecord};
use change_notify::transport::{Inbox, http};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = NotifyConfig::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Process-wide error sink
    let errors = ErrorChannel::global();
    let _sink = errors.install(error_handler)?;

    // Transport and backend session
    let (inbox, inbox_rx) = Inbox::channel(config.inbox_capacity);
    let session = Arc::new(LoopbackBackend::new(
        "XE",
        inbox.clone(),
        Arc::clone(&errors),
    ));
    let backend: Arc<dyn NotificationBackend> = Arc::clone(&session) as _;

    // Registry and dispatcher
    let registry = SubscriptionRegistry::new(
        backend,
        Arc::clone(&errors),
        config.subscription_queue_capacity,
    );
    let dispatcher = tokio::spawn(Dispatcher::new(registry.clone()).run(inbox_rx));

    // Delivery endpoint
    let app = http::build_router(
        AppState {
            inbox,
            registry: registry.clone(),
        },
        config.request_timeout(),
    );
    let listener = tokio::net::TcpListener::bind(config.delivery_addr())
        .await
        .with_context(|| format!("binding delivery endpoint {}", config.delivery_addr()))?;
    tracing::info!(addr = %config.delivery_addr(), "delivery endpoint listening");
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    run_session(&config, &session, &registry).await?;

    // Cleanup
    registry.unregister_all().await?;
    // The loopback session holds an inbox sender, so the dispatcher loop
    // never sees its queue close on its own.
    server.abort();
    dispatcher.abort();
    tracing::info!("done");

    Ok(())
}

/// Runs the table/subscription scenario against the loopback session.
///
/// Statement failures are already on the error channel, so the walk-through
/// keeps going past them. Registration failures skip the watched part.
async fn run_session(
    config: &NotifyConfig,
    session: &LoopbackBackend,
    registry: &SubscriptionRegistry,
) -> anyhow::Result<()> {
    let wait = Duration::from_millis(config.demo_event_wait_ms);

    tracing::info!("creating tables");
    run(session, "create table table1(code number)").await;
    run(session, "create table table2(str varchar2(10))").await;

    tracing::info!("registering subscription");
    let spec = SubscriptionSpec::new("sub-00", Scope::AnyChange)
        .with_port(config.delivery_port)
        .with_timeout(config.subscription_timeout_secs);
    let sub = match registry.register(spec, EventHandler::new(event_handler)).await {
        Ok(sub) => Some(sub),
        Err(e) => {
            tracing::error!(error = %e, "subscription not registered");
            None
        }
    };

    if let Some(sub) = &sub {
        tracing::info!("adding queries to be notified");
        for text in ["select * from table1", "select * from table2"] {
            registry
                .attach_query(sub, session.prepare(text))
                .await
                .with_context(|| format!("watching {text}"))?;
        }
    }

    tracing::info!("executing DDL");
    run(session, "alter table table1 add price number").await;
    tokio::time::sleep(wait).await;

    tracing::info!("executing DML");
    run(session, "insert into table1 values(1, 10.5)").await;
    run(session, "insert into table2 values('shoes')").await;
    run(session, "update table1 set price = 13.5 where code = 1").await;
    run(session, "delete from table2 ").await;
    tokio::time::sleep(wait).await;

    tracing::info!("dropping tables");
    run(session, "drop table table1").await;
    run(session, "drop table table2").await;
    tokio::time::sleep(wait).await;

    if let Some(sub) = &sub {
        tracing::info!("unregistering subscription");
        registry.unregister(sub).await?;
    }
    Ok(())
}

/// Executes one statement; a failure is left to the error sink.
async fn run(session: &LoopbackBackend, text: &str) {
    if let Ok(pushed) = session.execute(text).await {
        tracing::debug!(statement = text, pushed, "executed");
    }
}

fn event_handler(event: &Event) {
    let kind = event.kind.as_str();
    match &event.kind {
        EventKind::ObjectChanged { object_name, change } => tracing::info!(
            subscription = %event.subscription,
            database = %event.source,
            kind,
            object = %object_name,
            action = change.operation().as_str(),
            rowid = change.row_id(),
            "notification"
        ),
        _ => tracing::info!(
            subscription = %event.subscription,
            database = %event.source,
            kind,
            "notification"
        ),
    }
}

fn error_handler(record: &ErrorRecord) {
    tracing::warn!(severity = %record.severity, message = %record.message, "backend problem");
}
