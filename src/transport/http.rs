//! HTTP delivery endpoint bound to the subscription delivery port.
//!
//! | Method | Path             | Purpose                              |
//! |--------|------------------|--------------------------------------|
//! | POST   | `/notify`        | Accept one raw notification payload  |
//! | GET    | `/subscriptions` | List live subscriptions              |
//! | GET    | `/health`        | Liveness and subscription count      |

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};

use crate::app_state::AppState;
use crate::domain::SubscriptionSummary;
use crate::error::{ErrorResponse, NotifyError};
use crate::service::decoder::RawNotification;

/// Acknowledgment for an accepted payload.
#[derive(Debug, Serialize, ToSchema)]
pub struct AcceptedResponse {
    /// Always `"queued"`.
    pub status: String,
    /// Size of the accepted payload in bytes.
    pub bytes: usize,
}

/// Live subscriptions.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubscriptionListResponse {
    /// Subscription snapshots sorted by name.
    pub data: Vec<SubscriptionSummary>,
    /// Number of entries in `data`.
    pub count: usize,
}

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    subscriptions: usize,
}

/// `POST /notify`: Accept one raw notification payload.
///
/// The payload is queued for the dispatcher without being decoded here;
/// malformed payloads are reported on the error channel later.
///
/// # Errors
///
/// Returns [`NotifyError::InboxFull`] or [`NotifyError::InboxClosed`] when
/// the dispatcher cannot take the payload.
#[utoipa::path(
    post,
    path = "/notify",
    tag = "Delivery",
    summary = "Push a raw notification",
    description = "Queues one backend notification payload for decoding and dispatch.",
    request_body(content = RawNotification, content_type = "application/json"),
    responses(
        (status = 202, description = "Payload queued", body = AcceptedResponse),
        (status = 503, description = "Dispatcher unavailable or behind", body = ErrorResponse),
    )
)]
pub async fn notify_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, NotifyError> {
    let bytes = body.len();
    state.inbox.try_push(body.to_vec())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "queued".to_string(),
            bytes,
        }),
    ))
}

/// `GET /subscriptions`: List live subscriptions.
#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "Subscriptions",
    summary = "List subscriptions",
    description = "Returns every live subscription with its watched queries.",
    responses(
        (status = 200, description = "Subscription list", body = SubscriptionListResponse),
    )
)]
pub async fn list_subscriptions_handler(State(state): State<AppState>) -> impl IntoResponse {
    let data = state.registry.list().await;
    let count = data.len();
    Json(SubscriptionListResponse { data, count })
}

/// `GET /health`: Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, and the live subscription count.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let status = if state.inbox.is_closed() {
        "degraded"
    } else {
        "healthy"
    };
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: status.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            subscriptions: state.registry.len().await,
        }),
    )
}

/// OpenAPI document for the delivery endpoint.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(notify_handler, list_subscriptions_handler, health_handler),
    tags(
        (name = "Delivery", description = "Inbound backend notifications"),
        (name = "Subscriptions", description = "Subscription introspection"),
        (name = "System", description = "Health"),
    )
)]
pub struct ApiDoc;

/// Builds the delivery endpoint router.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let router = Router::new()
        .route("/notify", post(notify_handler))
        .route("/subscriptions", get(list_subscriptions_handler))
        .route("/health", get(health_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::backend::{LoopbackBackend, NotificationBackend};
    use crate::domain::{EventHandler, Scope, SubscriptionRegistry, SubscriptionSpec};
    use crate::service::Dispatcher;
    use crate::service::decoder::EVENT_STARTUP;
    use crate::service::error_channel::ErrorChannel;
    use crate::transport::Inbox;

    fn state(capacity: usize) -> (AppState, tokio::sync::mpsc::Receiver<Vec<u8>>) {
        let (inbox, rx) = Inbox::channel(capacity);
        let channel = Arc::new(ErrorChannel::new());
        let backend: Arc<dyn NotificationBackend> = Arc::new(LoopbackBackend::new(
            "XE",
            inbox.clone(),
            Arc::clone(&channel),
        ));
        let registry = SubscriptionRegistry::new(backend, channel, 4);
        (AppState { inbox, registry }, rx)
    }

    fn post_notify(body: &'static str) -> Request<Body> {
        let Ok(req) = Request::builder()
            .method("POST")
            .uri("/notify")
            .header("content-type", "application/json")
            .body(Body::from(body))
        else {
            panic!("request build failed");
        };
        req
    }

    #[tokio::test]
    async fn notify_queues_raw_payload() {
        let (state, mut rx) = state(4);
        let app = build_router(state, Duration::from_secs(5));

        let body = r#"{"event":1,"database":"XE","subscription":"sub-00"}"#;
        let Ok(response) = app.oneshot(post_notify(body)).await else {
            panic!("request failed");
        };
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(rx.recv().await.as_deref(), Some(body.as_bytes()));
    }

    #[tokio::test]
    async fn notify_with_closed_inbox_is_unavailable() {
        let (state, rx) = state(4);
        drop(rx);
        let app = build_router(state, Duration::from_secs(5));

        let Ok(response) = app.oneshot(post_notify("{}")).await else {
            panic!("request failed");
        };
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_reports_subscription_count() {
        let (state, _rx) = state(4);
        let app = build_router(state, Duration::from_secs(5));

        let Ok(req) = Request::builder().uri("/health").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app.oneshot(req).await else {
            panic!("request failed");
        };
        assert_eq!(response.status(), StatusCode::OK);
        let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["subscriptions"], 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_request_times_out_with_408() {
        let (state, _rx) = state(4);
        let (entered_tx, mut entered) = tokio::sync::mpsc::unbounded_channel();
        let handler = EventHandler::new(move |_| {
            let _ = entered_tx.send(());
            std::thread::sleep(Duration::from_millis(500));
        });
        let spec = SubscriptionSpec::new("slow", Scope::AnyChange);
        assert!(state.registry.register(spec, handler).await.is_ok());

        // The handler holds its registration lock, which the listing waits on.
        let dispatcher = Dispatcher::new(state.registry.clone());
        let payload = RawNotification::lifecycle(EVENT_STARTUP, "XE", "slow").to_bytes();
        let delivery = tokio::spawn(async move { dispatcher.deliver(&payload).await });
        assert_eq!(entered.recv().await, Some(()));

        let app = build_router(state, Duration::from_millis(50));
        let Ok(req) = Request::builder().uri("/subscriptions").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app.oneshot(req).await else {
            panic!("request failed");
        };
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(delivery.await.is_ok());
    }

    #[test]
    fn openapi_lists_delivery_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/notify"));
        assert!(doc.paths.paths.contains_key("/subscriptions"));
    }
}
