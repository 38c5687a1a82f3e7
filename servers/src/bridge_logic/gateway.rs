//! Publish gateway: a plain HTTP surface for callers that do not hold a
//! realtime connection. `POST /publish` forwards onto the broker link and
//! answers only after the publish attempt resolved; `GET /health` always
//! succeeds.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use crate::bridge_logic::config::Settings;
use crate::bridge_logic::model::{PublishBody, now_millis};
use crate::bridge_logic::state::AppState;

pub async fn run(cfg: Settings, state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            log::error!("failed to bind gateway port {}: {}", addr, e);
            return;
        }
    };
    log::info!("publish gateway listening on http://{}", addr);

    let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown.recv().await.ok();
        log::info!("publish gateway shutting down");
    });

    if let Err(e) = serve.await {
        log::error!("publish gateway error: {}", e);
    }
}

pub(crate) fn router(state: AppState) -> Router {
    // The expected caller is a browser dashboard on another origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/publish", post(publish_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Validates `{ topic, payload }`, canonicalizes the payload to text and
/// forwards it onto the broker link. The response mirrors the attempt:
/// 200 `{"published":true}`, 400 on a malformed body (the broker is never
/// contacted), 500 with the failure description otherwise.
pub(crate) async fn publish_handler(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let request = match PublishBody::from_value(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            );
        }
    };

    match state.publish(request.topic, request.payload).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "published": true }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}

pub(crate) async fn health_handler() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "ok": true, "ts": now_millis() })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge_logic::error::PublishError;
    use crate::bridge_logic::state::{LinkState, PublishRequest};
    use serde_json::json;
    use tokio::sync::mpsc;

    /// State wired to a scripted broker link answering every request with
    /// the given result and echoing what it saw.
    fn scripted_state(
        reply: Result<(), PublishError>,
    ) -> (AppState, mpsc::UnboundedReceiver<(String, String)>) {
        let state = AppState::new(8);
        state.set_link_state(LinkState::Subscribed);

        let (publish_tx, mut publish_rx) = mpsc::channel::<PublishRequest>(8);
        state.set_publish_tx(publish_tx);

        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut reply = Some(reply);
            while let Some(request) = publish_rx.recv().await {
                let _ = seen_tx.send((request.topic.clone(), request.payload.clone()));
                let outcome = reply.take().unwrap_or(Ok(()));
                let _ = request.responder.send(outcome);
            }
        });

        (state, seen_rx)
    }

    #[tokio::test]
    async fn valid_publish_is_forwarded_once_and_acknowledged() {
        let (state, mut seen) = scripted_state(Ok(()));

        let body = json!({ "topic": "cmd/light", "payload": { "on": true } });
        let (status, Json(response)) = publish_handler(State(state), Json(body)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(response, json!({ "published": true }));

        let (topic, payload) = seen.recv().await.expect("one forwarded publish");
        assert_eq!(topic, "cmd/light");
        assert_eq!(payload, r#"{"on":true}"#);
        assert!(seen.try_recv().is_err(), "exactly one publish attempt");
    }

    #[tokio::test]
    async fn missing_topic_is_client_error_and_broker_stays_untouched() {
        let (state, mut seen) = scripted_state(Ok(()));

        let body = json!({ "payload": "x" });
        let (status, Json(response)) = publish_handler(State(state), Json(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].is_string());
        assert!(seen.try_recv().is_err(), "no broker interaction");
    }

    #[tokio::test]
    async fn missing_payload_is_client_error() {
        let (state, mut seen) = scripted_state(Ok(()));

        let body = json!({ "topic": "cmd/light" });
        let (status, Json(response)) = publish_handler(State(state), Json(body)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].is_string());
        assert!(seen.try_recv().is_err());
    }

    #[tokio::test]
    async fn broker_rejection_maps_to_server_error() {
        let rejected = redis::RedisError::from((redis::ErrorKind::IoError, "connection refused"));
        let (state, _seen) = scripted_state(Err(PublishError::Broker(rejected)));

        let body = json!({ "topic": "cmd/light", "payload": "on" });
        let (status, Json(response)) = publish_handler(State(state), Json(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response["error"].is_string());
    }

    #[tokio::test]
    async fn publish_while_link_down_is_server_error_without_broker_call() {
        let (state, mut seen) = scripted_state(Ok(()));
        state.set_link_state(LinkState::Disconnected);

        let body = json!({ "topic": "cmd/light", "payload": "on" });
        let (status, Json(response)) = publish_handler(State(state), Json(body)).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response["error"], "broker link is not connected");
        assert!(seen.try_recv().is_err(), "request must not reach the queue");
    }

    #[tokio::test]
    async fn health_always_reports_ok() {
        let (status, Json(response)) = health_handler().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["ok"], true);
        assert!(response["ts"].is_i64());
    }
}
