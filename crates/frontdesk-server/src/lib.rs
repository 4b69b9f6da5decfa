//! Frontdesk server: HTTP surface, application state, and background tasks.
//!
//! Routes:
//! - `GET /health` — status and version.
//! - `POST /voice` — telephony voice webhook; answers with TwiML connecting
//!   the call to the media stream.
//! - `GET /media-stream` — WebSocket upgrade handled by the media relay.
//! - `POST /api/calls/{call_sid}/tools/{tool}` — explicit tool dispatch.

pub mod background;
pub mod config;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Form, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use frontdesk_relay::{twilio, MediaRelay};
use frontdesk_session::SessionStore;
use frontdesk_tools::Dispatcher;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

pub use config::{load_config, Config, ConfigError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared application state accessible from all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sessions: SessionStore,
    pub dispatcher: Dispatcher,
    pub relay: MediaRelay,
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/voice", post(voice_webhook))
        .route("/media-stream", get(media_stream_upgrade))
        .route("/api/calls/{call_sid}/tools/{tool}", post(dispatch_tool))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": VERSION,
    }))
}

/// Form fields the telephony provider posts to the voice webhook.
#[derive(Debug, Deserialize)]
struct VoiceWebhook {
    #[serde(rename = "From")]
    from: Option<String>,
    #[serde(rename = "CallSid")]
    call_sid: Option<String>,
}

/// Answers an incoming call with TwiML that connects its audio to the
/// media-stream WebSocket, passing the caller number through as a stream
/// parameter.
async fn voice_webhook(
    State(state): State<AppState>,
    Form(webhook): Form<VoiceWebhook>,
) -> Response {
    let caller = webhook.from.unwrap_or_default();
    tracing::info!(
        call_sid = webhook.call_sid.as_deref().unwrap_or("<unknown>"),
        "incoming call"
    );

    let ws_url = media_stream_url(&state.config.server.public_url);
    let twiml = twilio::connect_stream_twiml(&ws_url, &caller);
    ([(header::CONTENT_TYPE, "text/xml")], twiml).into_response()
}

async fn media_stream_upgrade(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| async move {
        state.relay.handle(socket).await;
    })
}

/// Dispatches one tool invocation against a call session.
///
/// Always answers `200 OK`; success or failure is carried in the uniform
/// result body.
async fn dispatch_tool(
    State(state): State<AppState>,
    Path((call_sid, tool)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Json<Value> {
    let result = state.dispatcher.dispatch(&call_sid, &tool, payload).await;
    Json(serde_json::to_value(&result).unwrap_or_else(|_| json!({ "ok": false })))
}

/// Derives the WebSocket media-stream URL from the public base URL.
fn media_stream_url(public_url: &str) -> String {
    let base = public_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{ws_base}/media-stream")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use frontdesk_connect::{HttpCalendar, HttpCrm, TwilioSms, WebhookAlerts};
    use frontdesk_idempotency::EffectExecutor;
    use frontdesk_relay::RealtimeSettings;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let path = dir.path().join("server.db");
        let pool = frontdesk_db::create_pool(
            path.to_str().unwrap(),
            frontdesk_db::DbRuntimeSettings::default(),
        )
        .expect("pool");
        {
            let conn = pool.get().expect("connection");
            frontdesk_db::run_migrations(&conn).expect("migrations");
        }

        let config = Config::default();
        let http = reqwest::Client::new();
        let sessions = SessionStore::new();
        let alerts = Arc::new(WebhookAlerts::new(http.clone(), "http://127.0.0.1:9/hook"));
        let dispatcher = Dispatcher::new(
            sessions.clone(),
            EffectExecutor::new(pool),
            Arc::new(HttpCrm::new(http.clone(), "http://127.0.0.1:9", "t")),
            Arc::new(HttpCalendar::new(http.clone(), "http://127.0.0.1:9", "t", "primary")),
            Arc::new(TwilioSms::new(http, "AC0", "t", "+15550000000")),
            alerts.clone(),
        );
        let relay = MediaRelay::new(
            sessions.clone(),
            dispatcher.clone(),
            RealtimeSettings {
                api_key: String::new(),
                model: config.openai.model.clone(),
                voice: config.openai.voice.clone(),
                instructions: config.openai.instructions.clone(),
            },
            alerts,
        );

        AppState {
            config,
            sessions,
            dispatcher,
            relay,
        }
    }

    #[tokio::test]
    async fn health_check_returns_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(&dir));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], VERSION);
    }

    #[tokio::test]
    async fn voice_webhook_answers_with_stream_twiml() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/voice")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("From=%2B15550001111&CallSid=CA1"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let twiml = String::from_utf8(body.to_vec()).unwrap();
        assert!(twiml.contains("<Connect>"));
        assert!(twiml.contains("ws://localhost:3000/media-stream"));
        assert!(twiml.contains("+15550001111"));
    }

    #[tokio::test]
    async fn tool_dispatch_route_returns_uniform_result() {
        let dir = tempfile::tempdir().unwrap();
        let app = app(test_state(&dir));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/calls/CA-none/tools/capture_identity")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"first_name":"Ada","last_name":"Lovelace"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        // Dispatch failures still answer 200; the body carries the error.
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "session_not_found");
    }

    #[test]
    fn media_stream_url_swaps_scheme() {
        assert_eq!(
            media_stream_url("https://frontdesk.example/"),
            "wss://frontdesk.example/media-stream"
        );
        assert_eq!(
            media_stream_url("http://localhost:3000"),
            "ws://localhost:3000/media-stream"
        );
    }
}
