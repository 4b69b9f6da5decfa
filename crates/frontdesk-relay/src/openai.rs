//! AI-peer protocol: connecting, session configuration, and event parsing
//! for the OpenAI Realtime API over WebSocket.

use crate::error::RelayError;
use frontdesk_tools::{FieldKind, ToolSpec, TOOLS};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type AiSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The AI error code sent when a cancel arrives after the response already
/// finished. Expected during barge-in races and logged without alarm.
pub const CANCEL_NOT_ACTIVE: &str = "response_cancel_not_active";

/// Settings for the AI peer connection.
#[derive(Debug, Clone)]
pub struct RealtimeSettings {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub instructions: String,
}

/// Dials the AI peer.
///
/// # Errors
///
/// [`RelayError::MissingCredentials`] without an API key, or the underlying
/// WebSocket error when the dial fails.
pub async fn connect(settings: &RealtimeSettings) -> Result<AiSocket, RelayError> {
    if settings.api_key.is_empty() {
        return Err(RelayError::MissingCredentials);
    }

    let url = format!("wss://api.openai.com/v1/realtime?model={}", settings.model);
    let mut request = url.into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", settings.api_key))
        .map_err(|_| RelayError::MissingCredentials)?;
    let headers = request.headers_mut();
    headers.insert("Authorization", bearer);
    headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
    tracing::info!(model = %settings.model, "AI peer connected");
    Ok(socket)
}

/// The `session.update` sent once after connect: telephony audio in both
/// directions (g711 mu-law), server-side turn detection, and the tool table.
pub fn session_update(settings: &RealtimeSettings) -> String {
    json!({
        "type": "session.update",
        "session": {
            "modalities": ["audio", "text"],
            "voice": settings.voice,
            "instructions": settings.instructions,
            "input_audio_format": "g711_ulaw",
            "output_audio_format": "g711_ulaw",
            "turn_detection": { "type": "server_vad" },
            "tools": tool_schemas(),
            "tool_choice": "auto",
        },
    })
    .to_string()
}

/// Asks the AI to produce a response (greeting, or after a tool result).
pub fn response_create() -> String {
    json!({ "type": "response.create" }).to_string()
}

/// Cancels the in-flight response on barge-in.
pub fn response_cancel() -> String {
    json!({ "type": "response.cancel" }).to_string()
}

/// Forwards one caller audio frame (base64 passed through).
pub fn input_audio_append(payload: &str) -> String {
    json!({
        "type": "input_audio_buffer.append",
        "audio": payload,
    })
    .to_string()
}

/// Returns a tool result to the conversation.
pub fn function_call_output(call_id: &str, output: &Value) -> String {
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "function_call_output",
            "call_id": call_id,
            "output": output.to_string(),
        },
    })
    .to_string()
}

/// Function schemas derived from the tool registry.
fn tool_schemas() -> Vec<Value> {
    TOOLS
        .iter()
        .filter(|spec| spec.implemented)
        .map(tool_schema)
        .collect()
}

fn tool_schema(spec: &ToolSpec) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for field in spec.fields {
        let schema = match field.kind {
            FieldKind::Text => json!({ "type": "string" }),
            FieldKind::Bool => json!({ "type": "boolean" }),
            FieldKind::Integer { min, max } => {
                json!({ "type": "integer", "minimum": min, "maximum": max })
            }
            FieldKind::Timestamp => json!({ "type": "string", "format": "date-time" }),
        };
        properties.insert(field.name.to_string(), schema);
        if field.required {
            required.push(field.name);
        }
    }

    json!({
        "type": "function",
        "name": spec.name,
        "description": spec.description,
        "parameters": {
            "type": "object",
            "properties": properties,
            "required": required,
        },
    })
}

/// Events from the AI peer the relay reacts to.
#[derive(Debug)]
pub enum AiEvent {
    /// `session.created` — the peer is ready for configuration.
    SessionReady,
    /// One chunk of response audio (base64, forwarded verbatim).
    AudioDelta { payload: String },
    /// A completed function call to dispatch.
    FunctionCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// The current response finished (or was cancelled).
    ResponseDone,
    Error {
        code: Option<String>,
        message: String,
    },
    /// Anything the relay does not act on.
    Other,
}

impl AiEvent {
    pub fn parse(text: &str) -> Self {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            return Self::Other;
        };
        let event_type = value.get("type").and_then(Value::as_str).unwrap_or("");
        match event_type {
            "session.created" => Self::SessionReady,
            "response.audio.delta" => {
                let payload = value
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Self::AudioDelta { payload }
            }
            "response.done" | "response.audio.done" => Self::ResponseDone,
            "response.function_call_arguments.done" => {
                let call_id = value
                    .get("call_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let name = value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                // Arguments arrive as a JSON string.
                let arguments = value
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|raw| serde_json::from_str(raw).ok())
                    .unwrap_or(Value::Null);
                Self::FunctionCall {
                    call_id,
                    name,
                    arguments,
                }
            }
            "error" => {
                let error = value.get("error");
                let code = error
                    .and_then(|e| e.get("code"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                let message = error
                    .and_then(|e| e.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown AI error")
                    .to_string();
                Self::Error { code, message }
            }
            _ => Self::Other,
        }
    }
}
