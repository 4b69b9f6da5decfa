//! Twilio Media Streams wire frames.
//!
//! Audio payloads are base64 text and are passed through opaquely in both
//! directions; the relay never decodes them.

use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

/// Frames Twilio sends over the media stream socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum CallerFrame {
    Connected,
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Mark,
    Stop,
}

/// The `start` frame: identifies the call and carries the TwiML parameters.
#[derive(Debug, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "customParameters", default)]
    pub custom_parameters: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    /// Base64-encoded audio, forwarded verbatim.
    pub payload: String,
}

impl CallerFrame {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Outbound `media` frame carrying AI audio to the caller.
pub fn media_frame(stream_sid: &str, payload: &str) -> String {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": { "payload": payload },
    })
    .to_string()
}

/// Outbound `clear` frame: drops Twilio's buffered outbound audio, used on
/// barge-in so the caller stops hearing the interrupted response.
pub fn clear_frame(stream_sid: &str) -> String {
    json!({
        "event": "clear",
        "streamSid": stream_sid,
    })
    .to_string()
}

/// TwiML answer for the voice webhook: connect the call to the media stream
/// socket, passing the caller number through as a stream parameter.
pub fn connect_stream_twiml(ws_url: &str, caller: &str) -> String {
    format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>",
            "<Response><Connect>",
            "<Stream url=\"{}\">",
            "<Parameter name=\"caller\" value=\"{}\"/>",
            "</Stream>",
            "</Connect></Response>"
        ),
        xml_escape(ws_url),
        xml_escape(caller),
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
