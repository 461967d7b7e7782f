//! Twilio Media Streams framing.
//!
//! The same JSON protocol serves two producers: Twilio itself, and the SIP
//! bridge process, which speaks it as a WebSocket client. Inbound events
//! are `connected`/`start`/`media`/`mark`/`stop`; outbound events are
//! `media`/`clear`/`mark`/`stop` keyed by the stream sid.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::json;

/// One inbound provider event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Protocol hello, sent once before `start`
    Connected,
    /// Stream opened; carries the sid and the custom parameters
    Start { start: StartMeta },
    /// One 20 ms audio frame, base64 µ-law
    Media { media: MediaMeta },
    /// Echo of an outbound mark: the audio queued before it has played
    Mark {
        #[serde(default)]
        mark: Option<MarkMeta>,
    },
    /// Stream closed by the provider
    Stop,
    /// Anything this bridge does not consume
    #[serde(other)]
    Unknown,
}

impl TelephonyEvent {
    /// Parse one provider frame; `None` for non-JSON payloads.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// Metadata of the `start` event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartMeta {
    pub stream_sid: String,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
}

/// Metadata of a `media` event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MediaMeta {
    /// Milliseconds since stream start; Twilio serializes this as a string
    #[serde(deserialize_with = "string_or_u64", default)]
    pub timestamp: u64,
    pub payload: String,
}

/// Metadata of a `mark` echo.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MarkMeta {
    #[serde(default)]
    pub name: String,
}

fn string_or_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Text(String),
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Num(n) => n,
        Raw::Text(s) => s.parse().unwrap_or(0),
    })
}

/// Outbound `media` frame.
pub fn media_frame(stream_sid: &str, payload_b64: &str) -> String {
    json!({
        "event": "media",
        "streamSid": stream_sid,
        "media": {"payload": payload_b64},
    })
    .to_string()
}

/// Outbound `clear`: drop all audio queued on the provider side.
pub fn clear_frame(stream_sid: &str) -> String {
    json!({"event": "clear", "streamSid": stream_sid}).to_string()
}

/// Outbound `mark`: echoed back once the audio queued before it has been
/// transmitted.
pub fn mark_frame(stream_sid: &str, name: &str) -> String {
    json!({
        "event": "mark",
        "streamSid": stream_sid,
        "mark": {"name": name},
    })
    .to_string()
}

/// Outbound terminal `stop`.
pub fn stop_frame(stream_sid: &str) -> String {
    json!({"event": "stop", "streamSid": stream_sid}).to_string()
}
