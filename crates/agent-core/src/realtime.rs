//! OpenAI Realtime WebSocket adapter.
//!
//! One session per call. The socket is split: a reader task normalizes the
//! provider's event stream into [`RealtimeEvent`]s on an mpsc channel, and
//! the [`RealtimeHandle`] is the single writer the call engine drives.
//! Audio crosses this boundary as base64 µ-law in both directions, so the
//! telephony payloads are forwarded verbatim with no transcoding in the
//! agent process.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

use crate::error::AgentError;
use crate::Result;

/// Default realtime endpoint.
const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Server-VAD defaults, overridable per call from the environment.
pub const DEFAULT_VAD_THRESHOLD: f64 = 0.5;
pub const DEFAULT_VAD_SILENCE_MS: u32 = 500;
pub const DEFAULT_VAD_PREFIX_PADDING_MS: u32 = 300;

const TEMPERATURE: f64 = 0.7;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Per-call session configuration snapshot. No live reconfiguration: the
/// values are frozen when the call starts.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Realtime model id
    pub model: String,
    /// Voice for audio output
    pub voice: String,
    /// System prompt
    pub instructions: String,
    /// Tool schemas, passed through verbatim
    pub tools: Vec<Value>,
    /// Server-VAD activation threshold (0-1)
    pub vad_threshold: f64,
    /// Server-VAD trailing silence before end-of-speech, in ms
    pub vad_silence_ms: u32,
    /// Audio retained before detected speech onset, in ms
    pub vad_prefix_padding_ms: u32,
    /// First name of an identified returning customer
    pub returning_customer: Option<String>,
}

impl SessionParams {
    /// Params with default VAD tuning.
    pub fn new(model: impl Into<String>, voice: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            voice: voice.into(),
            instructions: instructions.into(),
            tools: Vec::new(),
            vad_threshold: DEFAULT_VAD_THRESHOLD,
            vad_silence_ms: DEFAULT_VAD_SILENCE_MS,
            vad_prefix_padding_ms: DEFAULT_VAD_PREFIX_PADDING_MS,
            returning_customer: None,
        }
    }
}

/// Normalized inbound events, the subset of the realtime protocol the call
/// engine acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// One audio chunk (base64 µ-law) to forward to telephony
    AudioDelta { payload: String },
    /// Assistant turn finished; transcript text
    AssistantTranscript { text: String },
    /// Caller turn transcribed
    UserTranscript { text: String },
    /// The caller started speaking over the assistant (barge-in)
    SpeechStarted,
    /// A response item opened; assistant items become truncation targets
    OutputItemAdded { item_id: String, role: Option<String> },
    /// The AI requested a tool invocation
    ToolCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    /// The current audio response finished streaming
    AudioDone,
    /// Provider-side error event
    Error { message: String },
    /// Socket closed by the provider
    Closed,
}

/// A connected realtime session: the writer handle plus the normalized
/// event stream fed by the background reader task.
pub struct RealtimeSession {
    /// Single-writer command side
    pub handle: RealtimeHandle,
    /// Normalized inbound events
    pub events: mpsc::Receiver<RealtimeEvent>,
}

impl RealtimeSession {
    /// Connect to the default endpoint and bootstrap the session: one
    /// `session.update`, one synthetic greeting item, one
    /// `response.create`.
    pub async fn connect(api_key: &str, params: &SessionParams) -> Result<Self> {
        let url = format!("{REALTIME_URL}?model={}", params.model);
        Self::connect_url(&url, api_key, params).await
    }

    /// Connect to an explicit URL (tests point this at a local server).
    pub async fn connect_url(url: &str, api_key: &str, params: &SessionParams) -> Result<Self> {
        let mut request = url
            .into_client_request()
            .map_err(|e| AgentError::ConnectFailed { reason: e.to_string() })?;
        let headers = request.headers_mut();
        headers.insert(
            "Authorization",
            format!("Bearer {api_key}")
                .parse()
                .map_err(|_| AgentError::ConnectFailed {
                    reason: "API key is not a valid header value".to_string(),
                })?,
        );
        headers.insert("OpenAI-Beta", http::HeaderValue::from_static("realtime=v1"));

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| AgentError::ConnectFailed { reason: e.to_string() })?;
        let (sink, source) = stream.split();

        let (event_tx, events) = mpsc::channel(256);
        tokio::spawn(read_loop(source, event_tx));

        let mut handle = RealtimeHandle { sink };
        handle.send_json(&session_update(params)).await?;
        handle.send_json(&greeting_item(params.returning_customer.as_deref())).await?;
        handle.create_response().await?;

        Ok(Self { handle, events })
    }
}

/// Writer side of a realtime session.
pub struct RealtimeHandle {
    sink: WsSink,
}

impl RealtimeHandle {
    async fn send_json(&mut self, event: &Value) -> Result<()> {
        self.sink
            .send(Message::text(event.to_string()))
            .await
            .map_err(|e| AgentError::SessionClosed { reason: e.to_string() })
    }

    /// Forward one base64 µ-law chunk from telephony into the input
    /// buffer.
    pub async fn append_audio(&mut self, payload_b64: &str) -> Result<()> {
        self.send_json(&json!({
            "type": "input_audio_buffer.append",
            "audio": payload_b64,
        }))
        .await
    }

    /// Truncate the in-flight assistant item at `audio_end_ms` after a
    /// barge-in.
    pub async fn truncate(&mut self, item_id: &str, audio_end_ms: u64) -> Result<()> {
        self.send_json(&json!({
            "type": "conversation.item.truncate",
            "item_id": item_id,
            "content_index": 0,
            "audio_end_ms": audio_end_ms,
        }))
        .await
    }

    /// Deliver a tool result and ask for the follow-up response. The two
    /// events share this single writer, so `function_call_output` always
    /// precedes its `response.create`.
    pub async fn tool_output(&mut self, call_id: &str, result: &Value) -> Result<()> {
        self.send_json(&json!({
            "type": "conversation.item.create",
            "item": {
                "type": "function_call_output",
                "call_id": call_id,
                "output": result.to_string(),
            }
        }))
        .await?;
        self.create_response().await
    }

    /// Ask the model to produce a response.
    pub async fn create_response(&mut self) -> Result<()> {
        self.send_json(&json!({"type": "response.create"})).await
    }

    /// Close the socket. Errors are ignored: the peer may already be gone.
    pub async fn close(mut self) {
        let _ = self.sink.send(Message::Close(None)).await;
    }
}

async fn read_loop(mut source: WsSource, event_tx: mpsc::Sender<RealtimeEvent>) {
    while let Some(message) = source.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Some(event) = parse_event(&text) {
                    if event_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                debug!(?frame, "realtime socket closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(error = %e, "realtime socket error");
                let _ = event_tx
                    .send(RealtimeEvent::Error { message: e.to_string() })
                    .await;
                break;
            }
        }
    }
    let _ = event_tx.send(RealtimeEvent::Closed).await;
}

/// Map one raw server event to its normalized form. Unknown types are
/// traced and dropped.
fn parse_event(text: &str) -> Option<RealtimeEvent> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable realtime event");
            return None;
        }
    };
    let event_type = value.get("type").and_then(Value::as_str)?;
    match event_type {
        "response.audio.delta" => Some(RealtimeEvent::AudioDelta {
            payload: value.get("delta")?.as_str()?.to_string(),
        }),
        "response.audio_transcript.done" => Some(RealtimeEvent::AssistantTranscript {
            text: value
                .get("transcript")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        "conversation.item.input_audio_transcription.completed" => {
            Some(RealtimeEvent::UserTranscript {
                text: value
                    .get("transcript")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            })
        }
        "input_audio_buffer.speech_started" => Some(RealtimeEvent::SpeechStarted),
        "response.output_item.added" => {
            let item = value.get("item")?;
            Some(RealtimeEvent::OutputItemAdded {
                item_id: item.get("id")?.as_str()?.to_string(),
                role: item
                    .get("role")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            })
        }
        "response.function_call_arguments.done" => Some(RealtimeEvent::ToolCall {
            call_id: value
                .get("call_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: value
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            arguments: value
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}")
                .to_string(),
        }),
        "response.audio.done" => Some(RealtimeEvent::AudioDone),
        "error" => Some(RealtimeEvent::Error {
            message: value
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown realtime error")
                .to_string(),
        }),
        other => {
            trace!(event = other, "ignoring realtime event");
            None
        }
    }
}

/// Build the `session.update` payload from the per-call snapshot.
fn session_update(params: &SessionParams) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "turn_detection": {
                "type": "server_vad",
                "threshold": params.vad_threshold,
                "prefix_padding_ms": params.vad_prefix_padding_ms,
                "silence_duration_ms": params.vad_silence_ms,
            },
            "input_audio_format": "g711_ulaw",
            "output_audio_format": "g711_ulaw",
            "voice": params.voice,
            "instructions": params.instructions,
            "modalities": ["text", "audio"],
            "temperature": TEMPERATURE,
            "tools": params.tools,
            "tool_choice": "auto",
            "input_audio_transcription": {"model": "whisper-1"},
        }
    })
}

/// Synthetic first user item: the greeting directive. Returning customers
/// are welcomed back by name.
fn greeting_item(returning_customer: Option<&str>) -> Value {
    let directive = match returning_customer {
        Some(name) => format!(
            "The caller is a returning customer named {name}. Greet them \
             back by their first name and ask how you can help today."
        ),
        None => "Greet the caller warmly as the restaurant's voice \
                 assistant and ask how you can help."
            .to_string(),
    };
    json!({
        "type": "conversation.item.create",
        "item": {
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": directive}]
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_update_carries_vad_and_ulaw_formats() {
        let mut params = SessionParams::new("gpt-4o-realtime-preview", "sage", "Take orders.");
        params.tools = vec![json!({"type": "function", "name": "confirm_order"})];
        let update = session_update(&params);
        assert_eq!(update["type"], "session.update");
        let session = &update["session"];
        assert_eq!(session["turn_detection"]["type"], "server_vad");
        assert_eq!(session["turn_detection"]["threshold"], 0.5);
        assert_eq!(session["turn_detection"]["silence_duration_ms"], 500);
        assert_eq!(session["turn_detection"]["prefix_padding_ms"], 300);
        assert_eq!(session["input_audio_format"], "g711_ulaw");
        assert_eq!(session["output_audio_format"], "g711_ulaw");
        assert_eq!(session["temperature"], 0.7);
        assert_eq!(session["tool_choice"], "auto");
        assert_eq!(session["input_audio_transcription"]["model"], "whisper-1");
        assert_eq!(session["tools"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn greeting_mentions_returning_customer() {
        let item = greeting_item(Some("Luc"));
        let text = item["item"]["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Luc"));
        assert_eq!(item["item"]["role"], "user");

        let anon = greeting_item(None);
        let text = anon["item"]["content"][0]["text"].as_str().unwrap();
        assert!(!text.contains("returning"));
    }

    #[test]
    fn parses_audio_delta_and_done() {
        let delta = parse_event(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert_eq!(delta, RealtimeEvent::AudioDelta { payload: "AAAA".into() });
        assert_eq!(
            parse_event(r#"{"type":"response.audio.done"}"#).unwrap(),
            RealtimeEvent::AudioDone
        );
    }

    #[test]
    fn parses_tool_call_with_arguments() {
        let event = parse_event(
            r#"{"type":"response.function_call_arguments.done",
                "call_id":"call_1","name":"end_call","arguments":"{\"reason\":\"done\"}"}"#,
        )
        .unwrap();
        match event {
            RealtimeEvent::ToolCall { call_id, name, arguments } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(name, "end_call");
                assert!(arguments.contains("reason"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn parses_output_item_role() {
        let event = parse_event(
            r#"{"type":"response.output_item.added","item":{"id":"item_7","role":"assistant"}}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            RealtimeEvent::OutputItemAdded {
                item_id: "item_7".into(),
                role: Some("assistant".into())
            }
        );
    }

    #[test]
    fn unknown_events_are_dropped() {
        assert!(parse_event(r#"{"type":"session.updated"}"#).is_none());
        assert!(parse_event("not json").is_none());
        assert!(parse_event(r#"{"no_type":true}"#).is_none());
    }

    #[test]
    fn error_event_extracts_message() {
        let event =
            parse_event(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        assert_eq!(event, RealtimeEvent::Error { message: "rate limited".into() });
    }
}
