//! The RTP ↔ WebSocket audio bridge, one task per media-active call.
//!
//! Speaks the Twilio media-stream protocol as a client toward the agent
//! server. SIP→WS: each 20 ms PCM16 frame off the RTP leg is companded to
//! µ-law, base64-framed and sent as `media` with a monotonically advancing
//! 20 ms timestamp. WS→SIP: `media` payloads are expanded into the audio
//! port, `clear` flushes it, `mark`s are queued against the port's
//! transmit counter and echoed only after their audio has actually been
//! handed to RTP. A mark arriving when the port is already gone is echoed
//! immediately.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use rvoip::client_core::{CallId, ClientManager};
use rvoip::session_core::api::types::AudioFrame;

use crate::port::AudioPort;

/// Frame cadence on both legs.
const FRAME_INTERVAL: Duration = Duration::from_millis(20);

/// Run the bridge until the call, the socket or the port goes away.
pub async fn run_bridge(
    client: Arc<ClientManager>,
    call_id: CallId,
    sid: String,
    caller_number: String,
    ws_target: String,
    custom_params: HashMap<String, String>,
    port: Weak<AudioPort>,
) {
    let mut frames = match client.subscribe_to_audio_frames(&call_id).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!(%call_id, error = %e, "audio subscription failed, no bridge");
            return;
        }
    };

    let (ws, _) = match tokio_tungstenite::connect_async(ws_target.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(%call_id, target = %ws_target, error = %e, "media WebSocket connect failed");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    // Stream hello: sid plus the merged custom parameters. The agent keys
    // its pre-call sequence off callerPhone.
    let mut parameters = custom_params;
    parameters.insert("callerPhone".to_string(), caller_number);
    let start = json!({
        "event": "start",
        "start": {"streamSid": sid, "customParameters": parameters},
    });
    if ws_tx.send(Message::text(start.to_string())).await.is_err() {
        warn!(%call_id, "media WebSocket rejected the start event");
        return;
    }
    info!(%call_id, sid, "audio bridge up");

    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut out_ts_ms: u64 = 0;
    let mut tx_ts_ms: u64 = 0;

    loop {
        tokio::select! {
            // RTP pump: feed the stack one frame per tick and surface the
            // marks whose audio is now through.
            _ = ticker.tick() => {
                let Some(port) = port.upgrade() else {
                    debug!(%call_id, "audio port dropped, bridge ends");
                    break;
                };
                let samples = port.take_frame();
                let frame = AudioFrame {
                    samples: samples.to_vec(),
                    sample_rate: 8000,
                    channels: 1,
                    timestamp: tx_ts_ms as u32,
                };
                tx_ts_ms += 20;
                if let Err(e) = client.send_audio_frame(&call_id, frame).await {
                    debug!(%call_id, error = %e, "send_audio_frame failed, bridge ends");
                    break;
                }
                for name in port.take_ready_marks() {
                    let mark = json!({
                        "event": "mark",
                        "streamSid": sid,
                        "mark": {"name": name},
                    });
                    if ws_tx.send(Message::text(mark.to_string())).await.is_err() {
                        break;
                    }
                }
            }

            // SIP → WS: caller audio toward the agent.
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    debug!(%call_id, "RTP frame stream ended");
                    break;
                };
                let payload = BASE64.encode(crate::g711::encode(&frame.samples));
                let media = json!({
                    "event": "media",
                    "streamSid": sid,
                    "media": {"timestamp": out_ts_ms, "payload": payload},
                });
                out_ts_ms += 20;
                if ws_tx.send(Message::text(media.to_string())).await.is_err() {
                    debug!(%call_id, "media WebSocket closed while sending");
                    break;
                }
            }

            // WS → SIP: agent events.
            message = ws_rx.next() => {
                let Some(Ok(message)) = message else {
                    debug!(%call_id, "media WebSocket closed");
                    break;
                };
                let Message::Text(text) = message else { continue };
                let Ok(event) = serde_json::from_str::<Value>(&text) else {
                    debug!(%call_id, "non-JSON media event ignored");
                    continue;
                };
                match event.get("event").and_then(Value::as_str) {
                    Some("media") => {
                        let payload = event
                            .pointer("/media/payload")
                            .and_then(Value::as_str)
                            .unwrap_or("");
                        match BASE64.decode(payload) {
                            Ok(ulaw) => {
                                if let Some(port) = port.upgrade() {
                                    port.feed(&crate::g711::decode_to_pcm_bytes(&ulaw));
                                }
                            }
                            Err(e) => warn!(%call_id, error = %e, "bad media payload"),
                        }
                    }
                    Some("clear") => {
                        if let Some(port) = port.upgrade() {
                            let dropped = port.clear();
                            debug!(%call_id, dropped, "clear: flushed buffer and marks");
                        }
                    }
                    Some("mark") => {
                        let name = event
                            .pointer("/mark/name")
                            .and_then(Value::as_str)
                            .unwrap_or("")
                            .to_string();
                        match port.upgrade() {
                            Some(port) => port.queue_mark(name),
                            None => {
                                // No port to gate on: echo right away so the
                                // agent's turn accounting still closes.
                                let mark = json!({
                                    "event": "mark",
                                    "streamSid": sid,
                                    "mark": {"name": name},
                                });
                                let _ = ws_tx.send(Message::text(mark.to_string())).await;
                            }
                        }
                    }
                    Some("stop") => {
                        info!(%call_id, "agent requested stop");
                        if let Err(e) = client.hangup_call(&call_id).await {
                            debug!(%call_id, error = %e, "hangup after stop failed");
                        }
                        break;
                    }
                    other => {
                        debug!(%call_id, event = ?other, "ignoring media event");
                    }
                }
            }
        }
    }

    let stop = json!({"event": "stop", "streamSid": sid});
    let _ = ws_tx.send(Message::text(stop.to_string())).await;
    let _ = ws_tx.close().await;
    info!(%call_id, sid, "audio bridge down");
}
