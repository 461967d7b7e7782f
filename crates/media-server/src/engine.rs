//! The per-call engine.
//!
//! One engine task per media stream. Three event sources race under
//! `tokio::select!` first-completed semantics: the telephony socket, the
//! realtime AI session and the call-duration watchdog. Whichever finishes
//! first tears the call down, and finalize runs exactly once on every exit
//! path.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use tablevoice_agent_core::realtime::{RealtimeEvent, RealtimeSession, SessionParams};
use tablevoice_agent_core::{phone, CallContext, ToolDispatcher};
use tablevoice_api_core::{AiConfig, ApiClient};

use crate::config::ServerConfig;
use crate::twilio::{self, StartMeta, TelephonyEvent};

/// Name attached to every end-of-response mark.
const RESPONSE_MARK: &str = "responsePart";

/// Drive one media stream to completion.
pub async fn run_call(
    socket: WebSocket,
    config: std::sync::Arc<ServerConfig>,
    api: ApiClient,
    dispatcher: ToolDispatcher,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // The provider sends `connected` then `start`; nothing meaningful can
    // happen before the sid and custom parameters arrive.
    let Some(start) = wait_for_start(&mut ws_rx).await else {
        debug!("stream ended before start event");
        return;
    };
    let stream_sid = start.stream_sid.clone();
    info!(stream_sid, "media stream started");

    // Pre-call sequence: identity, block list, AI config, call record.
    let caller_number = phone::normalize_e164(
        start
            .custom_parameters
            .get("callerPhone")
            .map(String::as_str)
            .unwrap_or(""),
        None,
    );
    let restaurant_id = start
        .custom_parameters
        .get("restaurantId")
        .cloned()
        .unwrap_or_else(|| config.restaurant_id.clone());

    if api.check_blocked(&restaurant_id, &caller_number).await {
        // Blocked numbers never reach the AI and leave no record.
        info!(stream_sid, caller = %caller_number, "blocked caller, dropping stream");
        let _ = ws_tx.close().await;
        return;
    }

    let ai_config = match api.fetch_ai_config(&restaurant_id, &caller_number).await {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(stream_sid, error = %e, "no AI config, using apology fallback");
            AiConfig::apology_fallback()
        }
    };

    let mut ctx = CallContext::new(restaurant_id, caller_number);
    ctx.apply_config(&ai_config);

    let mut params = SessionParams::new(
        config.realtime_model.clone(),
        ai_config.voice.clone(),
        ai_config.system_prompt.clone(),
    );
    params.tools = ai_config.tools.clone();
    params.vad_threshold = config.vad_threshold;
    params.vad_silence_ms = config.vad_silence_ms;
    params.vad_prefix_padding_ms = config.vad_prefix_padding_ms;
    params.returning_customer = ai_config.customer_first_name().map(str::to_string);

    let session = match connect_realtime(&config, &params).await {
        Ok(s) => s,
        Err(e) => {
            error!(stream_sid, error = %e, "realtime connect failed, dropping call");
            let _ = ws_tx.close().await;
            return;
        }
    };
    let RealtimeSession { mut handle, mut events } = session;

    if let Err(e) = ctx.register_call(&api).await {
        warn!(stream_sid, error = %e, "call record creation failed, continuing without id");
    }

    // Steady state.
    let mut latest_media_ts: u64 = 0;
    let mut response_start_ts: Option<u64> = None;
    let mut last_assistant_item: Option<String> = None;
    let mut mark_queue: Vec<String> = Vec::new();

    let watchdog = tokio::time::sleep(config.max_call_duration);
    tokio::pin!(watchdog);

    loop {
        tokio::select! {
            inbound = ws_rx.next() => {
                let Some(Ok(message)) = inbound else {
                    debug!(stream_sid, "telephony socket closed");
                    break;
                };
                let Message::Text(text) = message else { continue };
                match TelephonyEvent::parse(&text) {
                    Some(TelephonyEvent::Media { media }) => {
                        latest_media_ts = media.timestamp;
                        if let Err(e) = handle.append_audio(&media.payload).await {
                            warn!(stream_sid, error = %e, "audio append failed");
                            break;
                        }
                    }
                    Some(TelephonyEvent::Mark { mark }) => {
                        if !mark_queue.is_empty() {
                            mark_queue.remove(0);
                        }
                        debug!(stream_sid, mark = ?mark.map(|m| m.name), "mark echoed");
                    }
                    Some(TelephonyEvent::Stop) => {
                        info!(stream_sid, "provider stop");
                        break;
                    }
                    Some(TelephonyEvent::Connected | TelephonyEvent::Start { .. }) => {}
                    Some(TelephonyEvent::Unknown) | None => {
                        debug!(stream_sid, "ignoring telephony event");
                    }
                }
            }

            event = events.recv() => {
                let Some(event) = event else {
                    debug!(stream_sid, "realtime event stream ended");
                    break;
                };
                match event {
                    RealtimeEvent::AudioDelta { payload } => {
                        if response_start_ts.is_none() {
                            response_start_ts = Some(latest_media_ts);
                        }
                        if ws_tx
                            .send(Message::Text(twilio::media_frame(&stream_sid, &payload)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    RealtimeEvent::AssistantTranscript { text } => {
                        ctx.push_assistant(text);
                    }
                    RealtimeEvent::UserTranscript { text } => {
                        ctx.push_user(text);
                    }
                    RealtimeEvent::SpeechStarted => {
                        // Barge-in: drop queued provider audio first, then
                        // truncate the assistant item at the heard offset.
                        if let (Some(start_ts), Some(item_id)) =
                            (response_start_ts, last_assistant_item.as_deref())
                        {
                            let elapsed = latest_media_ts.saturating_sub(start_ts);
                            debug!(stream_sid, elapsed, "barge-in, truncating response");
                            if ws_tx
                                .send(Message::Text(twilio::clear_frame(&stream_sid)))
                                .await
                                .is_err()
                            {
                                break;
                            }
                            mark_queue.clear();
                            if let Err(e) = handle.truncate(item_id, elapsed).await {
                                warn!(stream_sid, error = %e, "truncate failed");
                            }
                            response_start_ts = None;
                        }
                    }
                    RealtimeEvent::OutputItemAdded { item_id, role } => {
                        if role.as_deref() == Some("assistant") {
                            last_assistant_item = Some(item_id);
                        }
                    }
                    RealtimeEvent::ToolCall { call_id, name, arguments } => {
                        let result = dispatcher.dispatch(&mut ctx, &name, &arguments).await;
                        if let Err(e) = handle.tool_output(&call_id, &result).await {
                            warn!(stream_sid, tool = %name, error = %e, "tool output failed");
                            break;
                        }
                    }
                    RealtimeEvent::AudioDone => {
                        if ws_tx
                            .send(Message::Text(twilio::mark_frame(&stream_sid, RESPONSE_MARK)))
                            .await
                            .is_err()
                        {
                            break;
                        }
                        mark_queue.push(RESPONSE_MARK.to_string());

                        if ctx.should_hangup {
                            // Graceful hangup: let the carrier buffer drain,
                            // persist the record, then stop the stream.
                            info!(stream_sid, "graceful hangup requested");
                            tokio::time::sleep(config.hangup_delay).await;
                            finalize(&mut ctx, &api, &stream_sid).await;
                            let _ = ws_tx
                                .send(Message::Text(twilio::stop_frame(&stream_sid)))
                                .await;
                            break;
                        }
                    }
                    RealtimeEvent::Error { message } => {
                        error!(stream_sid, message, "realtime error event");
                    }
                    RealtimeEvent::Closed => {
                        debug!(stream_sid, "realtime session closed");
                        break;
                    }
                }
            }

            _ = &mut watchdog => {
                warn!(stream_sid, "max call duration reached, terminating");
                break;
            }
        }
    }

    // Termination barrier: the record write happens before the AI socket
    // drops, whatever path ended the loop.
    finalize(&mut ctx, &api, &stream_sid).await;
    handle.close().await;
    let _ = ws_tx.close().await;
    info!(stream_sid, "call engine finished");
}

async fn wait_for_start(
    ws_rx: &mut futures_util::stream::SplitStream<WebSocket>,
) -> Option<StartMeta> {
    while let Some(Ok(message)) = ws_rx.next().await {
        let Message::Text(text) = message else { continue };
        match TelephonyEvent::parse(&text) {
            Some(TelephonyEvent::Start { start }) => return Some(start),
            Some(TelephonyEvent::Stop) => return None,
            _ => {}
        }
    }
    None
}

async fn connect_realtime(
    config: &ServerConfig,
    params: &SessionParams,
) -> tablevoice_agent_core::Result<RealtimeSession> {
    match &config.realtime_url {
        Some(base) => {
            let url = format!("{base}?model={}", params.model);
            RealtimeSession::connect_url(&url, &config.openai_api_key, params).await
        }
        None => RealtimeSession::connect(&config.openai_api_key, params).await,
    }
}

async fn finalize(ctx: &mut CallContext, api: &ApiClient, stream_sid: &str) {
    if let Err(e) = ctx.finalize(api).await {
        error!(stream_sid, error = %e, "finalize failed");
    }
}
