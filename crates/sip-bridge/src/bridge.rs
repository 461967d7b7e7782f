//! The SIP bridge core: trunk registration, call handling and the glue
//! between the rvoip client stack and the WebSocket audio bridge.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use rvoip::client_core::registration::{RegistrationConfig, RegistrationStatus};
use rvoip::client_core::{
    CallAction, CallId, CallState, CallStatusInfo, ClientConfig, ClientError, ClientEventHandler,
    ClientManager, IncomingCallInfo, MediaConfig, MediaEventInfo, RegistrationStatusInfo,
};

use tablevoice_agent_core::phone;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::port::AudioPort;
use crate::record::{disconnect_status, CallRecord, CallStatus, Direction};
use crate::ws_bridge;

/// How long terminal records stay queryable before eviction.
const RECORD_RETENTION: Duration = Duration::from_secs(30);

/// Everything the event handler, the control plane and the main loop
/// share.
pub struct BridgeState {
    pub config: BridgeConfig,
    /// Country calling code derived from the trunk number
    pub trunk_cc: Option<&'static str>,
    /// The SIP client, set once startup completes
    client: RwLock<Option<Arc<ClientManager>>>,
    /// Call records by sid; single writer (the handler / control plane),
    /// snapshot readers
    records: DashMap<String, CallRecord>,
    /// Live-call index: stack call id -> sid
    by_call: DashMap<CallId, String>,
    /// Audio ports by stack call id; dropped on the terminal transition
    ports: DashMap<CallId, Arc<AudioPort>>,
    /// Registration state cached for the control plane
    registered: AtomicBool,
    /// Callback client
    http: reqwest::Client,
}

impl BridgeState {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let trunk_cc = phone::derive_trunk_country_code(&config.sip_username);
        Arc::new(Self {
            config,
            trunk_cc,
            client: RwLock::new(None),
            records: DashMap::new(),
            by_call: DashMap::new(),
            ports: DashMap::new(),
            registered: AtomicBool::new(false),
            http: reqwest::Client::new(),
        })
    }

    pub async fn client(&self) -> Option<Arc<ClientManager>> {
        self.client.read().await.clone()
    }

    pub async fn set_client(&self, client: Arc<ClientManager>) {
        *self.client.write().await = Some(client);
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    /// Calls currently occupying a concurrency slot.
    pub fn live_calls(&self) -> usize {
        self.records
            .iter()
            .filter(|entry| entry.value().status.is_live())
            .count()
    }

    /// Copy-snapshot of every known record, newest first.
    pub fn snapshot(&self) -> Vec<CallRecord> {
        let mut records: Vec<CallRecord> =
            self.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn record(&self, sid: &str) -> Option<CallRecord> {
        self.records.get(sid).map(|entry| entry.value().clone())
    }

    fn sid_for(&self, call_id: &CallId) -> Option<String> {
        self.by_call.get(call_id).map(|entry| entry.value().clone())
    }

    /// Apply a transition and fan out the status callback. Returns the
    /// post-transition snapshot when something changed.
    fn transition(self: &Arc<Self>, sid: &str, status: CallStatus) -> Option<CallRecord> {
        let snapshot = {
            let mut entry = self.records.get_mut(sid)?;
            if !entry.value_mut().transition(status) {
                return None;
            }
            entry.value().clone()
        };
        info!(sid, status = ?snapshot.status, "call transition");
        self.spawn_status_callback(snapshot.clone());
        if snapshot.status.is_terminal() {
            self.schedule_eviction(sid.to_string());
        }
        Some(snapshot)
    }

    /// Keep terminal records queryable for a grace period, then drop them.
    fn schedule_eviction(self: &Arc<Self>, sid: String) {
        let state = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RECORD_RETENTION).await;
            if let Some((_, record)) = state.records.remove(&sid) {
                if let Some(call_id) = record.client_call_id {
                    state.by_call.remove(&call_id);
                }
                debug!(sid, "record evicted");
            }
            // The live-call index entry may outlive the back-reference.
            state.by_call.retain(|_, mapped| mapped != &sid);
        });
    }

    /// Best-effort POST of the record to its status callback.
    fn spawn_status_callback(&self, record: CallRecord) {
        let url = record
            .callback_url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| {
                (!self.config.status_callback_url.is_empty())
                    .then(|| self.config.status_callback_url.clone())
            });
        let Some(url) = url else { return };
        let http = self.http.clone();
        let timeout = Duration::from_secs_f64(self.config.callback_timeout);
        tokio::spawn(async move {
            let result = http.post(&url).timeout(timeout).json(&record).send().await;
            if let Err(e) = result {
                debug!(url, error = %e, "status callback failed");
            }
        });
    }

    /// Start an outbound call from the control plane.
    pub async fn make_outbound_call(
        self: &Arc<Self>,
        req: OutboundCall,
    ) -> Result<CallRecord, BridgeError> {
        if self.live_calls() >= self.config.max_concurrent_calls {
            return Err(BridgeError::OverBudget);
        }
        let client = self.client().await.ok_or_else(|| BridgeError::Sip {
            reason: "client not started".to_string(),
        })?;

        let to_number = phone::normalize_e164(&req.to, self.trunk_cc);
        let from_user = req
            .from
            .clone()
            .unwrap_or_else(|| self.config.sip_username.clone());
        let mut params = self.config.custom_params();
        params.extend(req.custom_params);
        let mut record = CallRecord::new(
            Direction::Outbound,
            phone::normalize_e164(&from_user, self.trunk_cc),
            to_number.clone(),
            req.ws_target.unwrap_or_else(|| self.config.ws_target.clone()),
            params,
        );
        record.callback_url = req.callback_url;

        let from_uri = format!("sip:{from_user}@{}", self.config.sip_domain);
        let to_uri = if req.to.starts_with("sip:") || req.to.starts_with("tel:") {
            req.to
        } else {
            format!("sip:{to_number}@{}", self.config.sip_domain)
        };
        let call_id = client
            .make_call(from_uri, to_uri, None)
            .await
            .map_err(|e| BridgeError::Sip { reason: e.to_string() })?;

        record.client_call_id = Some(call_id);
        self.by_call.insert(call_id, record.sid.clone());
        self.records.insert(record.sid.clone(), record.clone());
        self.spawn_status_callback(record.clone());
        info!(sid = %record.sid, to = %record.to, "outbound call started");

        // Ring timeout: give up on calls nobody answers.
        if let Some(timeout_sec) = req.timeout_sec.filter(|t| *t > 0) {
            let state = self.clone();
            let sid = record.sid.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(timeout_sec)).await;
                let unanswered = state
                    .record(&sid)
                    .map(|r| matches!(r.status, CallStatus::Initiated | CallStatus::Ringing))
                    .unwrap_or(false);
                if unanswered {
                    info!(sid, timeout_sec, "outbound call unanswered, cancelling");
                    if let Err(e) = state.hangup(&sid).await {
                        debug!(sid, error = %e, "ring-timeout hangup failed");
                    }
                }
            });
        }
        Ok(record)
    }

    /// Cancel/hang up a call by sid.
    pub async fn hangup(self: &Arc<Self>, sid: &str) -> Result<(), BridgeError> {
        let record = self.record(sid).ok_or_else(|| BridgeError::NotFound {
            sid: sid.to_string(),
        })?;
        let Some(call_id) = record.client_call_id else {
            return Err(BridgeError::InvalidState {
                sid: sid.to_string(),
                status: format!("{:?}", record.status).to_lowercase(),
            });
        };
        let client = self.client().await.ok_or_else(|| BridgeError::Sip {
            reason: "client not started".to_string(),
        })?;
        client
            .hangup_call(&call_id)
            .await
            .map_err(|e| BridgeError::Sip { reason: e.to_string() })?;
        Ok(())
    }

    /// Blind transfer an active call.
    pub async fn transfer(self: &Arc<Self>, sid: &str, destination: &str) -> Result<(), BridgeError> {
        let record = self.record(sid).ok_or_else(|| BridgeError::NotFound {
            sid: sid.to_string(),
        })?;
        if !matches!(record.status, CallStatus::Active | CallStatus::Answered) {
            return Err(BridgeError::InvalidState {
                sid: sid.to_string(),
                status: format!("{:?}", record.status).to_lowercase(),
            });
        }
        let Some(call_id) = record.client_call_id else {
            return Err(BridgeError::InvalidState {
                sid: sid.to_string(),
                status: "detached".to_string(),
            });
        };
        let client = self.client().await.ok_or_else(|| BridgeError::Sip {
            reason: "client not started".to_string(),
        })?;

        let target = if destination.starts_with("sip:") || destination.starts_with("tel:") {
            destination.to_string()
        } else {
            format!("sip:{destination}@{}", self.config.sip_domain)
        };
        client
            .transfer_call(&call_id, &target)
            .await
            .map_err(|e| BridgeError::Sip { reason: e.to_string() })?;
        self.transition(sid, CallStatus::Transferred);
        Ok(())
    }

    /// Incoming-callback decision, awaited before any answer is sent.
    async fn decide_incoming(self: Arc<Self>, call_id: CallId, sid: String) {
        let decision = self.fetch_incoming_decision(&sid).await;

        if let Some(mut entry) = self.records.get_mut(&sid) {
            let record = entry.value_mut();
            if let Some(params) = decision.custom_params.clone() {
                record.custom_params.extend(params);
            }
            if let Some(target) = decision.ws_target.clone() {
                record.ws_target = target;
            }
            if let Some(url) = decision.callback_url.clone() {
                record.callback_url = Some(url);
            }
        }

        let Some(client) = self.client().await else { return };
        match decision.action.as_deref() {
            Some("reject") => {
                info!(sid, code = ?decision.status_code, "callback rejected the call");
                if let Err(e) = client.reject_call(&call_id).await {
                    warn!(sid, error = %e, "reject failed");
                }
            }
            Some("ignore") => {
                info!(sid, "callback chose to ignore, leaving it ringing");
            }
            _ => {
                if self.config.auto_answer() {
                    if let Err(e) = client.answer_call(&call_id).await {
                        warn!(sid, error = %e, "answer failed");
                    }
                }
            }
        }
    }

    async fn fetch_incoming_decision(&self, sid: &str) -> IncomingDecision {
        if self.config.incoming_callback_url.is_empty() {
            return IncomingDecision::default();
        }
        let record = match self.record(sid) {
            Some(r) => r,
            None => return IncomingDecision::default(),
        };
        let body = json!({
            "sid": record.sid,
            "from": record.from,
            "to": record.to,
            "direction": record.direction,
        });
        let timeout = Duration::from_secs_f64(self.config.callback_timeout);
        let result = self
            .http
            .post(&self.config.incoming_callback_url)
            .timeout(timeout)
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) => resp.json::<IncomingDecision>().await.unwrap_or_else(|e| {
                warn!(sid, error = %e, "unreadable incoming-callback reply, accepting");
                IncomingDecision::default()
            }),
            Err(e) => {
                warn!(sid, error = %e, "incoming callback failed, accepting");
                IncomingDecision::default()
            }
        }
    }

    /// Wire the media path once a call goes active: audio stream config,
    /// the audio port, the WS bridge task and the duration watchdog.
    async fn start_media(self: &Arc<Self>, call_id: CallId, sid: &str) {
        if self.ports.contains_key(&call_id) {
            return;
        }
        let Some(client) = self.client().await else { return };
        let Some(record) = self.record(sid) else { return };

        let stream_config = rvoip::client_core::AudioStreamConfig {
            sample_rate: 8000,
            channels: 1,
            codec: "PCMU".to_string(),
            frame_size_ms: 20,
            enable_aec: !self.config.no_ec,
            enable_agc: false,
            enable_vad: self.config.vad,
        };
        if let Err(e) = client.set_audio_stream_config(&call_id, stream_config).await {
            warn!(sid, error = %e, "audio stream config failed");
        }
        if let Err(e) = client.start_audio_stream(&call_id).await {
            error!(sid, error = %e, "audio stream start failed");
            return;
        }

        let port = Arc::new(AudioPort::new());
        self.ports.insert(call_id, port.clone());

        let remote = match record.direction {
            Direction::Inbound => record.from.clone(),
            Direction::Outbound => record.to.clone(),
        };
        tokio::spawn(ws_bridge::run_bridge(
            client.clone(),
            call_id,
            record.sid.clone(),
            remote,
            record.ws_target.clone(),
            record.custom_params.clone(),
            Arc::downgrade(&port),
        ));

        if self.config.max_call_duration > 0 {
            let state = self.clone();
            let sid = sid.to_string();
            let limit = Duration::from_secs(self.config.max_call_duration);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                let still_live = state
                    .record(&sid)
                    .map(|r| r.status.is_live())
                    .unwrap_or(false);
                if still_live {
                    warn!(sid, "max call duration reached, hanging up");
                    if let Err(e) = state.hangup(&sid).await {
                        debug!(sid, error = %e, "watchdog hangup failed");
                    }
                }
            });
        }
    }

    /// Terminal teardown, runs on the state-change callback path: the
    /// audio port is dropped here and only here, and the record loses its
    /// back-reference. Safe to hit more than once.
    fn teardown_call(self: &Arc<Self>, call_id: CallId, sid: &str, status: CallStatus) {
        self.ports.remove(&call_id);
        self.transition(sid, status);
    }

    /// Hang up everything still live; used on shutdown so carriers see a
    /// BYE before the process exits.
    pub async fn hangup_all(self: &Arc<Self>) {
        let live: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.value().status.is_live())
            .map(|e| e.key().clone())
            .collect();
        for sid in live {
            if let Err(e) = self.hangup(&sid).await {
                debug!(sid, error = %e, "shutdown hangup failed");
            }
        }
    }
}

/// Parameters of an outbound call request.
#[derive(Debug, Clone, Default)]
pub struct OutboundCall {
    pub to: String,
    pub from: Option<String>,
    pub custom_params: HashMap<String, String>,
    pub ws_target: Option<String>,
    pub callback_url: Option<String>,
    pub timeout_sec: Option<u64>,
}

/// Reply shape of the incoming-call callback.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingDecision {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    custom_params: Option<HashMap<String, String>>,
    #[serde(default)]
    ws_target: Option<String>,
    #[serde(default)]
    callback_url: Option<String>,
}

/// rvoip event handler driving the call table.
pub struct BridgeHandler {
    state: Arc<BridgeState>,
}

impl BridgeHandler {
    pub fn new(state: Arc<BridgeState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ClientEventHandler for BridgeHandler {
    async fn on_incoming_call(&self, info: IncomingCallInfo) -> CallAction {
        let state = &self.state;
        if state.live_calls() >= state.config.max_concurrent_calls {
            warn!(caller = %info.caller_uri, "concurrency budget exhausted, rejecting");
            return CallAction::Reject;
        }

        let from = phone::normalize_e164(&uri_user(&info.caller_uri), state.trunk_cc);
        let to = phone::normalize_e164(&uri_user(&info.callee_uri), state.trunk_cc);
        let mut record = CallRecord::new(
            Direction::Inbound,
            from,
            to,
            state.config.ws_target.clone(),
            state.config.custom_params(),
        );
        record.client_call_id = Some(info.call_id);
        let sid = record.sid.clone();
        info!(sid, from = %record.from, "incoming call");

        state.by_call.insert(info.call_id, sid.clone());
        state.records.insert(sid.clone(), record.clone());
        state.spawn_status_callback(record);

        // The decision (and the answer) happen off the event path so the
        // callback URL can be consulted first.
        let state = self.state.clone();
        let call_id = info.call_id;
        tokio::spawn(async move {
            state.decide_incoming(call_id, sid).await;
        });
        CallAction::Ignore
    }

    async fn on_call_state_changed(&self, info: CallStatusInfo) {
        let state = &self.state;
        let Some(sid) = state.sid_for(&info.call_id) else {
            debug!(call_id = %info.call_id, state = ?info.new_state, "state change for unknown call");
            return;
        };
        match info.new_state {
            CallState::Proceeding | CallState::Ringing => {
                state.transition(&sid, CallStatus::Ringing);
            }
            CallState::Connected => {
                state.transition(&sid, CallStatus::Answered);
                state.start_media(info.call_id, &sid).await;
                state.transition(&sid, CallStatus::Active);
            }
            CallState::Failed => {
                let status = disconnect_status(true, info.reason.as_deref());
                state.teardown_call(info.call_id, &sid, status);
            }
            CallState::Cancelled => {
                state.teardown_call(info.call_id, &sid, CallStatus::Cancelled);
            }
            CallState::Terminated => {
                let status = disconnect_status(false, info.reason.as_deref());
                state.teardown_call(info.call_id, &sid, status);
            }
            _ => {}
        }
    }

    async fn on_registration_status_changed(&self, info: RegistrationStatusInfo) {
        let now_registered = matches!(info.status, RegistrationStatus::Active);
        let was_registered = self.state.registered.swap(now_registered, Ordering::SeqCst);
        if was_registered && !now_registered {
            error!(reason = ?info.reason, "SIP registration lost");
        } else if now_registered && !was_registered {
            info!(server = %info.server_uri, "SIP registration active");
        }
    }

    async fn on_media_event(&self, event: MediaEventInfo) {
        debug!(call_id = %event.call_id, "media event");
    }

    async fn on_client_error(&self, error: ClientError, call_id: Option<CallId>) {
        error!(?call_id, %error, "SIP client error");
    }

    async fn on_network_event(&self, connected: bool, reason: Option<String>) {
        if connected {
            info!("network connected");
        } else {
            warn!(?reason, "network disconnected");
        }
    }
}

/// Build, start and register the SIP client for this bridge.
pub async fn start_client(state: &Arc<BridgeState>) -> anyhow::Result<uuid::Uuid> {
    let config = &state.config;
    let sip_addr = format!("{}:{}", config.local_ip, config.sip_port).parse()?;
    let media_addr = format!("{}:{}", config.local_ip, config.rtp_port_start).parse()?;

    if let Some(server) = config.ice_server() {
        info!(server, ice = config.ice_enabled(), "NAT traversal configured");
    }

    let client_config = ClientConfig::new()
        .with_sip_addr(sip_addr)
        .with_media_addr(media_addr)
        .with_user_agent(format!("tablevoice-sipbridge/{}", env!("CARGO_PKG_VERSION")))
        .with_max_calls(config.max_concurrent_calls)
        .with_media(MediaConfig {
            preferred_codecs: vec!["PCMU".to_string(), "PCMA".to_string()],
            dtmf_enabled: true,
            echo_cancellation: !config.no_ec,
            noise_suppression: false,
            auto_gain_control: false,
            rtp_port_start: config.rtp_port_start,
            rtp_port_end: config.rtp_port_start + 1000,
            ..Default::default()
        });

    let client = ClientManager::new(client_config).await?;
    client
        .set_event_handler(Arc::new(BridgeHandler::new(state.clone())))
        .await;
    client.start().await?;
    state.set_client(client.clone()).await;

    let registration = RegistrationConfig::new(
        format!("sip:{}", config.sip_domain),
        config.account_uri(),
        config.account_uri(),
    )
    .with_credentials(config.sip_username.clone(), config.sip_password.clone())
    .with_expires(config.sip_reg_timeout);
    let registration_id = client.register(registration).await?;
    info!(account = %config.account_uri(), expires = config.sip_reg_timeout, "REGISTER sent");

    Ok(registration_id)
}

/// Extract the user part of a SIP/tel URI: `sip:+336...@host;x=y` or
/// `"Name" <sip:+336...@host>` both yield `+336...`.
pub fn uri_user(uri: &str) -> String {
    let inner = uri
        .split('<')
        .nth(1)
        .and_then(|rest| rest.split('>').next())
        .unwrap_or(uri);
    let without_scheme = inner
        .trim()
        .trim_start_matches("sips:")
        .trim_start_matches("sip:")
        .trim_start_matches("tel:");
    let user = without_scheme.split('@').next().unwrap_or(without_scheme);
    user.split(';').next().unwrap_or(user).to_string()
}
