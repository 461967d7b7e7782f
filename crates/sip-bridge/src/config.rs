//! Bridge configuration: CLI flags mirroring the trunk deployment knobs.

use std::collections::HashMap;

use clap::Parser;

/// SIP trunk bridge: registers to a carrier trunk and bridges call audio
/// to a Twilio-compatible media WebSocket.
#[derive(Debug, Clone, Parser)]
#[command(name = "tablevoice-sipbridge")]
pub struct BridgeConfig {
    // ── SIP account ──
    /// SIP registrar domain
    #[arg(long, default_value = "sip.twilio.com")]
    pub sip_domain: String,
    /// SIP username (the trunk number)
    #[arg(long)]
    pub sip_username: String,
    /// SIP password
    #[arg(long, default_value = "")]
    pub sip_password: String,
    /// Local SIP port (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub sip_port: u16,
    /// Local IP to bind SIP and RTP on
    #[arg(long, default_value = "0.0.0.0")]
    pub local_ip: String,
    /// Re-registration interval in seconds
    #[arg(long, default_value_t = 300)]
    pub sip_reg_timeout: u32,

    // ── NAT ──
    /// STUN server (host:port)
    #[arg(long, default_value = "")]
    pub stun_server: String,
    /// TURN server (host:port); supersedes STUN when set
    #[arg(long, default_value = "")]
    pub turn_server: String,
    /// TURN username
    #[arg(long, default_value = "")]
    pub turn_username: String,
    /// TURN password
    #[arg(long, default_value = "")]
    pub turn_password: String,
    /// Disable ICE
    #[arg(long)]
    pub no_ice: bool,
    /// UDP keepalive interval in seconds
    #[arg(long, default_value_t = 15)]
    pub udp_keepalive_secs: u32,

    // ── Audio ──
    /// Disable echo cancellation
    #[arg(long)]
    pub no_ec: bool,
    /// Echo cancellation tail in ms
    #[arg(long, default_value_t = 200)]
    pub ec_tail_ms: u32,
    /// Enable SIP-side voice activity detection
    #[arg(long)]
    pub vad: bool,
    /// Gain applied to audio received from the caller, in dB
    #[arg(long, default_value_t = 0.0)]
    pub rx_gain: f32,
    /// Gain applied to audio sent to the caller, in dB
    #[arg(long, default_value_t = 0.0)]
    pub tx_gain: f32,
    /// RTP port range start
    #[arg(long, default_value_t = 20000)]
    pub rtp_port_start: u16,

    // ── Bridge ──
    /// Media WebSocket the bridge connects calls to
    #[arg(long, default_value = "ws://localhost:5050/media-stream")]
    pub ws_target: String,
    /// Control-plane HTTP port
    #[arg(long, default_value_t = 5060)]
    pub api_port: u16,
    /// Do not answer incoming calls automatically
    #[arg(long)]
    pub no_auto_answer: bool,
    /// Max call duration in seconds (0 = unlimited)
    #[arg(long, default_value_t = 600)]
    pub max_call_duration: u64,
    /// Max simultaneous calls
    #[arg(long, default_value_t = 10)]
    pub max_concurrent_calls: usize,
    /// Custom parameter passed in every stream start (repeatable)
    #[arg(long = "param", value_parser = parse_key_value, action = clap::ArgAction::Append)]
    pub params: Vec<(String, String)>,

    // ── Callbacks ──
    /// Status callback URL, POSTed the record on every transition
    #[arg(long, default_value = "")]
    pub status_callback_url: String,
    /// URL consulted before answering an incoming call
    #[arg(long, default_value = "")]
    pub incoming_callback_url: String,
    /// Callback timeout in seconds
    #[arg(long, default_value_t = 5.0)]
    pub callback_timeout: f64,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

impl BridgeConfig {
    /// Auto-answer is the default; `--no-auto-answer` turns it off.
    pub fn auto_answer(&self) -> bool {
        !self.no_auto_answer
    }

    /// ICE enabled unless `--no-ice`.
    pub fn ice_enabled(&self) -> bool {
        !self.no_ice
    }

    /// The relay/discovery server to feed the ICE agent: TURN supersedes
    /// STUN when both are configured.
    pub fn ice_server(&self) -> Option<&str> {
        if !self.turn_server.is_empty() {
            Some(&self.turn_server)
        } else if !self.stun_server.is_empty() {
            Some(&self.stun_server)
        } else {
            None
        }
    }

    /// Custom parameters as a map, merged into every stream start.
    pub fn custom_params(&self) -> HashMap<String, String> {
        self.params.iter().cloned().collect()
    }

    /// The trunk account URI.
    pub fn account_uri(&self) -> String {
        format!("sip:{}@{}", self.sip_username, self.sip_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> BridgeConfig {
        BridgeConfig::parse_from(
            std::iter::once("tablevoice-sipbridge").chain(args.iter().copied()),
        )
    }

    #[test]
    fn defaults_match_the_deployment_contract() {
        let cfg = parse(&["--sip-username", "33491234567"]);
        assert_eq!(cfg.sip_reg_timeout, 300);
        assert_eq!(cfg.udp_keepalive_secs, 15);
        assert_eq!(cfg.ec_tail_ms, 200);
        assert_eq!(cfg.max_call_duration, 600);
        assert_eq!(cfg.max_concurrent_calls, 10);
        assert!(cfg.auto_answer());
        assert!(cfg.ice_enabled());
        assert_eq!(cfg.ws_target, "ws://localhost:5050/media-stream");
        assert_eq!(cfg.account_uri(), "sip:33491234567@sip.twilio.com");
    }

    #[test]
    fn turn_supersedes_stun() {
        let cfg = parse(&[
            "--sip-username", "u",
            "--stun-server", "stun.example.com:3478",
        ]);
        assert_eq!(cfg.ice_server(), Some("stun.example.com:3478"));

        let cfg = parse(&[
            "--sip-username", "u",
            "--stun-server", "stun.example.com:3478",
            "--turn-server", "turn.example.com:3478",
        ]);
        assert_eq!(cfg.ice_server(), Some("turn.example.com:3478"));
    }

    #[test]
    fn repeated_params_accumulate() {
        let cfg = parse(&[
            "--sip-username", "u",
            "--param", "restaurantId=pizza-bella",
            "--param", "tier = gold ",
        ]);
        let params = cfg.custom_params();
        assert_eq!(params["restaurantId"], "pizza-bella");
        assert_eq!(params["tier"], "gold");
    }

    #[test]
    fn malformed_params_are_rejected() {
        let result = BridgeConfig::try_parse_from([
            "tablevoice-sipbridge",
            "--sip-username", "u",
            "--param", "notakeyvalue",
        ]);
        assert!(result.is_err());
    }
}
