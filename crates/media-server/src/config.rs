//! Environment configuration for the agent process.

use std::time::Duration;

use thiserror::Error;

use tablevoice_agent_core::realtime::{
    DEFAULT_VAD_PREFIX_PADDING_MS, DEFAULT_VAD_SILENCE_MS, DEFAULT_VAD_THRESHOLD,
};

/// Default realtime model; override with `OPENAI_REALTIME_MODEL`.
const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";

/// Fatal startup configuration problems.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Immutable process configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bearer for the realtime endpoint
    pub openai_api_key: String,
    /// HTTP/WS listen port
    pub port: u16,
    /// Business API base URL
    pub api_base_url: String,
    /// Default restaurant when the stream carries no restaurantId
    pub restaurant_id: String,
    /// Hard per-call ceiling
    pub max_call_duration: Duration,
    /// Carrier-buffer drain time before the graceful stop
    pub hangup_delay: Duration,
    /// Server-VAD snapshot applied to every call
    pub vad_threshold: f64,
    pub vad_silence_ms: u32,
    pub vad_prefix_padding_ms: u32,
    /// Realtime model id
    pub realtime_model: String,
    /// Full realtime URL override (tests and gateways); normally unset
    pub realtime_url: Option<String>,
}

impl ServerConfig {
    /// Read the configuration from the environment. Missing required keys
    /// abort startup.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            openai_api_key: require("OPENAI_API_KEY")?,
            port: parse_env("PORT", 5050)?,
            api_base_url: std::env::var("NEXT_API_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            restaurant_id: require("RESTAURANT_ID")?,
            max_call_duration: Duration::from_secs(parse_env("MAX_CALL_DURATION", 600u64)?),
            hangup_delay: Duration::from_secs_f64(parse_env("HANGUP_DELAY_S", 0.3f64)?),
            vad_threshold: parse_env("VAD_THRESHOLD", DEFAULT_VAD_THRESHOLD)?,
            vad_silence_ms: parse_env("VAD_SILENCE_MS", DEFAULT_VAD_SILENCE_MS)?,
            vad_prefix_padding_ms: parse_env("VAD_PREFIX_PADDING_MS", DEFAULT_VAD_PREFIX_PADDING_MS)?,
            realtime_model: std::env::var("OPENAI_REALTIME_MODEL")
                .unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            realtime_url: std::env::var("OPENAI_REALTIME_URL").ok(),
        })
    }
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw.clone(),
        }),
        Err(_) => Ok(default),
    }
}
