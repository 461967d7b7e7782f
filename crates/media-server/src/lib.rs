//! Twilio-compatible media-stream server for the tablevoice bridge.
//!
//! Accepts provider media sessions over WebSocket, runs the pre-call
//! sequence (block list, AI config, call record), proxies audio to the
//! realtime AI session and drives barge-in, tool dispatch and graceful
//! hangup. The SIP bridge process connects here exactly like Twilio does.

pub mod config;
pub mod engine;
pub mod routes;
pub mod twilio;

pub use config::{ConfigError, ServerConfig};
pub use routes::{router, AppState};
