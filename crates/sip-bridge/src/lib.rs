//! SIP trunk bridge for tablevoice.
//!
//! Registers a SIP user agent against a carrier trunk and bridges every
//! call's RTP audio to the agent process over the Twilio-compatible media
//! WebSocket protocol, with deferred-mark gating so the agent's turn
//! boundaries line up with what the caller actually heard. An HTTP control
//! plane exposes health, the call table, outbound dialing, hangup and
//! blind transfer.

pub mod bridge;
pub mod config;
pub mod control;
pub mod error;
pub mod g711;
pub mod port;
pub mod record;
pub mod ws_bridge;

pub use bridge::{start_client, BridgeHandler, BridgeState, OutboundCall};
pub use config::BridgeConfig;
pub use error::BridgeError;
