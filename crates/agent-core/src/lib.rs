//! Conversational core of the tablevoice media bridge.
//!
//! This crate owns everything between the telephony leg and the business
//! API that is independent of how the call physically arrives:
//!
//! - [`realtime`]: the OpenAI Realtime WebSocket adapter, covering session
//!   configuration (server VAD, g711_ulaw both ways, tools), the greeting
//!   bootstrap, and a normalized event stream.
//! - [`tools`]: dispatches the AI's function calls to business-API
//!   handlers and mutates the per-call context.
//! - [`context`]: per-call state, outcome derivation and the one-shot
//!   finalize write.
//! - [`phone`]: E.164 normalization against the trunk country code.

pub mod context;
pub mod error;
pub mod phone;
pub mod realtime;
pub mod tools;

pub use context::CallContext;
pub use error::AgentError;
pub use realtime::{RealtimeEvent, RealtimeHandle, RealtimeSession, SessionParams};
pub use tools::ToolDispatcher;

/// Result alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
