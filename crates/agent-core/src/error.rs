//! Error types for the conversational core.

use thiserror::Error;

/// Errors raised while talking to the realtime AI endpoint or finalizing a
/// call.
#[derive(Debug, Error)]
pub enum AgentError {
    /// WebSocket connect/handshake failure against the AI endpoint.
    #[error("realtime connection failed: {reason}")]
    ConnectFailed {
        /// Underlying handshake or TLS failure
        reason: String,
    },

    /// The realtime socket dropped while an event was being written.
    #[error("realtime session closed: {reason}")]
    SessionClosed {
        /// Why the write failed
        reason: String,
    },

    /// Business-API failure bubbling up through the lifecycle path.
    #[error(transparent)]
    Api(#[from] tablevoice_api_core::ApiError),

    /// Malformed JSON where a structured payload was required.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}
