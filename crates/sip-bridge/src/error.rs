//! Bridge error types.

use thiserror::Error;

/// Errors surfaced to the control plane and the startup path.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Concurrency budget exhausted.
    #[error("maximum concurrent calls reached")]
    OverBudget,

    /// Unknown call sid.
    #[error("no call with sid {sid}")]
    NotFound {
        /// The sid that was looked up
        sid: String,
    },

    /// The operation does not apply to the call's current status.
    #[error("call {sid} is {status}, operation not applicable")]
    InvalidState {
        /// The sid in question
        sid: String,
        /// Its current status, kebab-case
        status: String,
    },

    /// The SIP stack refused an operation.
    #[error("SIP stack error: {reason}")]
    Sip {
        /// Stack-reported failure
        reason: String,
    },
}
