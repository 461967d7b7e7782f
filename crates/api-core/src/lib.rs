//! Client for the restaurant business API.
//!
//! The media bridge consumes a small set of JSON endpoints: AI configuration
//! (system prompt, tools, menu item map), availability checks, order and
//! reservation persistence, customer upsert, FAQ logging, message drops,
//! call records and the blocked-number list. All request and response bodies
//! use camelCase keys at the wire boundary.
//!
//! Every call carries its own timeout (5 s for the blocked check, 10 s for
//! everything else) and is never retried; any non-2xx status surfaces as
//! [`ApiError::Status`] so the caller can degrade conversationally instead
//! of dying.

mod client;
mod error;
mod types;

pub use client::{ApiClient, BLOCKED_CHECK_TIMEOUT, DEFAULT_TIMEOUT};
pub use error::ApiError;
pub use types::*;

/// Result alias for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
