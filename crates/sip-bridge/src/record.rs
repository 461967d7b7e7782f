//! Call records exposed on the control plane.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use rvoip::client_core::CallId;

/// Call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Control-plane visible call status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CallStatus {
    Initiated,
    Ringing,
    Answered,
    Active,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Cancelled,
    Transferred,
}

impl CallStatus {
    /// No further transitions happen out of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CallStatus::Completed
                | CallStatus::Failed
                | CallStatus::Busy
                | CallStatus::NoAnswer
                | CallStatus::Cancelled
                | CallStatus::Transferred
        )
    }

    /// The call occupies a concurrency slot.
    pub fn is_live(self) -> bool {
        !self.is_terminal()
    }
}

/// Map a disconnect into its terminal status. `reason` carries the SIP
/// final code when the stack reports one: 486/600 are busy, 408/480 are
/// no-answer, any other failure code is plain failed.
pub fn disconnect_status(failed: bool, reason: Option<&str>) -> CallStatus {
    if let Some(reason) = reason {
        if reason.contains("486") || reason.contains("600") {
            return CallStatus::Busy;
        }
        if reason.contains("408") || reason.contains("480") {
            return CallStatus::NoAnswer;
        }
    }
    if failed {
        CallStatus::Failed
    } else {
        CallStatus::Completed
    }
}

/// One telephony call as the control plane sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub sid: String,
    pub direction: Direction,
    pub from: String,
    pub to: String,
    pub status: CallStatus,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_sec: u64,
    pub custom_params: HashMap<String, String>,
    pub ws_target: String,
    pub callback_url: Option<String>,
    /// Back-reference to the live SIP call; cleared at the terminal
    /// transition so record eviction never touches the stack.
    #[serde(skip)]
    pub client_call_id: Option<CallId>,
}

impl CallRecord {
    pub fn new(
        direction: Direction,
        from: String,
        to: String,
        ws_target: String,
        custom_params: HashMap<String, String>,
    ) -> Self {
        Self {
            sid: format!("CA{}", Uuid::new_v4().simple()),
            direction,
            from,
            to,
            status: match direction {
                Direction::Inbound => CallStatus::Ringing,
                Direction::Outbound => CallStatus::Initiated,
            },
            created_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_sec: 0,
            custom_params,
            ws_target,
            callback_url: None,
            client_call_id: None,
        }
    }

    /// Apply a status transition, stamping the answer/end instants and the
    /// duration. Transitions out of a terminal status are ignored.
    pub fn transition(&mut self, status: CallStatus) -> bool {
        if self.status.is_terminal() || self.status == status {
            return false;
        }
        self.status = status;
        let now = Utc::now();
        match status {
            CallStatus::Answered | CallStatus::Active => {
                self.answered_at.get_or_insert(now);
            }
            s if s.is_terminal() => {
                self.ended_at = Some(now);
                let anchor = self.answered_at.unwrap_or(self.created_at);
                self.duration_sec = (now - anchor).num_seconds().max(0) as u64;
                self.client_call_id = None;
            }
            _ => {}
        }
        true
    }
}
