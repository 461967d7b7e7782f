//! Per-call state and lifecycle.
//!
//! One [`CallContext`] per live call, exclusively owned by the call task.
//! The outcome written at finalize time is a pure function of the flags the
//! tool handlers set along the way; the API call record is created exactly
//! once after the AI config has loaded, and finalized at most once.

use std::collections::HashMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, warn};

use tablevoice_api_core::{
    extract_id, AiConfig, ApiClient, CallCreate, CallUpdate, MenuItemRef, MessageRequest,
    TranscriptTurn,
};

use crate::Result;

/// Number of transcript turns kept in the auto-message summary.
const SUMMARY_TURNS: usize = 6;

/// Per-turn cap (in characters) for the auto-message summary.
const SUMMARY_TURN_CHARS: usize = 100;

/// Mutable state of one live call.
#[derive(Debug)]
pub struct CallContext {
    /// Restaurant this call belongs to
    pub restaurant_id: String,
    /// Caller id, E.164-normalized
    pub caller_number: String,
    /// Call record id assigned by the API; also the finalize guard
    pub call_id: Option<String>,
    /// Known customer id, from config or a save_customer_info upsert
    pub customer_id: Option<String>,
    /// Monotonic start instant, for duration
    pub started_at: Instant,
    /// Wall-clock start, persisted on the record
    pub started_at_utc: DateTime<Utc>,

    /// Set by confirm_order on success
    pub order_placed: bool,
    /// Set by confirm_reservation on success
    pub reservation_placed: bool,
    /// Set by leave_message on success
    pub message_left: bool,
    /// Set once any transcript lands
    pub had_conversation: bool,
    /// Latched by end_call; the engine hangs up on the next audio.done
    pub should_hangup: bool,

    /// Ordered conversation transcript
    pub transcript: Vec<TranscriptTurn>,
    /// Last availability-check result, preserved opaquely between tools
    pub last_availability: Option<Value>,
    /// Compact id -> menu item mapping from the AI config
    pub item_map: HashMap<String, MenuItemRef>,
    /// Restaurant config echo
    pub avg_prep_time_min: u32,
    /// Restaurant config echo
    pub delivery_enabled: bool,
}

impl CallContext {
    /// Fresh context for a call that just arrived.
    pub fn new(restaurant_id: impl Into<String>, caller_number: impl Into<String>) -> Self {
        Self {
            restaurant_id: restaurant_id.into(),
            caller_number: caller_number.into(),
            call_id: None,
            customer_id: None,
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            order_placed: false,
            reservation_placed: false,
            message_left: false,
            had_conversation: false,
            should_hangup: false,
            transcript: Vec::new(),
            last_availability: None,
            item_map: HashMap::new(),
            avg_prep_time_min: 0,
            delivery_enabled: false,
        }
    }

    /// Absorb the per-call AI config snapshot.
    pub fn apply_config(&mut self, config: &AiConfig) {
        self.item_map = config.item_map.clone();
        self.avg_prep_time_min = config.avg_prep_time_min;
        self.delivery_enabled = config.delivery_enabled;
        if self.customer_id.is_none() {
            self.customer_id = config.customer_id();
        }
    }

    /// Append a user turn and mark the conversation as real.
    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push_turn("user", content.into());
    }

    /// Append an assistant turn and mark the conversation as real.
    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push_turn("assistant", content.into());
    }

    fn push_turn(&mut self, role: &str, content: String) {
        if content.trim().is_empty() {
            return;
        }
        self.had_conversation = true;
        self.transcript.push(TranscriptTurn {
            role: role.to_string(),
            content,
            timestamp: Utc::now(),
        });
    }

    /// Derive the call outcome from the flags, in priority order.
    pub fn outcome(&self) -> &'static str {
        if self.order_placed {
            "order_placed"
        } else if self.reservation_placed {
            "reservation_placed"
        } else if self.message_left {
            "message_left"
        } else if self.had_conversation {
            "info_only"
        } else {
            "abandoned"
        }
    }

    /// Create the API call record. A no-op when one already exists: the
    /// call id is assigned exactly once.
    pub async fn register_call(&mut self, api: &ApiClient) -> Result<()> {
        if self.call_id.is_some() {
            return Ok(());
        }
        let body = api
            .create_call(&CallCreate {
                restaurant_id: self.restaurant_id.clone(),
                caller_number: self.caller_number.clone(),
                customer_id: self.customer_id.clone(),
                started_at: self.started_at_utc,
            })
            .await?;
        self.call_id = extract_id(&body);
        info!(call_id = ?self.call_id, caller = %self.caller_number, "call record created");
        Ok(())
    }

    /// Finalize the call record: outcome, duration, transcript, plus the
    /// info-only auto-message. Taking the call id makes this idempotent;
    /// the second and later invocations return immediately.
    pub async fn finalize(&mut self, api: &ApiClient) -> Result<()> {
        let Some(call_id) = self.call_id.take() else {
            return Ok(());
        };
        let outcome = self.outcome();

        if outcome == "info_only" {
            let content = self.summary_message();
            if let Err(e) = api
                .create_message(&MessageRequest {
                    restaurant_id: self.restaurant_id.clone(),
                    call_id: Some(call_id.clone()),
                    caller_phone: self.caller_number.clone(),
                    caller_name: None,
                    content,
                    category: Some("info_request".to_string()),
                    is_urgent: false,
                })
                .await
            {
                warn!(call_id = %call_id, error = %e, "info-only auto-message failed");
            }
        }

        let duration_sec = self.started_at.elapsed().as_secs();
        api.update_call(&CallUpdate {
            id: call_id.clone(),
            ended_at: Utc::now(),
            duration_sec,
            outcome: outcome.to_string(),
            transcript: self.transcript.clone(),
        })
        .await?;
        info!(call_id = %call_id, outcome, duration_sec, "call finalized");
        Ok(())
    }

    /// Condense the transcript tail into the auto-message body: the last
    /// six turns, each clipped to 100 characters.
    pub fn summary_message(&self) -> String {
        let start = self.transcript.len().saturating_sub(SUMMARY_TURNS);
        let mut lines = vec![format!("Call from {}", self.caller_number)];
        for turn in &self.transcript[start..] {
            lines.push(format!("{}: {}", turn.role, clip_chars(&turn.content, SUMMARY_TURN_CHARS)));
        }
        lines.join("\n")
    }
}

/// Truncate to at most `max` characters on a char boundary.
fn clip_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_turns(turns: &[(&str, &str)]) -> CallContext {
        let mut ctx = CallContext::new("r1", "+33611111111");
        for (role, content) in turns {
            if *role == "user" {
                ctx.push_user(*content);
            } else {
                ctx.push_assistant(*content);
            }
        }
        ctx
    }

    #[test]
    fn outcome_priority_is_fixed() {
        let mut ctx = CallContext::new("r1", "+33611111111");
        assert_eq!(ctx.outcome(), "abandoned");
        ctx.push_user("hello");
        assert_eq!(ctx.outcome(), "info_only");
        ctx.message_left = true;
        assert_eq!(ctx.outcome(), "message_left");
        ctx.reservation_placed = true;
        assert_eq!(ctx.outcome(), "reservation_placed");
        ctx.order_placed = true;
        assert_eq!(ctx.outcome(), "order_placed");
    }

    #[test]
    fn empty_turns_do_not_count_as_conversation() {
        let mut ctx = CallContext::new("r1", "+33611111111");
        ctx.push_user("   ");
        assert!(!ctx.had_conversation);
        assert_eq!(ctx.outcome(), "abandoned");
    }

    #[test]
    fn summary_keeps_last_six_turns_clipped() {
        let long = "x".repeat(250);
        let turns: Vec<(&str, &str)> = vec![
            ("user", "one"),
            ("assistant", "two"),
            ("user", "three"),
            ("assistant", "four"),
            ("user", "five"),
            ("assistant", "six"),
            ("user", &long),
        ];
        let ctx = ctx_with_turns(&turns);
        let summary = ctx.summary_message();
        let lines: Vec<&str> = summary.lines().collect();
        // Header + 6 turns; "one" fell off the front.
        assert_eq!(lines.len(), 7);
        assert!(lines[1].starts_with("assistant: two"));
        assert_eq!(lines[6].len(), "user: ".len() + 100);
    }

    #[test]
    fn clip_respects_char_boundaries() {
        let s = "é".repeat(150);
        assert_eq!(clip_chars(&s, 100).chars().count(), 100);
    }

    #[tokio::test]
    async fn finalize_without_call_id_is_a_noop() {
        let mut ctx = CallContext::new("r1", "+33611111111");
        // Unreachable endpoint: finalize must not even try.
        let api = ApiClient::new("http://127.0.0.1:9");
        ctx.finalize(&api).await.expect("noop finalize");
    }

    #[test]
    fn apply_config_copies_item_map_and_customer() {
        let cfg: AiConfig = serde_json::from_value(serde_json::json!({
            "systemPrompt": "p",
            "customerContext": {"firstName": "Luc", "customerId": "cust-1"},
            "avgPrepTimeMin": 25,
            "deliveryEnabled": true,
            "itemMap": {"3": {"uuid": "u3", "name": "Margherita"}}
        }))
        .unwrap();
        let mut ctx = CallContext::new("r1", "+33611111111");
        ctx.apply_config(&cfg);
        assert_eq!(ctx.customer_id.as_deref(), Some("cust-1"));
        assert_eq!(ctx.item_map["3"].uuid, "u3");
        assert_eq!(ctx.avg_prep_time_min, 25);
        assert!(ctx.delivery_enabled);
    }
}
