//! Wire types for the business API.
//!
//! Everything that crosses the HTTP boundary is camelCase; the loosely
//! shaped payloads the API returns for availability, orders and
//! reservations stay as [`serde_json::Value`] because the bridge either
//! forwards them verbatim to the AI or picks individual keys out of them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One menu item reference from the AI config item map.
///
/// The AI works with compact integer ids ("3"); the API wants the real
/// uuid and display name back when an order is placed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenuItemRef {
    /// Persistent menu item id
    pub uuid: String,
    /// Display name as printed on tickets
    pub name: String,
}

/// Per-call AI configuration snapshot returned by `GET /api/ai`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiConfig {
    /// Instructions for the realtime session
    pub system_prompt: String,
    /// Tool schemas passed through to the AI verbatim
    #[serde(default)]
    pub tools: Vec<Value>,
    /// Voice name for audio output
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Context block when the caller is a known customer
    #[serde(default)]
    pub customer_context: Option<Value>,
    /// Average kitchen preparation time in minutes
    #[serde(default)]
    pub avg_prep_time_min: u32,
    /// Whether the restaurant delivers
    #[serde(default)]
    pub delivery_enabled: bool,
    /// Compact id -> menu item mapping
    #[serde(default)]
    pub item_map: HashMap<String, MenuItemRef>,
}

fn default_voice() -> String {
    "alloy".to_string()
}

impl AiConfig {
    /// Fallback configuration used when the API has no config for the
    /// restaurant: an apology prompt and no tools, so the caller at least
    /// hears a human-sounding excuse.
    pub fn apology_fallback() -> Self {
        Self {
            system_prompt: "You are a polite phone assistant. Apologize: the \
                            ordering system is temporarily unavailable, and \
                            suggest the caller tries again in a few minutes. \
                            Keep it short and warm, then say goodbye."
                .to_string(),
            tools: Vec::new(),
            voice: default_voice(),
            customer_context: None,
            avg_prep_time_min: 0,
            delivery_enabled: false,
            item_map: HashMap::new(),
        }
    }

    /// First name of the identified customer, when the context carries one.
    pub fn customer_first_name(&self) -> Option<&str> {
        self.customer_context
            .as_ref()
            .and_then(|ctx| ctx.get("firstName"))
            .and_then(Value::as_str)
    }

    /// Customer id of the identified customer, if known.
    pub fn customer_id(&self) -> Option<String> {
        self.customer_context
            .as_ref()
            .and_then(|ctx| ctx.get("customerId"))
            .map(id_to_string)
    }
}

/// Body for `POST /api/availability/check`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityRequest {
    pub restaurant_id: String,
    /// pickup | delivery | reservation
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seating_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_phone: Option<String>,
}

/// One order line after item-map rehydration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    /// Real menu item uuid
    pub id: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: f64,
    /// unitPrice x quantity, computed by the dispatcher
    pub total_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_options: Option<Vec<Value>>,
}

/// Body for `POST /api/orders`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub restaurant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub customer_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    /// pickup | delivery
    pub order_type: String,
    pub items: Vec<OrderLine>,
    pub total: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_fee: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_ready_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_address_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_address_lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_address_lng: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_distance_km: Option<f64>,
}

/// Body for `POST /api/reservations`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationRequest {
    pub restaurant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub party_size: u32,
    /// UTC instant in RFC 3339
    pub reservation_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seating_preference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Body for `POST /api/customers` (upsert keyed by phone).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerUpsert {
    pub restaurant_id: String,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_notes: Option<String>,
}

/// Body for `POST /api/faq`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqRequest {
    pub restaurant_id: String,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Body for `POST /api/messages`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub restaurant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub caller_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_urgent: bool,
}

/// One transcript turn as persisted on the call record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptTurn {
    /// "user" or "assistant"
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Body for `POST /api/calls`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCreate {
    pub restaurant_id: String,
    pub caller_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Body for `PATCH /api/calls`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallUpdate {
    pub id: String,
    pub ended_at: DateTime<Utc>,
    pub duration_sec: u64,
    /// order_placed | reservation_placed | message_left | info_only | abandoned
    pub outcome: String,
    pub transcript: Vec<TranscriptTurn>,
}

/// Response of `GET /api/blocked-phones/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockedCheck {
    #[serde(default)]
    pub blocked: bool,
}

/// Pull an `id` out of a loosely typed API response, accepting both string
/// and numeric representations.
pub fn id_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extract `body["id"]` as a string, if present.
pub fn extract_id(body: &Value) -> Option<String> {
    body.get("id").map(id_to_string)
}
