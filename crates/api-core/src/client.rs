//! The HTTP client itself.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::types::*;
use crate::Result;

/// Timeout for the blocked-number lookup. Shorter than the rest because it
/// sits on the critical path before the caller hears anything.
pub const BLOCKED_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for every other API call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Typed client over the restaurant business API.
///
/// Cheap to clone; the underlying connection pool is shared.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Build a client for `base_url` (no trailing slash required).
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn request_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        query: Option<&[(&str, &str)]>,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<Value> {
        let mut req = self.http.request(method, self.url(path)).timeout(timeout);
        if let Some(q) = query {
            req = req.query(q);
        }
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(e, path))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                endpoint: path.to_string(),
            });
        }
        let value = resp
            .json::<Value>()
            .await
            .map_err(|e| ApiError::from_reqwest(e, path))?;
        debug!(endpoint = path, "API call ok");
        Ok(value)
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value> {
        self.request_json::<()>(Method::GET, path, Some(query), None, DEFAULT_TIMEOUT)
            .await
    }

    async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        self.request_json(Method::POST, path, None, Some(body), DEFAULT_TIMEOUT)
            .await
    }

    async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<Value> {
        self.request_json(Method::PATCH, path, None, Some(body), DEFAULT_TIMEOUT)
            .await
    }

    /// `GET /api/ai`: per-call AI configuration snapshot.
    pub async fn fetch_ai_config(&self, restaurant_id: &str, caller_phone: &str) -> Result<AiConfig> {
        let value = self
            .get(
                "/api/ai",
                &[("restaurantId", restaurant_id), ("callerPhone", caller_phone)],
            )
            .await?;
        serde_json::from_value(value).map_err(|e| ApiError::InvalidResponse {
            endpoint: "/api/ai".to_string(),
            reason: e.to_string(),
        })
    }

    /// `POST /api/availability/check`: returns the availability record
    /// verbatim; the bridge stores it opaquely between tool calls.
    pub async fn check_availability(&self, req: &AvailabilityRequest) -> Result<Value> {
        self.post("/api/availability/check", req).await
    }

    /// `POST /api/orders`.
    pub async fn create_order(&self, req: &OrderRequest) -> Result<Value> {
        self.post("/api/orders", req).await
    }

    /// `POST /api/reservations`.
    pub async fn create_reservation(&self, req: &ReservationRequest) -> Result<Value> {
        self.post("/api/reservations", req).await
    }

    /// `POST /api/customers`: upsert keyed by phone.
    pub async fn upsert_customer(&self, req: &CustomerUpsert) -> Result<Value> {
        self.post("/api/customers", req).await
    }

    /// `POST /api/faq`.
    pub async fn log_faq(&self, req: &FaqRequest) -> Result<Value> {
        self.post("/api/faq", req).await
    }

    /// `POST /api/messages`.
    pub async fn create_message(&self, req: &MessageRequest) -> Result<Value> {
        self.post("/api/messages", req).await
    }

    /// `GET /api/orders/status`: latest orders for a caller.
    pub async fn order_status(&self, restaurant_id: &str, customer_phone: &str) -> Result<Value> {
        self.get(
            "/api/orders/status",
            &[
                ("restaurantId", restaurant_id),
                ("customerPhone", customer_phone),
            ],
        )
        .await
    }

    /// `PATCH /api/orders`: status mutation (cancellation).
    pub async fn update_order(&self, order_id: &str, status: &str) -> Result<Value> {
        self.patch(
            "/api/orders",
            &serde_json::json!({ "id": order_id, "status": status }),
        )
        .await
    }

    /// `GET /api/reservations/lookup`.
    pub async fn lookup_reservation(
        &self,
        restaurant_id: &str,
        customer_phone: &str,
    ) -> Result<Value> {
        self.get(
            "/api/reservations/lookup",
            &[
                ("restaurantId", restaurant_id),
                ("customerPhone", customer_phone),
            ],
        )
        .await
    }

    /// `PATCH /api/reservations`: status mutation (cancellation).
    pub async fn update_reservation(&self, reservation_id: &str, status: &str) -> Result<Value> {
        self.patch(
            "/api/reservations",
            &serde_json::json!({ "id": reservation_id, "status": status }),
        )
        .await
    }

    /// `POST /api/calls`: create the call record, returns its id.
    pub async fn create_call(&self, req: &CallCreate) -> Result<Value> {
        self.post("/api/calls", req).await
    }

    /// `PATCH /api/calls`: finalize the call record.
    pub async fn update_call(&self, req: &CallUpdate) -> Result<Value> {
        self.patch("/api/calls", req).await
    }

    /// `GET /api/blocked-phones/check`: fail-open: any error is logged and
    /// reported as "not blocked" so a flaky API never silences the phone.
    pub async fn check_blocked(&self, restaurant_id: &str, phone: &str) -> bool {
        let path = "/api/blocked-phones/check";
        let result = self
            .request_json::<()>(
                Method::GET,
                path,
                Some(&[("restaurantId", restaurant_id), ("phone", phone)]),
                None,
                BLOCKED_CHECK_TIMEOUT,
            )
            .await;
        match result {
            Ok(value) => serde_json::from_value::<BlockedCheck>(value)
                .map(|b| b.blocked)
                .unwrap_or(false),
            Err(e) => {
                warn!(phone, error = %e, "blocked-number check failed, treating as not blocked");
                false
            }
        }
    }
}
