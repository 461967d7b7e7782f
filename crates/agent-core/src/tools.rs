//! Tool dispatch: routes the AI's function calls to business-API handlers.
//!
//! Handlers never propagate errors out of the dispatcher. Whatever goes
//! wrong (malformed arguments, an unknown menu item, an API timeout), the
//! AI receives a JSON body it can recover from conversationally, and the
//! session stays up.

use chrono::{DateTime, Days, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Europe::Paris;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tablevoice_api_core::{
    extract_id, id_to_string, ApiClient, AvailabilityRequest, CustomerUpsert, FaqRequest,
    MessageRequest, OrderLine, OrderRequest, ReservationRequest,
};

use crate::context::CallContext;

/// Order statuses that may still be cancelled over the phone.
const CANCELLABLE_STATUSES: &[&str] = &["pending", "confirmed"];

/// Routes one AI function call to its handler.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    api: ApiClient,
}

impl ToolDispatcher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Execute `name` with raw JSON `arguments`, mutating the call context
    /// as a side effect. Always returns the JSON body to hand back as the
    /// `function_call_output`.
    pub async fn dispatch(&self, ctx: &mut CallContext, name: &str, arguments: &str) -> Value {
        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => {
                warn!(tool = name, error = %e, "malformed tool arguments");
                return json!({"success": false, "error": format!("malformed arguments: {e}")});
            }
        };
        debug!(tool = name, "dispatching tool call");

        let result = match name {
            "check_availability" => self.check_availability(ctx, &args).await,
            "confirm_order" => self.confirm_order(ctx, &args).await,
            "confirm_reservation" => self.confirm_reservation(ctx, &args).await,
            "save_customer_info" => self.save_customer_info(ctx, &args).await,
            "log_new_faq" => return self.log_new_faq(ctx, &args).await,
            "leave_message" => self.leave_message(ctx, &args).await,
            "check_order_status" => self.check_order_status(ctx, &args).await,
            "cancel_order" => self.cancel_order(ctx, &args).await,
            "lookup_reservation" => self.lookup_reservation(ctx, &args).await,
            "cancel_reservation" => self.cancel_reservation(&args).await,
            "end_call" => {
                ctx.should_hangup = true;
                let reason = args.get("reason").and_then(Value::as_str);
                debug!(reason, "end_call latched");
                return json!({"status": "hanging_up"});
            }
            unknown => {
                warn!(tool = unknown, "unknown tool");
                return json!({"error": format!("unknown tool: {unknown}")});
            }
        };

        result.unwrap_or_else(|e| {
            warn!(tool = name, error = %e, "tool handler failed");
            json!({"success": false, "error": e})
        })
    }

    async fn check_availability(
        &self,
        ctx: &mut CallContext,
        args: &Value,
    ) -> Result<Value, String> {
        let mode = arg_str(args, "mode").ok_or("mode is required")?.to_string();
        let request = AvailabilityRequest {
            restaurant_id: ctx.restaurant_id.clone(),
            mode,
            requested_time: arg_str(args, "requested_time").map(str::to_string),
            customer_address: arg_str(args, "customer_address").map(str::to_string),
            customer_city: arg_str(args, "customer_city").map(str::to_string),
            customer_postal_code: arg_str(args, "customer_postal_code").map(str::to_string),
            party_size: arg_u32(args, "party_size"),
            seating_preference: arg_str(args, "seating_preference").map(str::to_string),
            customer_phone: Some(ctx.caller_number.clone()),
        };
        let result = self
            .api
            .check_availability(&request)
            .await
            .map_err(|e| e.to_string())?;
        // Preserved between tools: confirm_order/confirm_reservation read
        // the estimate and delivery fields out of it.
        ctx.last_availability = Some(result.clone());
        Ok(result)
    }

    async fn confirm_order(&self, ctx: &mut CallContext, args: &Value) -> Result<Value, String> {
        let raw_items = args
            .get("items")
            .and_then(Value::as_array)
            .ok_or("items is required")?;
        if raw_items.is_empty() {
            return Err("order has no items".to_string());
        }
        let order_type = arg_str(args, "order_type").unwrap_or("pickup").to_string();

        let mut lines = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            let compact = raw
                .get("id")
                .map(id_to_string)
                .ok_or("item id is required")?;
            let item_ref = ctx
                .item_map
                .get(&compact)
                .ok_or_else(|| format!("unknown item id {compact}"))?;
            let quantity = raw
                .get("quantity")
                .and_then(Value::as_u64)
                .unwrap_or(1) as u32;
            let unit_price = raw
                .get("unit_price")
                .and_then(Value::as_f64)
                .ok_or("item unit_price is required")?;
            let selected_options = raw
                .get("selected_options")
                .and_then(Value::as_array)
                .map(|opts| {
                    opts.iter()
                        .map(|opt| self.resolve_option(ctx, opt))
                        .collect::<Vec<_>>()
                });
            lines.push(OrderLine {
                id: item_ref.uuid.clone(),
                name: item_ref.name.clone(),
                quantity,
                unit_price,
                total_price: unit_price * quantity as f64,
                selected_options,
            });
        }

        let availability = ctx.last_availability.as_ref();
        let estimated_ready_at = availability
            .and_then(|a| a.get("estimatedTimeISO"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let (address_formatted, lat, lng, distance_km) = if order_type == "delivery" {
            (
                availability
                    .and_then(|a| a.get("customerAddressFormatted"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                availability
                    .and_then(|a| a.get("customerAddressLat"))
                    .and_then(Value::as_f64),
                availability
                    .and_then(|a| a.get("customerAddressLng"))
                    .and_then(Value::as_f64),
                availability
                    .and_then(|a| a.get("deliveryDistanceKm"))
                    .and_then(Value::as_f64),
            )
        } else {
            (None, None, None, None)
        };

        let request = OrderRequest {
            restaurant_id: ctx.restaurant_id.clone(),
            call_id: ctx.call_id.clone(),
            customer_phone: ctx.caller_number.clone(),
            customer_id: ctx.customer_id.clone(),
            order_type,
            items: lines,
            total: args
                .get("total")
                .and_then(Value::as_f64)
                .ok_or("total is required")?,
            delivery_fee: args.get("delivery_fee").and_then(Value::as_f64),
            notes: arg_str(args, "notes").map(str::to_string),
            payment_method: arg_str(args, "payment_method").map(str::to_string),
            estimated_ready_at: estimated_ready_at.clone(),
            customer_address_formatted: address_formatted,
            customer_address_lat: lat,
            customer_address_lng: lng,
            delivery_distance_km: distance_km,
        };

        let body = self
            .api
            .create_order(&request)
            .await
            .map_err(|e| e.to_string())?;
        ctx.order_placed = true;
        Ok(json!({
            "success": true,
            "orderId": extract_id(&body),
            "estimatedReadyAt": estimated_ready_at,
        }))
    }

    /// Resolve a selected option's `choice_id` through the item map,
    /// keeping the advertised price. Unresolvable options pass through
    /// untouched rather than sinking the whole order.
    fn resolve_option(&self, ctx: &CallContext, opt: &Value) -> Value {
        let Some(choice_id) = opt.get("choice_id").map(id_to_string) else {
            return opt.clone();
        };
        match ctx.item_map.get(&choice_id) {
            Some(choice) => {
                let mut resolved = json!({"id": choice.uuid, "name": choice.name});
                if let Some(price) = opt.get("price") {
                    resolved["price"] = price.clone();
                }
                resolved
            }
            None => {
                warn!(choice_id, "unknown option choice id, passing through");
                opt.clone()
            }
        }
    }

    async fn confirm_reservation(
        &self,
        ctx: &mut CallContext,
        args: &Value,
    ) -> Result<Value, String> {
        let customer_name = arg_str(args, "customer_name")
            .ok_or("customer_name is required")?
            .to_string();
        let party_size = arg_u32(args, "party_size").ok_or("party_size is required")?;

        let reservation_time = match ctx
            .last_availability
            .as_ref()
            .and_then(|a| a.get("estimatedTimeISO"))
            .and_then(Value::as_str)
        {
            Some(iso) => iso.to_string(),
            None => {
                let hhmm = arg_str(args, "reservation_time")
                    .ok_or("reservation_time is required when no availability was checked")?;
                reservation_time_utc(hhmm, Utc::now())
                    .ok_or_else(|| format!("unparseable reservation time {hhmm:?}"))?
            }
        };

        let request = ReservationRequest {
            restaurant_id: ctx.restaurant_id.clone(),
            call_id: ctx.call_id.clone(),
            customer_name,
            customer_phone: arg_str(args, "customer_phone")
                .map(str::to_string)
                .unwrap_or_else(|| ctx.caller_number.clone()),
            party_size,
            reservation_time: reservation_time.clone(),
            seating_preference: arg_str(args, "seating_preference").map(str::to_string),
            notes: arg_str(args, "notes").map(str::to_string),
        };
        let body = self
            .api
            .create_reservation(&request)
            .await
            .map_err(|e| e.to_string())?;
        ctx.reservation_placed = true;
        Ok(json!({
            "success": true,
            "reservationId": extract_id(&body),
            "reservationTime": reservation_time,
        }))
    }

    async fn save_customer_info(
        &self,
        ctx: &mut CallContext,
        args: &Value,
    ) -> Result<Value, String> {
        let request = CustomerUpsert {
            restaurant_id: ctx.restaurant_id.clone(),
            phone: ctx.caller_number.clone(),
            first_name: arg_str(args, "first_name").map(str::to_string),
            delivery_address: arg_str(args, "delivery_address").map(str::to_string),
            delivery_city: arg_str(args, "delivery_city").map(str::to_string),
            delivery_postal_code: arg_str(args, "delivery_postal_code").map(str::to_string),
            delivery_notes: arg_str(args, "delivery_notes").map(str::to_string),
        };
        let body = self
            .api
            .upsert_customer(&request)
            .await
            .map_err(|e| e.to_string())?;
        if let Some(id) = extract_id(&body) {
            ctx.customer_id = Some(id);
        }
        Ok(json!({"success": true}))
    }

    /// Best-effort: the AI should never apologize for a failed FAQ log, so
    /// this reports success even when the API write fails.
    async fn log_new_faq(&self, ctx: &CallContext, args: &Value) -> Value {
        let Some(question) = arg_str(args, "question") else {
            return json!({"success": true});
        };
        let request = FaqRequest {
            restaurant_id: ctx.restaurant_id.clone(),
            question: question.to_string(),
            category: arg_str(args, "category").map(str::to_string),
        };
        if let Err(e) = self.api.log_faq(&request).await {
            warn!(error = %e, "faq log failed (best-effort)");
        }
        json!({"success": true})
    }

    async fn leave_message(&self, ctx: &mut CallContext, args: &Value) -> Result<Value, String> {
        let content = arg_str(args, "content")
            .ok_or("content is required")?
            .to_string();
        let request = MessageRequest {
            restaurant_id: ctx.restaurant_id.clone(),
            call_id: ctx.call_id.clone(),
            caller_phone: ctx.caller_number.clone(),
            caller_name: arg_str(args, "caller_name").map(str::to_string),
            content,
            category: arg_str(args, "category").map(str::to_string),
            is_urgent: args
                .get("is_urgent")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        let body = self
            .api
            .create_message(&request)
            .await
            .map_err(|e| e.to_string())?;
        ctx.message_left = true;
        Ok(json!({"success": true, "messageId": extract_id(&body)}))
    }

    async fn check_order_status(&self, ctx: &CallContext, args: &Value) -> Result<Value, String> {
        let phone = arg_str(args, "customer_phone").unwrap_or(&ctx.caller_number);
        self.api
            .order_status(&ctx.restaurant_id, phone)
            .await
            .map_err(|e| e.to_string())
    }

    async fn cancel_order(&self, ctx: &CallContext, args: &Value) -> Result<Value, String> {
        let order_number = args
            .get("order_number")
            .map(id_to_string)
            .ok_or("order_number is required")?;

        let body = self
            .api
            .order_status(&ctx.restaurant_id, &ctx.caller_number)
            .await
            .map_err(|e| e.to_string())?;
        let orders = match body.get("orders").and_then(Value::as_array) {
            Some(list) => list.clone(),
            None => body.as_array().cloned().unwrap_or_else(|| vec![body.clone()]),
        };
        let target = orders
            .iter()
            .find(|o| o.get("orderNumber").map(id_to_string).as_deref() == Some(order_number.as_str()));
        let Some(target) = target else {
            return Ok(json!({
                "success": false,
                "error": format!("no order {order_number} found for this number"),
            }));
        };

        let status = target
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        if !CANCELLABLE_STATUSES.contains(&status) {
            return Ok(json!({
                "success": false,
                "error": format!("order {order_number} is {status} and can no longer be cancelled"),
            }));
        }
        // The status endpoint is not guaranteed to echo the record id; be
        // loud instead of PATCHing nothing.
        let Some(order_id) = extract_id(target) else {
            return Ok(json!({
                "success": false,
                "error": "order found but its id is missing from the status lookup",
            }));
        };

        self.api
            .update_order(&order_id, "cancelled")
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"success": true, "orderNumber": order_number}))
    }

    async fn lookup_reservation(&self, ctx: &CallContext, args: &Value) -> Result<Value, String> {
        let phone = arg_str(args, "customer_phone").unwrap_or(&ctx.caller_number);
        self.api
            .lookup_reservation(&ctx.restaurant_id, phone)
            .await
            .map_err(|e| e.to_string())
    }

    async fn cancel_reservation(&self, args: &Value) -> Result<Value, String> {
        let reservation_id = args
            .get("reservation_id")
            .map(id_to_string)
            .ok_or("reservation_id is required")?;
        self.api
            .update_reservation(&reservation_id, "cancelled")
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"success": true}))
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn arg_u32(args: &Value, key: &str) -> Option<u32> {
    args.get(key).and_then(Value::as_u64).map(|v| v as u32)
}

/// Interpret `HH:MM` as local Europe/Paris time, rolling to the next day
/// when the slot is already past, and render the UTC instant in RFC 3339.
pub fn reservation_time_utc(hhmm: &str, now_utc: DateTime<Utc>) -> Option<String> {
    let (h, m) = hhmm.trim().split_once(':')?;
    let hour: u32 = h.trim().parse().ok()?;
    let minute: u32 = m.trim().parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let now_paris = now_utc.with_timezone(&Paris);
    let today = now_paris.date_naive().and_time(time);
    let local = match Paris.from_local_datetime(&today).earliest() {
        Some(dt) if dt > now_paris => dt,
        _ => {
            let tomorrow = now_paris.date_naive().checked_add_days(Days::new(1))?.and_time(time);
            Paris.from_local_datetime(&tomorrow).earliest()?
        }
    };
    Some(
        local
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn reservation_time_rolls_to_next_day_when_past() {
        // 2026-01-15 21:00 Paris (20:00 UTC, winter): 20:30 already passed.
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 20, 0, 0).unwrap();
        let iso = reservation_time_utc("20:30", now).unwrap();
        assert_eq!(iso, "2026-01-16T19:30:00Z");
    }

    #[test]
    fn reservation_time_stays_today_when_future() {
        // 2026-01-15 18:00 Paris: 20:30 is still ahead.
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 17, 0, 0).unwrap();
        let iso = reservation_time_utc("20:30", now).unwrap();
        assert_eq!(iso, "2026-01-15T19:30:00Z");
    }

    #[test]
    fn reservation_time_honors_summer_offset() {
        // 2026-07-10 12:00 Paris (10:00 UTC, CEST): 20:30 local is 18:30Z.
        let now = Utc.with_ymd_and_hms(2026, 7, 10, 10, 0, 0).unwrap();
        let iso = reservation_time_utc("20:30", now).unwrap();
        assert_eq!(iso, "2026-07-10T18:30:00Z");
    }

    #[test]
    fn bad_times_are_rejected() {
        let now = Utc::now();
        assert!(reservation_time_utc("25:00", now).is_none());
        assert!(reservation_time_utc("nonsense", now).is_none());
        assert!(reservation_time_utc("", now).is_none());
    }
}
