//! Dispatcher behavior against an in-process mock of the business API.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use tablevoice_agent_core::{CallContext, ToolDispatcher};
use tablevoice_api_core::{ApiClient, MenuItemRef};

/// Records every body the mock API receives, keyed by path.
#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<(String, Value)>>>,
}

impl Captured {
    async fn push(&self, path: &str, body: Value) {
        self.bodies.lock().await.push((path.to_string(), body));
    }

    async fn find(&self, path: &str) -> Option<Value> {
        self.bodies
            .lock()
            .await
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, b)| b.clone())
    }
}

async fn spawn_mock(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn pickup_context() -> CallContext {
    let mut ctx = CallContext::new("r1", "+33611111111");
    ctx.call_id = Some("call-1".into());
    ctx.item_map.insert(
        "3".into(),
        MenuItemRef {
            uuid: "uuid-3".into(),
            name: "Margherita".into(),
        },
    );
    ctx
}

#[tokio::test]
async fn pickup_order_rehydrates_items_and_sets_flag() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/api/availability/check",
            post(|State(c): State<Captured>, Json(b): Json<Value>| async move {
                c.push("/api/availability/check", b).await;
                Json(json!({
                    "mode": "pickup",
                    "estimatedTime": "18:30",
                    "estimatedTimeISO": "2026-08-01T16:30:00Z"
                }))
            }),
        )
        .route(
            "/api/orders",
            post(|State(c): State<Captured>, Json(b): Json<Value>| async move {
                c.push("/api/orders", b).await;
                Json(json!({"id": "ord-9"}))
            }),
        )
        .with_state(captured.clone());
    let addr = spawn_mock(app).await;

    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let avail = dispatcher
        .dispatch(&mut ctx, "check_availability", r#"{"mode":"pickup"}"#)
        .await;
    assert_eq!(avail["estimatedTimeISO"], "2026-08-01T16:30:00Z");
    assert!(ctx.last_availability.is_some());

    let result = dispatcher
        .dispatch(
            &mut ctx,
            "confirm_order",
            r#"{"items":[{"id":3,"quantity":2,"unit_price":9.5}],
                "total":19.0,"order_type":"pickup"}"#,
        )
        .await;
    assert_eq!(result["success"], true);
    assert_eq!(result["orderId"], "ord-9");
    assert!(ctx.order_placed);

    let order = captured.find("/api/orders").await.expect("order posted");
    assert_eq!(order["items"][0]["id"], "uuid-3");
    assert_eq!(order["items"][0]["name"], "Margherita");
    assert_eq!(order["items"][0]["totalPrice"], 19.0);
    assert_eq!(order["estimatedReadyAt"], "2026-08-01T16:30:00Z");
    assert_eq!(order["orderType"], "pickup");
    assert_eq!(order["callId"], "call-1");
}

#[tokio::test]
async fn unknown_item_fails_without_posting() {
    let addr = spawn_mock(Router::new()).await;
    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let result = dispatcher
        .dispatch(
            &mut ctx,
            "confirm_order",
            r#"{"items":[{"id":99,"quantity":1,"unit_price":5.0}],"total":5.0}"#,
        )
        .await;
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("99"));
    assert!(!ctx.order_placed);
}

#[tokio::test]
async fn reservation_without_availability_parses_local_time() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/api/reservations",
            post(|State(c): State<Captured>, Json(b): Json<Value>| async move {
                c.push("/api/reservations", b).await;
                Json(json!({"id": "res-4"}))
            }),
        )
        .with_state(captured.clone());
    let addr = spawn_mock(app).await;

    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let result = dispatcher
        .dispatch(
            &mut ctx,
            "confirm_reservation",
            r#"{"customer_name":"Luc","party_size":4,"reservation_time":"20:30"}"#,
        )
        .await;
    assert_eq!(result["success"], true, "got {result}");
    assert!(ctx.reservation_placed);

    let body = captured.find("/api/reservations").await.unwrap();
    assert_eq!(body["customerName"], "Luc");
    assert_eq!(body["partySize"], 4);
    assert_eq!(body["customerPhone"], "+33611111111");
    // Whatever day it resolves to, the slot is 20:30 Europe/Paris in UTC.
    let time = body["reservationTime"].as_str().unwrap();
    assert!(time.ends_with("30:00Z"), "unexpected time {time}");
}

#[tokio::test]
async fn end_call_latches_without_touching_the_api() {
    let dispatcher = ToolDispatcher::new(ApiClient::new("http://127.0.0.1:9"));
    let mut ctx = pickup_context();

    let result = dispatcher.dispatch(&mut ctx, "end_call", r#"{"reason":"bye"}"#).await;
    assert_eq!(result, json!({"status": "hanging_up"}));
    assert!(ctx.should_hangup);
}

#[tokio::test]
async fn unknown_tool_and_api_failure_keep_the_session_alive() {
    // Unreachable API: every handler error must come back as JSON.
    let dispatcher = ToolDispatcher::new(ApiClient::new("http://127.0.0.1:9"));
    let mut ctx = pickup_context();

    let unknown = dispatcher.dispatch(&mut ctx, "teleport_pizza", "{}").await;
    assert!(unknown["error"].as_str().unwrap().contains("teleport_pizza"));

    let failed = dispatcher
        .dispatch(&mut ctx, "leave_message", r#"{"content":"call me back"}"#)
        .await;
    assert_eq!(failed["success"], false);
    assert!(!ctx.message_left);

    let malformed = dispatcher.dispatch(&mut ctx, "confirm_order", "not json").await;
    assert_eq!(malformed["success"], false);
}

#[tokio::test]
async fn faq_logging_reports_success_even_when_the_api_is_down() {
    let dispatcher = ToolDispatcher::new(ApiClient::new("http://127.0.0.1:9"));
    let mut ctx = pickup_context();
    let result = dispatcher
        .dispatch(&mut ctx, "log_new_faq", r#"{"question":"Do you have vegan options?"}"#)
        .await;
    assert_eq!(result, json!({"success": true}));
}

#[tokio::test]
async fn cancel_order_rejects_non_cancellable_and_missing_id() {
    let app = Router::new().route(
        "/api/orders/status",
        get(|| async {
            Json(json!({"orders": [
                {"orderNumber": "41", "status": "delivered", "id": "ord-41"},
                {"orderNumber": "42", "status": "pending"}
            ]}))
        }),
    );
    let addr = spawn_mock(app).await;
    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let delivered = dispatcher
        .dispatch(&mut ctx, "cancel_order", r#"{"order_number":"41"}"#)
        .await;
    assert_eq!(delivered["success"], false);
    assert!(delivered["error"].as_str().unwrap().contains("delivered"));

    // Order 42 is cancellable but the lookup omitted its id: explicit error
    // instead of a silent no-op PATCH.
    let missing_id = dispatcher
        .dispatch(&mut ctx, "cancel_order", r#"{"order_number":"42"}"#)
        .await;
    assert_eq!(missing_id["success"], false);
    assert!(missing_id["error"].as_str().unwrap().contains("id is missing"));

    let not_found = dispatcher
        .dispatch(&mut ctx, "cancel_order", r#"{"order_number":"77"}"#)
        .await;
    assert_eq!(not_found["success"], false);
}

#[tokio::test]
async fn cancel_order_patches_cancellable_orders() {
    let captured = Captured::default();
    let app = Router::new()
        .route(
            "/api/orders/status",
            get(|| async {
                Json(json!({"orders": [
                    {"orderNumber": 42, "status": "confirmed", "id": "ord-42"}
                ]}))
            }),
        )
        .route(
            "/api/orders",
            patch(|State(c): State<Captured>, Json(b): Json<Value>| async move {
                c.push("/api/orders", b).await;
                Json(json!({"ok": true}))
            }),
        )
        .with_state(captured.clone());
    let addr = spawn_mock(app).await;
    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let result = dispatcher
        .dispatch(&mut ctx, "cancel_order", r#"{"order_number":42}"#)
        .await;
    assert_eq!(result["success"], true, "got {result}");

    let body = captured.find("/api/orders").await.unwrap();
    assert_eq!(body["id"], "ord-42");
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn save_customer_info_caches_the_customer_id() {
    let app = Router::new().route(
        "/api/customers",
        post(|Json(b): Json<Value>| async move {
            assert_eq!(b["phone"], "+33611111111");
            assert_eq!(b["firstName"], "Luc");
            Json(json!({"id": "cust-7"}))
        }),
    );
    let addr = spawn_mock(app).await;
    let dispatcher = ToolDispatcher::new(ApiClient::new(format!("http://{addr}")));
    let mut ctx = pickup_context();

    let result = dispatcher
        .dispatch(&mut ctx, "save_customer_info", r#"{"first_name":"Luc"}"#)
        .await;
    assert_eq!(result["success"], true);
    assert_eq!(ctx.customer_id.as_deref(), Some("cust-7"));
}
