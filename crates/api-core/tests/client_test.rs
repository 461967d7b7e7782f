//! Integration tests for the API client against an in-process mock API.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use tablevoice_api_core::{ApiClient, ApiError, AvailabilityRequest, CallCreate};

async fn spawn_mock(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });
    addr
}

#[tokio::test]
async fn fetch_ai_config_parses_snapshot() {
    let app = Router::new().route(
        "/api/ai",
        get(|Query(q): Query<HashMap<String, String>>| async move {
            assert_eq!(q["restaurantId"], "r1");
            assert_eq!(q["callerPhone"], "+33611111111");
            Json(json!({
                "systemPrompt": "Take orders.",
                "tools": [],
                "voice": "sage",
                "avgPrepTimeMin": 20,
                "deliveryEnabled": true,
                "itemMap": {"3": {"uuid": "u3", "name": "Margherita"}}
            }))
        }),
    );
    let addr = spawn_mock(app).await;
    let client = ApiClient::new(format!("http://{addr}"));

    let cfg = client
        .fetch_ai_config("r1", "+33611111111")
        .await
        .expect("ai config");
    assert_eq!(cfg.voice, "sage");
    assert_eq!(cfg.item_map["3"].uuid, "u3");
    assert!(cfg.delivery_enabled);
}

#[tokio::test]
async fn non_2xx_is_a_status_error() {
    let app = Router::new().route(
        "/api/availability/check",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let addr = spawn_mock(app).await;
    let client = ApiClient::new(format!("http://{addr}"));

    let req = AvailabilityRequest {
        restaurant_id: "r1".into(),
        mode: "pickup".into(),
        requested_time: None,
        customer_address: None,
        customer_city: None,
        customer_postal_code: None,
        party_size: None,
        seating_preference: None,
        customer_phone: None,
    };
    match client.check_availability(&req).await {
        Err(ApiError::Status { status: 500, endpoint }) => {
            assert_eq!(endpoint, "/api/availability/check");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn blocked_check_fails_open_on_error_and_reads_flag() {
    // No route registered: the mock answers 404, which must read as "not
    // blocked".
    let addr = spawn_mock(Router::new()).await;
    let client = ApiClient::new(format!("http://{addr}"));
    assert!(!client.check_blocked("r1", "+33611111111").await);

    let app = Router::new().route(
        "/api/blocked-phones/check",
        get(|| async { Json(json!({"blocked": true})) }),
    );
    let addr = spawn_mock(app).await;
    let client = ApiClient::new(format!("http://{addr}"));
    assert!(client.check_blocked("r1", "+33611111111").await);
}

#[tokio::test]
async fn blocked_check_fails_open_when_unreachable() {
    // Nothing listens here; connection is refused immediately.
    let client = ApiClient::new("http://127.0.0.1:9");
    assert!(!client.check_blocked("r1", "+33600000000").await);
}

#[tokio::test]
async fn create_call_posts_camel_case_and_returns_id() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = hits.clone();
    let app = Router::new().route(
        "/api/calls",
        post(move |Json(body): Json<Value>| {
            let hits = hits_clone.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                assert_eq!(body["restaurantId"], "r1");
                assert_eq!(body["callerNumber"], "+33611111111");
                assert!(body.get("customerId").is_none());
                Json(json!({"id": 1234}))
            }
        }),
    );
    let addr = spawn_mock(app).await;
    let client = ApiClient::new(format!("http://{addr}"));

    let body = client
        .create_call(&CallCreate {
            restaurant_id: "r1".into(),
            caller_number: "+33611111111".into(),
            customer_id: None,
            started_at: chrono::Utc::now(),
        })
        .await
        .expect("create call");
    assert_eq!(tablevoice_api_core::extract_id(&body).as_deref(), Some("1234"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let app = Router::new().route(
        "/api/blocked-phones/check",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(json!({"blocked": true}))
        }),
    );
    let addr = spawn_mock(app).await;
    let client = ApiClient::new(format!("http://{addr}"));

    // The 5 s budget trips well before the 30 s handler; fail-open applies.
    let start = std::time::Instant::now();
    assert!(!client.check_blocked("r1", "+33611111111").await);
    assert!(start.elapsed() < Duration::from_secs(10));
}
