use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use dpr_api::auth::TokenService;
use dpr_api::directory::Directory;
use dpr_api::ingest::Ingest;
use dpr_api::memory::MemoryStore;
use dpr_api::rest::{create_router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState {
        directory: Directory::new(store.clone(), TokenService::new("test-secret")),
        ingest: Ingest::new(store.clone(), 100),
    };
    (store, create_router(state))
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&b).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    read(router, req).await
}

/// Sends a body exactly as given, for inputs `json!` cannot express.
async fn send_raw(
    router: &Router,
    uri: &str,
    content_type: Option<&str>,
    body: &str,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri(uri);
    if let Some(ct) = content_type {
        builder = builder.header("content-type", ct);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    read(router, req).await
}

async fn read(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn signup_body(device_id: Value) -> Value {
    json!({
        "firstName": "Ada",
        "deviceId": device_id,
        "email": "ada@example.com",
        "password": "secret1"
    })
}

#[tokio::test]
async fn health_check_on_both_prefixes() {
    let (_, router) = app();

    let (status, body) = send(&router, "GET", "/", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&router, "GET", "/api", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, _) = send(&router, "GET", "/api/upload", None, None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn signup_login_verify_flow() {
    let (_, router) = app();

    let (status, body) = send(&router, "POST", "/auth/signup", Some(signup_body(json!(12345))), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["deviceId"], 12345);
    assert_eq!(body["user"]["firstName"], "Ada");
    assert!(body["user"].get("passwordHash").is_none());

    let (status, body) = send(
        &router,
        "POST",
        "/api/auth/login",
        Some(json!({"deviceId": "12345", "password": "secret1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = send(&router, "POST", "/auth/verify", Some(json!({"token": token})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], true);
    assert_eq!(body["user"]["deviceId"], 12345);

    let (status, _) = send(&router, "POST", "/auth/verify", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let (store, router) = app();

    send(&router, "POST", "/auth/signup", Some(signup_body(json!(7))), None).await;
    let (status, body) = send(&router, "POST", "/auth/signup", Some(signup_body(json!(7))), None).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Device ID already exists");
    assert_eq!(store.profile_count().await, 1);
}

#[tokio::test]
async fn wrong_password_is_unauthorized() {
    let (_, router) = app();
    send(&router, "POST", "/auth/signup", Some(signup_body(json!(7))), None).await;

    let (status, body) = send(
        &router,
        "POST",
        "/auth/login",
        Some(json!({"deviceId": 7, "password": "wrong-one"})),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.get("token").is_none());

    let (status, _) = send(
        &router,
        "POST",
        "/config/7",
        Some(json!({"password": "wrong-one"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn login_requires_both_fields() {
    let (_, router) = app();
    let (status, _) = send(&router, "POST", "/auth/login", Some(json!({"deviceId": 7})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_rejects_bad_tokens() {
    let (_, router) = app();

    let (status, body) = send(&router, "POST", "/auth/verify", Some(json!({"token": "x.y.z"})), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");

    let (status, _) = send(&router, "POST", "/auth/verify", Some(json!({})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn config_signup_and_fetch() {
    let (_, router) = app();

    let (status, body) = send(&router, "POST", "/api/config", Some(signup_body(json!("42"))), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deviceId"], 42);
    assert!(body["token"].is_string());

    let (status, body) = send(&router, "GET", "/config/42", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["firstName"], "Ada");
    assert_eq!(body["email"], "ada@example.com");
    assert!(body.get("passwordHash").is_none());
    assert!(body.get("password").is_none());

    let (status, body) = send(&router, "POST", "/config/42", Some(json!({"password": "secret1"})), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].is_string());
}

#[tokio::test]
async fn config_validation() {
    let (_, router) = app();

    let mut short = signup_body(json!(1));
    short["password"] = json!("123");
    let (status, _) = send(&router, "POST", "/config", Some(short), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "POST", "/config", Some(json!({"sampleRate": 5})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "GET", "/config/not-a-number", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&router, "GET", "/config/999", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn raw_device_config_is_stored() {
    let (_, router) = app();

    let (status, body) = send(
        &router,
        "POST",
        "/config",
        Some(json!({"deviceId": 12345, "configParam1": "value1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deviceId"], 12345);
    assert!(body["id"].is_string());

    let (_, body) = send(&router, "GET", "/config/12345", None, None).await;
    assert_eq!(body["config"]["configParam1"], "value1");

    let (status, _) = send(&router, "POST", "/config", Some(json!({"deviceId": 12345})), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn update_profile_rules() {
    let (_, router) = app();
    send(&router, "POST", "/config", Some(signup_body(json!(5))), None).await;

    let (status, _) = send(&router, "PUT", "/config/5", Some(json!({"password": "newsecret"})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &router,
        "PUT",
        "/config/5",
        Some(json!({"currentPassword": "bad-guess", "password": "newsecret"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Old password still works after both rejected attempts.
    let (status, _) = send(&router, "POST", "/config/5", Some(json!({"password": "secret1"})), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        "PUT",
        "/config/5",
        Some(json!({"currentPassword": "secret1", "password": "newsecret", "email": "new@example.com"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "new@example.com");

    let (status, _) = send(&router, "POST", "/config/5", Some(json!({"password": "newsecret"})), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&router, "PUT", "/config/6", Some(json!({})), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_requires_array() {
    let (store, router) = app();

    let (status, body) = send(&router, "POST", "/upload", Some(json!({"speed": 10})), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Data must be an array of JSON objects");
    assert_eq!(store.telemetry_count().await, 0);
}

#[tokio::test]
async fn upload_then_dashboard() {
    let (_, router) = app();

    let (status, body) = send(
        &router,
        "POST",
        "/api/upload",
        Some(json!([
            {"deviceId": 12345, "speed": 50, "accX": 1, "accY": 0, "accZ": 0,
             "date": "2024-01-01", "time": "10:00"},
            {"deviceId": 12345, "speed": 90, "accX": 4, "accY": 0, "accZ": 0,
             "date": "2024-01-01", "time": "10:05", "temperature": 25.3}
        ])),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["insertedCount"], 2);

    let (status, body) = send(&router, "GET", "/driving-records/12345", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deviceId"], 12345);

    let summary = &body["records"];
    assert_eq!(summary["overallScore"], 70);
    assert_eq!(summary["rating"], "Moderate");
    assert_eq!(summary["stats"]["avgSpeed"], 70.0);
    assert_eq!(summary["stats"]["maxSpeed"], 90.0);
    assert_eq!(summary["stats"]["avgAcceleration"], 2.5);
    assert_eq!(summary["hourlyData"].as_array().unwrap().len(), 24);
    assert_eq!(summary["hourlyData"][10]["hour"], "10:00");
    assert_eq!(summary["recentRecords"][0]["time"], "10:05");
    assert_eq!(body["allRecords"].as_array().unwrap().len(), 2);

    let (status, body) = send(&router, "GET", "/telemetry/12345?limit=1", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["speed"], 90.0);
    assert_eq!(body["data"][0]["accX"], 4.0);
}

#[tokio::test]
async fn dashboard_for_unknown_device_is_empty() {
    let (_, router) = app();

    let (status, body) = send(&router, "GET", "/driving-records/77", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["records"]["stats"]["totalRecords"], 0);
    assert!(body["records"]["recentRecords"].as_array().unwrap().is_empty());
    assert!(body["allRecords"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_bodies_are_json_400s() {
    let (store, router) = app();

    let (status, body) = send_raw(&router, "/upload", Some("application/json"), r#"[{"speed": 1"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send_raw(&router, "/api/upload", None, r#"[{"speed": 1}]"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(store.telemetry_count().await, 0);

    let fractional = signup_body(json!(12.5));
    let (status, body) = send(&router, "POST", "/auth/signup", Some(fractional.clone()), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    // Same input through /config gets the same treatment.
    let (status, body) = send(&router, "POST", "/config", Some(fractional), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = send(
        &router,
        "POST",
        "/auth/login",
        Some(json!({"deviceId": true, "password": "secret1"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(store.profile_count().await, 0);
}

async fn signed_up_token(router: &Router, device_id: i64) -> String {
    let (status, body) = send(router, "POST", "/auth/signup", Some(signup_body(json!(device_id))), None).await;
    assert_eq!(status, StatusCode::OK);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let (store, router) = app();
    let record = json!({"date": "2024-01-01", "time": "10:00", "speed": 50, "acceleration": 1});

    let (status, body) = send(&router, "POST", "/driving-records", Some(record.clone()), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Authorization token required");

    let (status, _) = send(&router, "POST", "/api/driving-records", Some(record), Some("x.y.z")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&router, "GET", "/dashboard", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&router, "GET", "/api/dashboard", None, Some("x.y.z")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Invalid token");

    assert_eq!(store.telemetry_count().await, 0);
}

#[tokio::test]
async fn record_entry_feeds_the_dashboard() {
    let (_, router) = app();
    let token = signed_up_token(&router, 12345).await;

    let (status, body) = send(
        &router,
        "POST",
        "/api/driving-records",
        Some(json!({"date": "2024-01-01", "time": "10:00", "speed": 50, "acceleration": 1})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Driving record saved successfully");
    assert_eq!(body["record"]["speed"], 50.0);
    assert_eq!(body["record"]["acceleration"], 1.0);

    send(
        &router,
        "POST",
        "/driving-records",
        Some(json!({"date": "2024-01-01", "time": "10:05", "speed": 90, "acceleration": 4})),
        Some(&token),
    )
    .await;

    let (status, body) = send(&router, "GET", "/dashboard", None, Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overallScore"], 70);
    assert_eq!(body["stats"]["totalRecords"], 2);
    assert_eq!(body["currentMetrics"]["time"], "10:05");

    // Another device's token sees only its own records.
    let other = signed_up_token(&router, 777).await;
    let (_, body) = send(&router, "GET", "/dashboard", None, Some(&other)).await;
    assert_eq!(body["stats"]["totalRecords"], 0);
}

#[tokio::test]
async fn record_entry_validation() {
    let (store, router) = app();
    let token = signed_up_token(&router, 5).await;

    let (status, body) = send(
        &router,
        "POST",
        "/driving-records",
        Some(json!({"date": "2024-01-01", "speed": 50, "acceleration": 1})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "All fields are required: date, time, speed, acceleration");

    let (status, body) = send(
        &router,
        "POST",
        "/driving-records",
        Some(json!({"date": "2024-01-01", "time": "10:00", "speed": "50", "acceleration": 1})),
        Some(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Speed and acceleration must be numbers");
    assert_eq!(store.telemetry_count().await, 0);
}
