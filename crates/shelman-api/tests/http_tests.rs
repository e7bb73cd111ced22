use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use shelman_api::{ApiServer, ApiSettings, ApiState};
use shelman_config::ConfigurationService;
use shelman_data::Store;
use shelman_device::{DeviceClient, DeviceTokens, ReachabilityCache, Timeouts};
use shelman_events::EventBus;
use shelman_security::{
    BucketConfig, MonitorConfig, RateLimitConfig, SecurityState, ValidationConfig,
};
use shelman_telemetry::Metrics;
use shelman_test_support::postgres::start_postgres;

struct Harness {
    _postgres: shelman_test_support::TestDatabase,
    router: Router,
}

async fn harness(settings: ApiSettings, limits: RateLimitConfig) -> Option<Harness> {
    let postgres = match start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping http tests: {err}");
            return None;
        }
    };
    let store = Store::connect(postgres.connection_string())
        .await
        .expect("store connects and migrates");
    let client = DeviceClient::with_timeouts(Timeouts {
        connect: Duration::from_millis(500),
        read: Duration::from_millis(500),
        write: Duration::from_millis(500),
    })
    .expect("client");
    let events = EventBus::new();
    let service = ConfigurationService::new(
        store,
        client,
        Arc::new(ReachabilityCache::new()),
        Arc::new(DeviceTokens::new(CancellationToken::new())),
        events.clone(),
    );
    let security = SecurityState::new(
        events.clone(),
        Vec::new(),
        limits,
        MonitorConfig::default(),
        ValidationConfig::default(),
    );
    let metrics = Metrics::new().expect("metrics");
    let state = Arc::new(ApiState::new(service, security, metrics, events, settings));
    Some(Harness {
        _postgres: postgres,
        router: ApiServer::new(state).router(),
    })
}

async fn send(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
) -> (StatusCode, Option<String>, Value) {
    send_with_agent(router, method, uri, body, bearer, "shelman-tests").await
}

async fn send_with_agent(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    bearer: Option<&str>,
    user_agent: &str,
) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("user-agent", user_agent);
    if let Some(token) = bearer {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => {
            let raw = body.to_string();
            builder
                .header("content-type", "application/json")
                .header("content-length", raw.len())
                .body(Body::from(raw))
                .expect("request")
        }
        None => builder.body(Body::empty()).expect("request"),
    };

    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, request_id, value)
}

fn create_body(mac: &str) -> Value {
    json!({
        "mac": mac,
        "ip": "192.0.2.40",
        "name": "Kitchen Plug",
        "model": "SHPLG-S",
        "generation": 1
    })
}

#[tokio::test]
async fn envelope_crud_and_not_found_semantics() -> anyhow::Result<()> {
    let Some(harness) = harness(ApiSettings::default(), RateLimitConfig::default()).await else {
        return Ok(());
    };
    let router = &harness.router;

    // Every response carries the envelope and echoes the minted request id.
    let (status, request_id, body) = send(router, "GET", "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    let header_id = request_id.expect("request id header");
    assert_eq!(body["request_id"], header_id.as_str());

    let (status, _, body) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:FF")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let device_id = body["data"]["id"].as_i64().expect("device id");

    // Partial update: the body names only `name`; MAC and IP must survive.
    let (status, _, body) = send(
        router,
        "PUT",
        &format!("/api/v1/devices/{device_id}"),
        Some(json!({"name": "Updated"})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Updated");
    assert_eq!(body["data"]["mac"], "AA:BB:CC:DD:EE:FF");
    assert_eq!(body["data"]["ip"], "192.0.2.40");

    // MAC collision is a conflict with its own code, not a server fault.
    let (status, _, body) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:FF")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");

    // Pagination metadata appears when page parameters are supplied.
    let (status, _, body) = send(
        router,
        "GET",
        "/api/v1/devices?page=1&page_size=1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["pagination"]["page"], 1);
    assert_eq!(body["meta"]["total_count"], 1);

    let (status, _, body) = send(router, "GET", "/api/v1/devices", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["meta"]["pagination"].is_null());

    // Unknown resources surface specific not-found codes.
    let (status, _, body) =
        send(router, "GET", "/api/v1/devices/999999/status", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "DEVICE_NOT_FOUND");

    let (status, _, body) = send(
        router,
        "GET",
        &format!("/api/v1/devices/{device_id}/config/drift"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _, body) = send(
        router,
        "POST",
        &format!("/api/v1/devices/{device_id}/config/apply-template"),
        Some(json!({"template_id": 9999})),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "TEMPLATE_NOT_FOUND");

    let (status, _, body) = send(
        router,
        "DELETE",
        &format!("/api/v1/devices/{device_id}"),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
    Ok(())
}

fn nested(depth: usize) -> Value {
    let mut value = json!(1);
    for _ in 1..depth {
        value = json!({"next": value});
    }
    value
}

#[tokio::test]
async fn structural_limits_are_inclusive_boundaries() -> anyhow::Result<()> {
    let settings = ApiSettings {
        max_body_bytes: 2048,
        ..ApiSettings::default()
    };
    let Some(harness) = harness(settings, RateLimitConfig::default()).await else {
        return Ok(());
    };
    let router = &harness.router;

    let (status, _, body) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:01")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let device_id = body["data"]["id"].as_i64().expect("device id");

    // Depth 10 passes; the wrapper field is simply ignored by the handler.
    let mut ok_body = json!({"name": "deep-ok"});
    ok_body["extra"] = nested(9);
    let (status, _, _) = send(
        router,
        "PUT",
        &format!("/api/v1/devices/{device_id}"),
        Some(ok_body),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Depth 11 is rejected before any handler runs.
    let mut deep_body = json!({"name": "deep-bad"});
    deep_body["extra"] = nested(10);
    let (status, _, body) = send(
        router,
        "PUT",
        &format!("/api/v1/devices/{device_id}"),
        Some(deep_body),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");

    // One byte over the cap is too large; exactly at the cap is not.
    let prefix = "{\"name\":\"x\"}";
    let padding = " ".repeat(2048 - prefix.len());
    let over_cap = format!("{prefix}{padding} ");
    assert_eq!(over_cap.len(), 2049);
    let over = Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/devices/{device_id}"))
        .header("content-type", "application/json")
        .header("content-length", over_cap.len())
        .body(Body::from(over_cap))
        .expect("request");
    let response = router.clone().oneshot(over).await.expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let exact = format!("{prefix}{padding}");
    assert_eq!(exact.len(), 2048);
    let at_limit = Request::builder()
        .method("PUT")
        .uri(format!("/api/v1/devices/{device_id}"))
        .header("content-type", "application/json")
        .header("content-length", exact.len())
        .body(Body::from(exact))
        .expect("request");
    let response = router.clone().oneshot(at_limit).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    // Prototype-pollution query keys are rejected outright.
    let (status, _, body) = send(
        router,
        "GET",
        "/api/v1/devices?__proto__=1",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_FAILED");
    Ok(())
}

#[tokio::test]
async fn rate_limit_boundary_carries_a_retry_hint() -> anyhow::Result<()> {
    let limits = RateLimitConfig {
        read: BucketConfig {
            burst: 3,
            replenish_period: Duration::from_secs(60),
        },
        ..RateLimitConfig::default()
    };
    let Some(harness) = harness(ApiSettings::default(), limits).await else {
        return Ok(());
    };
    let router = &harness.router;

    for _ in 0..3 {
        let (status, _, _) = send(router, "GET", "/api/v1/tags", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, _, body) = send(router, "GET", "/api/v1/tags", None, None).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    let retry = body["error"]["details"]["retry_after_seconds"]
        .as_u64()
        .expect("retry hint");
    assert!(retry >= 1);
    Ok(())
}

#[tokio::test]
async fn admin_credential_gates_mutations_only() -> anyhow::Result<()> {
    let settings = ApiSettings {
        admin_token: Some("sesame".to_string()),
        ..ApiSettings::default()
    };
    let Some(harness) = harness(settings, RateLimitConfig::default()).await else {
        return Ok(());
    };
    let router = &harness.router;

    let (status, _, body) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:02")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");

    let (status, _, _) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:02")),
        Some("wrong"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _, _) = send(
        router,
        "POST",
        "/api/v1/devices",
        Some(create_body("AA:BB:CC:DD:EE:02")),
        Some("sesame"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Reads stay open.
    let (status, _, _) = send(router, "GET", "/api/v1/devices", None, None).await;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn loopback_is_exempt_from_scanner_heuristics() -> anyhow::Result<()> {
    let Some(harness) = harness(ApiSettings::default(), RateLimitConfig::default()).await else {
        return Ok(());
    };
    let router = &harness.router;

    // In-process requests resolve to loopback; even a scanner user-agent
    // must never trip blocking.
    for _ in 0..50 {
        let (status, _, _) = send_with_agent(
            router,
            "GET",
            "/api/v1/devices",
            None,
            None,
            "sqlmap/1.7.2",
        )
        .await;
        assert_ne!(status, StatusCode::FORBIDDEN);
    }
    Ok(())
}
