//! The layered security pipeline.
//!
//! Order (outermost first): panic recovery, request-id minting, IP block,
//! security monitor, request context (audit + operational log), security
//! headers, timeout, rate limit, body cap, structural validation, CORS.
//! Earlier layers short-circuit later ones; a blocked address never reaches
//! the monitor, and a rate-limited request never buffers its body.
//!
//! Two carve-outs are load-bearing: request timeouts (408) are produced by
//! the timeout layer and never feed the monitor, and loopback/internal
//! addresses bypass blocking and scanner heuristics entirely.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    CACHE_CONTROL, CONTENT_LENGTH, CONTENT_SECURITY_POLICY, CONTENT_TYPE, REFERRER_POLICY,
    RETRY_AFTER, USER_AGENT, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, info, warn};

use crate::envelope::ApiError;
use crate::state::ApiState;
use shelman_security::{class_for_path, classify_request};
use shelman_telemetry::with_request_context;

/// Name of the request-id header minted by the telemetry layers.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Best-effort client address: connection info when served, loopback in
/// in-process tests.
#[must_use]
pub fn client_ip(req: &Request) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or(IpAddr::V4(Ipv4Addr::LOCALHOST), |info| info.0.ip())
}

/// Layer 2: O(1) block-list lookup; blocked addresses receive a terse error
/// without reaching anything else.
pub async fn block_ips(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if state.security.blocks.is_blocked(ip) {
        debug!(%ip, "request rejected by block list");
        return ApiError::ip_blocked().into_response();
    }
    next.run(req).await
}

/// Layer 3: classify the request and count it against the source's attack
/// profile; crossing the threshold blocks the source immediately.
pub async fn monitor_requests(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    if !state.security.is_exempt(ip) {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or_else(|| req.uri().path().to_string(), ToString::to_string);
        let user_agent = req
            .headers()
            .get(USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if let Some((kind, matched)) = classify_request(&path_and_query, user_agent) {
            state.metrics.inc_security_alert(kind.as_str());
            let blocked = state
                .security
                .monitor
                .record(ip, kind, &matched, req.uri().path());
            state
                .metrics
                .set_blocked_ips(i64::try_from(state.security.blocks.len()).unwrap_or(i64::MAX));
            if blocked {
                return ApiError::ip_blocked().into_response();
            }
        }
    }
    next.run(req).await
}

/// Layers 4 and 11: install the task-local request context (so envelopes,
/// audit records, and log lines share one id) and emit the operational log
/// line on the way out.
pub async fn request_context(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(HEADER_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let response = with_request_context(request_id.clone(), path.clone(), next.run(req)).await;

    let status = response.status();
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        request_id = %request_id,
        latency_ms,
        "request"
    );
    response
}

/// Layer 5: defensive response headers. HSTS is intentionally absent: the
/// server itself never terminates TLS.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let sensitive = req.uri().path().starts_with("/api/");
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'"),
    );
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    if sensitive {
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    }
    response
}

/// Layer 7: per-IP token buckets with path classes; violations carry a
/// retry hint in both the envelope and the `Retry-After` header.
pub async fn rate_limit(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&req);
    let is_mutation = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );
    let class = class_for_path(req.uri().path(), is_mutation);
    let decision = state.security.limiter.check(ip, class);

    if !decision.allowed {
        state.metrics.inc_rate_limit_throttled();
        warn!(%ip, ?class, "rate limit exceeded");
        let retry_seconds = decision.retry_after.as_secs().max(1);
        let mut response = ApiError::rate_limited(retry_seconds).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_seconds.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        return response;
    }
    next.run(req).await
}

/// Layers 8 and 9: body cap and structural validation. JSON bodies are
/// buffered once here and handed to the handler re-materialized.
pub async fn validate_request(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let validation = &state.security.validation;

    if let Some(query) = req.uri().query() {
        if let Err(violation) = validation.check_query(query) {
            return validation_error(&violation);
        }
    }

    let header_view = req
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), value.as_bytes().len()));
    if let Err(violation) = validation.check_headers(header_view) {
        return validation_error(&violation);
    }

    let declared_len = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<usize>().ok());
    if declared_len.is_some_and(|len| len > state.settings.max_body_bytes) {
        return ApiError::request_too_large(state.settings.max_body_bytes).into_response();
    }

    let has_body = declared_len.is_some_and(|len| len > 0);
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    if has_body {
        if let Some(content_type) = &content_type {
            if let Err(violation) = validation.check_content_type(content_type) {
                return validation_error(&violation);
            }
        }
    }

    let is_json = content_type
        .as_deref()
        .is_some_and(|value| value.starts_with("application/json"));
    if has_body && is_json {
        let (parts, body) = req.into_parts();
        let Ok(bytes) = axum::body::to_bytes(body, state.settings.max_body_bytes).await else {
            return ApiError::request_too_large(state.settings.max_body_bytes).into_response();
        };
        if let Ok(document) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            if let Err(violation) = validation.check_json(&document) {
                return validation_error(&violation);
            }
        }
        let req = Request::from_parts(parts, Body::from(bytes));
        return next.run(req).await;
    }

    next.run(req).await
}

fn validation_error(violation: &shelman_security::ValidationViolation) -> Response {
    ApiError::validation(&[shelman_model::ValidationIssue {
        pointer: String::new(),
        message: violation.to_string(),
    }])
    .into_response()
}

/// Layer 1: sanitized panic handler; nothing internal leaks.
#[must_use]
pub fn panic_response(_err: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!("request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "success": false,
            "error": {
                "code": "INTERNAL_SERVER_ERROR",
                "message": "internal server error"
            },
            "timestamp": chrono::Utc::now(),
        })),
    )
        .into_response()
}
