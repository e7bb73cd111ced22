//! Liveness and metrics exposition endpoints (outside `/api/v1`).

use std::sync::Arc;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::envelope::{self, ApiError};
use crate::state::ApiState;

/// `GET /healthz`
pub(crate) async fn healthz() -> Response {
    envelope::ok(serde_json::json!({"status": "ok"}))
}

/// `GET /metrics` — Prometheus text exposition, deliberately not enveloped.
pub(crate) async fn metrics(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let rendered = state.metrics.render().map_err(|err| {
        tracing::error!(error = %err, "metrics rendering failed");
        ApiError::internal("metrics rendering failed")
    })?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        rendered,
    )
        .into_response())
}
