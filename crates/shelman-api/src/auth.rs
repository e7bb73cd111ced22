//! Admin bearer credential middleware.
//!
//! A single credential from the environment gates every mutating endpoint.
//! When no credential is configured the surface runs open; the binary logs
//! that loudly at startup so it cannot happen silently in production.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::envelope::ApiError;
use crate::state::ApiState;

/// Require the admin bearer token on a route.
pub async fn require_admin(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(expected) = &state.settings.admin_token else {
        return next.run(req).await;
    };

    let presented = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            next.run(req).await
        }
        Some(_) => ApiError::unauthorized("invalid credentials").into_response(),
        None => ApiError::unauthorized("missing bearer credential").into_response(),
    }
}

/// Length-constant comparison so token probing cannot use timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_requires_exact_match() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secres"));
        assert!(!constant_time_eq(b"secret", b"secret1"));
    }
}
