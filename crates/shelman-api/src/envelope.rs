//! The uniform response envelope and the closed error taxonomy.
//!
//! Every response, success or failure, is
//! `{success, data?, error?, meta?, timestamp, request_id?}`. The request id
//! comes from the task-local context installed by the middleware, so the
//! envelope and the log lines always agree. Error details never carry stack
//! traces, SQL text, or credentials.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

use shelman_config::ConfigError;
use shelman_device::DeviceError;
use shelman_telemetry::current_request_id;

/// Closed set of machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed input.
    BadRequest,
    /// Structured validation failure; details carry the findings.
    ValidationFailed,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Generic resource absent.
    NotFound,
    /// Device absent.
    DeviceNotFound,
    /// Template absent.
    TemplateNotFound,
    /// Unique-key or state conflict.
    Conflict,
    /// Template delete refused while referenced.
    TemplateInUse,
    /// Physical device unreachable (cached or observed).
    DeviceOffline,
    /// Physical device did not answer in time.
    DeviceTimeout,
    /// Rate limit exceeded; details carry `retry_after_seconds`.
    RateLimitExceeded,
    /// Request body over the configured cap.
    RequestTooLarge,
    /// Source address is blocked.
    IpBlocked,
    /// Sanitized catch-all.
    InternalServerError,
    /// Operational store failure.
    DatabaseError,
}

impl ErrorCode {
    /// The HTTP status this code travels with.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadRequest | Self::ValidationFailed => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::IpBlocked => StatusCode::FORBIDDEN,
            Self::NotFound | Self::DeviceNotFound | Self::TemplateNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Conflict | Self::TemplateInUse => StatusCode::CONFLICT,
            Self::DeviceOffline | Self::DeviceTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::InternalServerError | Self::DatabaseError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Error payload inside the envelope.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-safe message.
    pub message: String,
    /// Optional structured detail (field errors, retry hints).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Pagination block inside `meta`.
#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
    /// Total number of pages.
    pub total_pages: i64,
}

/// Response metadata.
#[derive(Debug, Clone, Serialize, Default)]
pub struct Meta {
    /// API version.
    pub version: &'static str,
    /// Pagination, present on paginated list responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    /// Number of items in this response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Number of items matching the query overall.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
}

impl Meta {
    /// Metadata for an unpaginated collection.
    #[must_use]
    pub fn counted(count: usize) -> Self {
        Self {
            version: "v1",
            pagination: None,
            count: Some(count),
            total_count: None,
        }
    }

    /// Metadata for a paginated collection.
    #[must_use]
    pub fn paginated(page: u32, page_size: u32, count: usize, total_count: i64) -> Self {
        let total_pages = if page_size == 0 {
            1
        } else {
            (total_count + i64::from(page_size) - 1) / i64::from(page_size)
        };
        Self {
            version: "v1",
            pagination: Some(Pagination {
                page,
                page_size,
                total_pages,
            }),
            count: Some(count),
            total_count: Some(total_count),
        }
    }
}

/// The uniform response envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope<T: Serialize> {
    /// Whether the request succeeded.
    pub success: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    /// Response metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    /// Server time the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Request id, echoed from the request context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// 200 envelope around `data`.
pub fn ok<T: Serialize>(data: T) -> Response {
    envelope_response(StatusCode::OK, Some(data), None, None)
}

/// 200 envelope around `data` with metadata.
pub fn ok_with_meta<T: Serialize>(data: T, meta: Meta) -> Response {
    envelope_response(StatusCode::OK, Some(data), None, Some(meta))
}

/// 201 envelope around `data`.
pub fn created<T: Serialize>(data: T) -> Response {
    envelope_response(StatusCode::CREATED, Some(data), None, None)
}

fn envelope_response<T: Serialize>(
    status: StatusCode,
    data: Option<T>,
    error: Option<ErrorBody>,
    meta: Option<Meta>,
) -> Response {
    let envelope = Envelope {
        success: error.is_none(),
        data,
        error,
        meta,
        timestamp: Utc::now(),
        request_id: current_request_id(),
    };
    (status, Json(envelope)).into_response()
}

/// Structured API error carried through handlers with `?`.
#[derive(Debug)]
pub struct ApiError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-safe message.
    pub message: String,
    /// Optional structured detail.
    pub details: Option<Value>,
}

impl ApiError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Attach structured detail.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// `BAD_REQUEST`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    /// `VALIDATION_FAILED` with field findings.
    #[must_use]
    pub fn validation(issues: &[shelman_model::ValidationIssue]) -> Self {
        Self::new(ErrorCode::ValidationFailed, "request failed validation")
            .with_details(json!({"validation_errors": issues}))
    }

    /// `UNAUTHORIZED`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// `NOT_FOUND`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// `CONFLICT`.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    /// `RATE_LIMIT_EXCEEDED` with a retry hint.
    #[must_use]
    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::new(ErrorCode::RateLimitExceeded, "rate limit exceeded")
            .with_details(json!({"retry_after_seconds": retry_after_seconds.max(1)}))
    }

    /// `REQUEST_TOO_LARGE`.
    #[must_use]
    pub fn request_too_large(limit: usize) -> Self {
        Self::new(ErrorCode::RequestTooLarge, "request body too large")
            .with_details(json!({"max_bytes": limit}))
    }

    /// `IP_BLOCKED`; deliberately terse.
    #[must_use]
    pub fn ip_blocked() -> Self {
        Self::new(ErrorCode::IpBlocked, "access denied")
    }

    /// Sanitized `INTERNAL_SERVER_ERROR`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        envelope_response::<Value>(
            self.code.status(),
            None,
            Some(ErrorBody {
                code: self.code,
                message: self.message,
                details: self.details,
            }),
            None,
        )
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::DeviceNotFound { id } => {
                Self::new(ErrorCode::DeviceNotFound, format!("device {id} not found"))
            }
            ConfigError::TemplateNotFound { id } => Self::new(
                ErrorCode::TemplateNotFound,
                format!("template {id} not found"),
            ),
            ConfigError::TemplateInUse { id, device_count } => Self::new(
                ErrorCode::TemplateInUse,
                format!("template {id} is assigned to {device_count} device(s)"),
            ),
            ConfigError::ScopeMismatch { detail, .. } => Self::bad_request(detail),
            ConfigError::ValidationFailed { issues } => Self::validation(&issues),
            ConfigError::Conflict { detail } => Self::conflict(detail),
            ConfigError::NoImportedConfig { device_id } => Self::not_found(format!(
                "device {device_id} has no imported configuration to compare against"
            )),
            ConfigError::NoAddress { device_id } => Self::new(
                ErrorCode::DeviceOffline,
                format!("device {device_id} has no known IP address"),
            ),
            ConfigError::Unsupported {
                device_id,
                capability,
            } => Self::bad_request(format!("device {device_id} has no {capability}")),
            ConfigError::Device(device_err) => Self::from(device_err),
            ConfigError::Data(data_err) => {
                error!(error = %data_err, "store operation failed");
                Self::new(ErrorCode::DatabaseError, "storage operation failed")
            }
            ConfigError::Model(model_err) => {
                error!(error = %model_err, "model operation failed");
                Self::internal("configuration processing failed")
            }
            ConfigError::Convert(shelman_vendor::ConvertError::UnsupportedGeneration {
                value,
            }) => Self::bad_request(format!("generation must be 1 or 2, got {value}")),
            ConfigError::Convert(convert_err) => {
                error!(error = %convert_err, "vendor conversion failed");
                Self::internal("device configuration could not be interpreted")
            }
        }
    }
}

impl From<DeviceError> for ApiError {
    fn from(err: DeviceError) -> Self {
        match &err {
            DeviceError::Timeout { .. } | DeviceError::Cancelled { .. } => Self::new(
                ErrorCode::DeviceTimeout,
                "device did not respond in time; it may be busy or rebooting, retry shortly",
            ),
            DeviceError::Offline | DeviceError::Transport { .. } => {
                Self::new(ErrorCode::DeviceOffline, "device is unreachable")
            }
            DeviceError::Status { status, .. } => Self::internal(format!(
                "device answered with unexpected status {status}"
            )),
            DeviceError::Rpc { message, .. } => {
                Self::bad_request(format!("device rejected the request: {message}"))
            }
            DeviceError::Protocol { .. } | DeviceError::Convert(_) => {
                error!(error = %err, "uninterpretable device payload");
                Self::internal("device returned an uninterpretable payload")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_map_to_their_status_classes() {
        assert_eq!(ErrorCode::DeviceNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::TemplateInUse.status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::RateLimitExceeded.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::RequestTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ErrorCode::DeviceTimeout.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn rate_limit_details_always_carry_a_positive_hint() {
        let err = ApiError::rate_limited(0);
        let details = err.details.expect("details");
        assert_eq!(details["retry_after_seconds"], 1);
    }

    #[test]
    fn not_found_config_errors_use_specific_codes() {
        let err = ApiError::from(ConfigError::TemplateNotFound { id: 9999 });
        assert_eq!(err.code, ErrorCode::TemplateNotFound);
        assert_eq!(err.code.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn database_errors_are_sanitized() {
        let err = ApiError::from(ConfigError::Data(shelman_data::DataError::UniqueViolation {
            detail: "devices.mac".to_string(),
        }));
        assert_eq!(err.code, ErrorCode::DatabaseError);
        assert!(!err.message.contains("devices.mac"));
        assert!(err.details.is_none());
    }

    #[test]
    fn pagination_meta_computes_total_pages() {
        let meta = Meta::paginated(2, 20, 20, 61);
        let pagination = meta.pagination.expect("pagination");
        assert_eq!(pagination.total_pages, 4);
    }
}
