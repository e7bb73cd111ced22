//! Shared application state for the HTTP layer.

use std::time::Duration;

use shelman_config::ConfigurationService;
use shelman_events::EventBus;
use shelman_security::SecurityState;
use shelman_telemetry::Metrics;

/// Tunables the HTTP layer needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct ApiSettings {
    /// Admin bearer credential; `None` leaves admin endpoints open (useful
    /// in development, logged loudly at startup).
    pub admin_token: Option<String>,
    /// Request body cap in bytes.
    pub max_body_bytes: usize,
    /// Whole-request processing deadline.
    pub request_timeout: Duration,
    /// Allowed CORS origins; empty means any.
    pub cors_origins: Vec<String>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            admin_token: None,
            max_body_bytes: 10 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            cors_origins: Vec::new(),
        }
    }
}

/// State shared by every handler and middleware layer.
#[derive(Clone)]
pub struct ApiState {
    /// The configuration service orchestrating all domain operations.
    pub service: ConfigurationService,
    /// Security pipeline state.
    pub security: SecurityState,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Event bus backing the WebSocket stream.
    pub events: EventBus,
    /// HTTP tunables.
    pub settings: ApiSettings,
}

impl ApiState {
    /// Assemble the state from its collaborators.
    #[must_use]
    pub fn new(
        service: ConfigurationService,
        security: SecurityState,
        metrics: Metrics,
        events: EventBus,
        settings: ApiSettings,
    ) -> Self {
        Self {
            service,
            security,
            metrics,
            events,
            settings,
        }
    }
}
