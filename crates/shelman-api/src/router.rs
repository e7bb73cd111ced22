//! Router construction and server host.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::auth::require_admin;
use crate::handlers::{config, devices, system, tags};
use crate::middleware::{
    HEADER_REQUEST_ID, block_ips, monitor_requests, panic_response, rate_limit, request_context,
    security_headers, validate_request,
};
use crate::state::ApiState;
use crate::ws::metrics_ws;
use shelman_telemetry::{propagate_request_id_layer, set_request_id_layer};

/// Axum router wrapper hosting the Shelman API.
pub struct ApiServer {
    router: Router,
}

impl ApiServer {
    /// Build the router with the full security pipeline wired in.
    #[must_use]
    pub fn new(state: Arc<ApiState>) -> Self {
        let cors = build_cors(&state);

        let pipeline = ServiceBuilder::new()
            .layer(CatchPanicLayer::custom(panic_response))
            .layer(set_request_id_layer())
            .layer(propagate_request_id_layer())
            .layer(middleware::from_fn_with_state(state.clone(), block_ips))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                monitor_requests,
            ))
            .layer(middleware::from_fn(request_context))
            .layer(middleware::from_fn(security_headers))
            .layer(TimeoutLayer::new(state.settings.request_timeout))
            .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
            .layer(DefaultBodyLimit::max(state.settings.max_body_bytes))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                validate_request,
            ))
            .layer(cors);

        let router = Router::new()
            .route("/healthz", get(system::healthz))
            .route("/metrics", get(system::metrics))
            .nest("/api/v1", Self::v1_routes(&state))
            .layer(pipeline)
            .with_state(state);

        Self { router }
    }

    fn v1_routes(state: &Arc<ApiState>) -> Router<Arc<ApiState>> {
        Self::read_routes().merge(Self::write_routes(state))
    }

    fn read_routes() -> Router<Arc<ApiState>> {
        Router::new()
            .route("/devices", get(devices::list_devices))
            .route("/devices/{id}", get(devices::get_device))
            .route("/devices/{id}/status", get(devices::device_status))
            .route("/devices/{id}/energy", get(devices::device_energy))
            .route("/devices/{id}/templates", get(config::get_device_templates))
            .route("/devices/{id}/overrides", get(config::get_overrides))
            .route("/devices/{id}/desired-config", get(config::desired_config))
            .route("/devices/{id}/config/status", get(config::config_status))
            .route("/devices/{id}/config/drift", get(config::config_drift))
            .route("/devices/{id}/tags", get(tags::get_device_tags))
            .route("/config/templates", get(config::list_templates))
            .route("/config/templates/{id}", get(config::get_template))
            .route("/config/pending", get(config::pending_devices))
            .route("/tags", get(tags::list_tags))
            .route("/tags/{tag}/devices", get(tags::devices_for_tag))
            .route("/metrics/ws", get(metrics_ws))
    }

    fn write_routes(state: &Arc<ApiState>) -> Router<Arc<ApiState>> {
        let admin = middleware::from_fn_with_state(state.clone(), require_admin);

        Router::new()
            .route("/devices", post(devices::create_device))
            .route(
                "/devices/{id}",
                put(devices::update_device).delete(devices::delete_device),
            )
            .route("/devices/{id}/control", post(devices::control_device))
            .route(
                "/devices/{id}/templates",
                put(config::set_device_templates),
            )
            .route(
                "/devices/{id}/templates/{tid}",
                post(config::add_device_template).delete(config::remove_device_template),
            )
            .route(
                "/devices/{id}/overrides",
                put(config::put_overrides)
                    .patch(config::patch_overrides)
                    .delete(config::delete_overrides),
            )
            .route("/devices/{id}/config/apply", post(config::apply_config))
            .route("/devices/{id}/config/verify", post(config::verify_config))
            .route(
                "/devices/{id}/config/reboot-and-verify",
                post(config::reboot_and_verify),
            )
            .route(
                "/devices/{id}/config/apply-template",
                post(config::apply_template),
            )
            .route("/devices/{id}/tags", post(tags::add_device_tag))
            .route(
                "/devices/{id}/tags/{tag}",
                delete(tags::remove_device_tag),
            )
            .route("/config/templates", post(config::create_template))
            .route(
                "/config/templates/{id}",
                put(config::update_template).delete(config::delete_template),
            )
            .route("/config/apply-bulk", post(config::apply_bulk))
            .route_layer(admin)
    }

    /// The assembled router, for in-process tests.
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on the supplied address until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener fails to bind or the server
    /// terminates unexpectedly.
    pub async fn serve(
        self,
        addr: SocketAddr,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        tracing::info!(%addr, "starting API");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;
        Ok(())
    }
}

fn build_cors(state: &Arc<ApiState>) -> CorsLayer {
    let methods = [
        axum::http::Method::GET,
        axum::http::Method::POST,
        axum::http::Method::PUT,
        axum::http::Method::PATCH,
        axum::http::Method::DELETE,
        axum::http::Method::OPTIONS,
    ];
    let headers = [
        CONTENT_TYPE,
        AUTHORIZATION,
        axum::http::HeaderName::from_static(HEADER_REQUEST_ID),
    ];

    if state.settings.cors_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let origins: Vec<HeaderValue> = state
        .settings
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
}
