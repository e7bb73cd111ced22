//! Application bootstrap wiring.
//!
//! Resolves settings, connects the store, assembles the service graph, and
//! spawns the background sweepers before handing control to the HTTP
//! server. Shutdown is cooperative: ctrl-c cancels the root token, which
//! every in-flight device operation inherits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::settings::ServerSettings;
use shelman_api::{ApiServer, ApiSettings, ApiState};
use shelman_config::ConfigurationService;
use shelman_data::{Store, devices};
use shelman_device::{DeviceClient, DeviceTokens, ReachabilityCache};
use shelman_events::{Event, EventBus};
use shelman_security::{MonitorConfig, SecurityState, ValidationConfig};
use shelman_telemetry::{LoggingConfig, Metrics, init_logging};

/// How often the bounded security maps are swept.
const SECURITY_SWEEP_INTERVAL: Duration = Duration::from_secs(300);
/// How often the metrics snapshot is refreshed and published.
const METRICS_PUBLISH_INTERVAL: Duration = Duration::from_secs(30);

/// Assemble and run the application until shutdown.
///
/// # Errors
///
/// Returns an error when settings are unusable, the store is unreachable,
/// or the server fails to bind.
pub(crate) async fn run_app() -> Result<()> {
    let settings = ServerSettings::from_env()?;
    init_logging(&LoggingConfig {
        level: &settings.log_level,
        ..LoggingConfig::default()
    })?;

    if settings.admin_token.is_none() {
        warn!("SHELMAN_ADMIN_TOKEN is not set; admin endpoints are unauthenticated");
    }

    let store = Store::connect(&settings.database_url)
        .await
        .context("failed to initialize the store")?;
    let client = DeviceClient::new().context("failed to build the device client")?;
    let shutdown = CancellationToken::new();
    let cache = Arc::new(ReachabilityCache::new());
    let tokens = Arc::new(DeviceTokens::new(shutdown.clone()));
    let events = EventBus::new();
    let metrics = Metrics::new().context("failed to register metrics collectors")?;

    let service = ConfigurationService::new(
        store.clone(),
        client,
        Arc::clone(&cache),
        Arc::clone(&tokens),
        events.clone(),
    );

    let security = SecurityState::new(
        events.clone(),
        settings.internal_networks.clone(),
        settings.rate_limits,
        MonitorConfig::default(),
        ValidationConfig::default(),
    );

    let state = Arc::new(ApiState::new(
        service,
        security.clone(),
        metrics.clone(),
        events.clone(),
        ApiSettings {
            admin_token: settings.admin_token.clone(),
            max_body_bytes: settings.max_body_bytes,
            request_timeout: settings.request_timeout,
            cors_origins: settings.cors_origins.clone(),
        },
    ));

    spawn_security_sweeper(security, Arc::clone(&cache), shutdown.clone());
    spawn_metrics_publisher(
        store,
        Arc::clone(&cache),
        events,
        metrics,
        shutdown.clone(),
    );

    let server = ApiServer::new(state);
    let server_shutdown = shutdown.clone();
    let serve = server.serve(settings.bind_addr, async move {
        server_shutdown.cancelled().await;
    });

    tokio::select! {
        result = serve => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    }
    Ok(())
}

/// Periodic eviction over every bounded in-memory map.
fn spawn_security_sweeper(
    security: SecurityState,
    cache: Arc<ReachabilityCache>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SECURITY_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    security.sweep();
                    cache.sweep();
                }
            }
        }
    });
}

/// Refresh fleet gauges from the store and publish a snapshot for WebSocket
/// subscribers.
fn spawn_metrics_publisher(
    store: Store,
    cache: Arc<ReachabilityCache>,
    events: EventBus,
    metrics: Metrics,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(METRICS_PUBLISH_INTERVAL);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match devices::all_device_ids(store.pool()).await {
                        Ok(ids) => metrics
                            .set_devices_total(i64::try_from(ids.len()).unwrap_or(i64::MAX)),
                        Err(err) => warn!(error = %err, "device count refresh failed"),
                    }
                    match devices::list_pending_devices(store.pool()).await {
                        Ok(pending) => metrics.set_devices_pending_config(
                            i64::try_from(pending.len()).unwrap_or(i64::MAX),
                        ),
                        Err(err) => warn!(error = %err, "pending count refresh failed"),
                    }
                    metrics.set_devices_online(
                        i64::try_from(cache.online_count()).unwrap_or(i64::MAX),
                    );

                    let snapshot = metrics.snapshot();
                    events.publish(Event::MetricsUpdate {
                        snapshot: serde_json::to_value(&snapshot).unwrap_or_default(),
                    });
                }
            }
        }
    });
}
