//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes a minimal set of counters/gauges relevant to fleet management;
//!   the same snapshot feeds the WebSocket `metrics_update` stream.

use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    device_requests_total: IntCounterVec,
    devices_total: IntGauge,
    devices_online: IntGauge,
    devices_pending_config: IntGauge,
    ws_clients: IntGauge,
    config_applies_total: IntCounterVec,
    rate_limit_throttled_total: IntCounter,
    security_alerts_total: IntCounterVec,
    blocked_ips: IntGauge,
}

/// Snapshot of selected gauges and counters for dashboard consumers.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Number of devices in the catalogue.
    pub devices_total: i64,
    /// Devices currently classified online by the reachability cache.
    pub devices_online: i64,
    /// Devices whose desired configuration has not been applied.
    pub devices_pending_config: i64,
    /// Connected WebSocket clients.
    pub ws_clients: i64,
    /// Requests rejected by the rate limiter since start.
    pub rate_limit_throttled_total: u64,
    /// Addresses currently on the block list.
    pub blocked_ips: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )?;
        let device_requests_total = IntCounterVec::new(
            Opts::new(
                "device_requests_total",
                "Outbound device HTTP calls by operation and outcome",
            ),
            &["op", "status"],
        )?;
        let devices_total =
            IntGauge::with_opts(Opts::new("devices_total", "Devices in the catalogue"))?;
        let devices_online = IntGauge::with_opts(Opts::new(
            "devices_online",
            "Devices currently classified online",
        ))?;
        let devices_pending_config = IntGauge::with_opts(Opts::new(
            "devices_pending_config",
            "Devices with an unapplied desired configuration",
        ))?;
        let ws_clients =
            IntGauge::with_opts(Opts::new("ws_clients", "Connected WebSocket clients"))?;
        let config_applies_total = IntCounterVec::new(
            Opts::new(
                "config_applies_total",
                "Configuration apply attempts by outcome",
            ),
            &["status"],
        )?;
        let rate_limit_throttled_total = IntCounter::with_opts(Opts::new(
            "rate_limit_throttled_total",
            "Requests rejected due to rate limiting",
        ))?;
        let security_alerts_total = IntCounterVec::new(
            Opts::new("security_alerts_total", "Security alerts by kind"),
            &["kind"],
        )?;
        let blocked_ips = IntGauge::with_opts(Opts::new(
            "blocked_ips",
            "Addresses currently on the block list",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(device_requests_total.clone()))?;
        registry.register(Box::new(devices_total.clone()))?;
        registry.register(Box::new(devices_online.clone()))?;
        registry.register(Box::new(devices_pending_config.clone()))?;
        registry.register(Box::new(ws_clients.clone()))?;
        registry.register(Box::new(config_applies_total.clone()))?;
        registry.register(Box::new(rate_limit_throttled_total.clone()))?;
        registry.register(Box::new(security_alerts_total.clone()))?;
        registry.register(Box::new(blocked_ips.clone()))?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                device_requests_total,
                devices_total,
                devices_online,
                devices_pending_config,
                ws_clients,
                config_applies_total,
                rate_limit_throttled_total,
                security_alerts_total,
                blocked_ips,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Increment the outbound device call counter.
    pub fn inc_device_request(&self, op: &str, status: &str) {
        self.inner
            .device_requests_total
            .with_label_values(&[op, status])
            .inc();
    }

    /// Set the catalogue size gauge.
    pub fn set_devices_total(&self, count: i64) {
        self.inner.devices_total.set(count);
    }

    /// Set the online device gauge.
    pub fn set_devices_online(&self, count: i64) {
        self.inner.devices_online.set(count);
    }

    /// Set the pending-configuration gauge.
    pub fn set_devices_pending_config(&self, count: i64) {
        self.inner.devices_pending_config.set(count);
    }

    /// Track a WebSocket client connecting.
    pub fn ws_client_connected(&self) {
        self.inner.ws_clients.inc();
    }

    /// Track a WebSocket client disconnecting.
    pub fn ws_client_disconnected(&self) {
        self.inner.ws_clients.dec();
    }

    /// Increment the apply counter with an outcome label.
    pub fn inc_config_apply(&self, status: &str) {
        self.inner
            .config_applies_total
            .with_label_values(&[status])
            .inc();
    }

    /// Increment the rate limiter throttle counter.
    pub fn inc_rate_limit_throttled(&self) {
        self.inner.rate_limit_throttled_total.inc();
    }

    /// Increment the security alert counter for a classification kind.
    pub fn inc_security_alert(&self, kind: &str) {
        self.inner
            .security_alerts_total
            .with_label_values(&[kind])
            .inc();
    }

    /// Set the blocked address gauge.
    pub fn set_blocked_ips(&self, count: i64) {
        self.inner.blocked_ips.set(count);
    }

    /// Render the metrics registry using the Prometheus text exposition
    /// format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .context("failed to encode Prometheus metrics")?;
        String::from_utf8(buffer).context("metrics output was not valid UTF-8")
    }

    /// Take a point-in-time snapshot of the most relevant gauges and
    /// counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            devices_total: self.inner.devices_total.get(),
            devices_online: self.inner.devices_online.get(),
            devices_pending_config: self.inner.devices_pending_config.get(),
            ws_clients: self.inner.ws_clients.get(),
            rate_limit_throttled_total: self.inner.rate_limit_throttled_total.get(),
            blocked_ips: self.inner.blocked_ips.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_values() {
        let metrics = Metrics::new().expect("metrics");
        metrics.set_devices_total(12);
        metrics.set_devices_online(9);
        metrics.ws_client_connected();
        metrics.inc_rate_limit_throttled();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.devices_total, 12);
        assert_eq!(snapshot.devices_online, 9);
        assert_eq!(snapshot.ws_clients, 1);
        assert_eq!(snapshot.rate_limit_throttled_total, 1);
    }

    #[test]
    fn render_produces_exposition_output() {
        let metrics = Metrics::new().expect("metrics");
        metrics.inc_http_request("/api/v1/devices", 200);
        let rendered = metrics.render().expect("render");
        assert!(rendered.contains("http_requests_total"));
    }
}
