//! Parallel device-detail fan-out.
//!
//! A detail fetch issues the status, energy, and settings reads in parallel,
//! each under its own deadline, and aggregates whatever arrived. Partial
//! results are first-class: every section reports independently. When the
//! reachability cache says the device is offline and the caller did not
//! force a read, the fetch returns immediately with no network I/O.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{DeviceClient, DeviceTarget};
use crate::error::DeviceError;
use crate::reachability::{ReachabilityCache, ReachabilityStatus};

/// Outcome of one section of a detail fetch.
#[derive(Debug, Clone)]
pub enum SectionResult {
    /// The section was fetched.
    Ok(Value),
    /// The section could not be fetched.
    Unavailable {
        /// Why the section is missing.
        reason: String,
    },
}

impl SectionResult {
    /// Whether the section carries data.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    fn offline() -> Self {
        Self::Unavailable {
            reason: "device offline (cached)".to_string(),
        }
    }
}

/// Aggregated result of a device-detail fetch.
#[derive(Debug, Clone)]
pub struct DeviceDetail {
    /// Whether the fetch was short-circuited by the offline cache.
    pub offline: bool,
    /// Live status section.
    pub status: SectionResult,
    /// Energy section.
    pub energy: SectionResult,
    /// Raw settings snapshot (vendor document bytes, JSON).
    pub settings: SectionResult,
}

/// Fetch status, energy, and settings for one device in parallel.
///
/// Reachability bookkeeping: any successful sub-call marks the device
/// online; a sub-call that timed out or failed at the transport level marks
/// it offline.
pub async fn fetch_detail(
    client: &DeviceClient,
    cache: &ReachabilityCache,
    target: &DeviceTarget,
    force: bool,
    token: &CancellationToken,
) -> DeviceDetail {
    if !force && cache.status(target.id) == ReachabilityStatus::Offline {
        debug!(device_id = target.id, "detail fetch short-circuited by offline cache");
        return DeviceDetail {
            offline: true,
            status: SectionResult::offline(),
            energy: SectionResult::offline(),
            settings: SectionResult::offline(),
        };
    }

    let (status, energy, settings) = tokio::join!(
        client.get_status(target, token),
        client.get_energy(target, token),
        async {
            let raw = client.get_settings(target, token).await?;
            serde_json::from_slice::<Value>(&raw).map_err(|err| DeviceError::Protocol {
                op: "settings",
                detail: err.to_string(),
            })
        },
    );

    let mut any_success = false;
    let mut any_offline = false;
    let mut section = |result: Result<Value, DeviceError>| match result {
        Ok(value) => {
            any_success = true;
            SectionResult::Ok(value)
        }
        Err(err) => {
            any_offline |= err.marks_offline();
            SectionResult::Unavailable {
                reason: err.to_string(),
            }
        }
    };

    let status = section(status);
    let energy = section(energy);
    let settings = section(settings);

    if any_success {
        cache.record_success(target.id);
    } else if any_offline {
        cache.record_failure(target.id);
    }

    DeviceDetail {
        offline: false,
        status,
        energy,
        settings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Timeouts;
    use httpmock::prelude::*;
    use shelman_vendor::Generation;
    use std::time::{Duration, Instant};

    fn tight_timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(500),
            read: Duration::from_millis(500),
            write: Duration::from_millis(500),
        }
    }

    fn target(host: String) -> DeviceTarget {
        DeviceTarget {
            id: 7,
            host,
            generation: Generation::Gen1,
            model: "SHPLG-S".to_string(),
        }
    }

    #[tokio::test]
    async fn cached_offline_device_fast_fails_without_io() {
        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let cache = ReachabilityCache::new();
        cache.record_failure(7);

        // An unroutable host proves no network I/O happens: the fetch would
        // otherwise burn the whole connect budget.
        let started = Instant::now();
        let detail = fetch_detail(
            &client,
            &cache,
            &target("192.0.2.1:9".to_string()),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert!(detail.offline);
        assert!(!detail.status.is_ok());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn force_bypasses_the_offline_cache() {
        let server = MockServer::start_async().await;
        for path in ["/status", "/meter/0", "/settings"] {
            server
                .mock_async(|when, then| {
                    when.method(GET).path(path);
                    then.status(200).json_body(serde_json::json!({}));
                })
                .await;
        }

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let cache = ReachabilityCache::new();
        cache.record_failure(7);

        let detail = fetch_detail(
            &client,
            &cache,
            &target(server.address().to_string()),
            true,
            &CancellationToken::new(),
        )
        .await;

        assert!(!detail.offline);
        assert!(detail.status.is_ok());
        assert_eq!(cache.status(7), ReachabilityStatus::Online);
    }

    #[tokio::test]
    async fn partial_results_report_per_section() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/status");
                then.status(200).json_body(serde_json::json!({"ok": true}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/settings");
                then.status(200).json_body(serde_json::json!({"name": "x"}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/meter/0");
                then.status(500).body("boom");
            })
            .await;

        let client = DeviceClient::with_timeouts(tight_timeouts()).expect("client");
        let cache = ReachabilityCache::new();

        let detail = fetch_detail(
            &client,
            &cache,
            &target(server.address().to_string()),
            false,
            &CancellationToken::new(),
        )
        .await;

        assert!(detail.status.is_ok());
        assert!(detail.settings.is_ok());
        assert!(!detail.energy.is_ok());
        // The device answered, so it stays online despite the failed section.
        assert_eq!(cache.status(7), ReachabilityStatus::Online);
    }
}
