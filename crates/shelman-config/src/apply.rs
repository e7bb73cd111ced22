//! Apply, verify, and drift workflows.
//!
//! # Design
//! - Apply pushes the cached desired configuration through the right
//!   converter and transport; per-section rejections are part of the result,
//!   not errors. Partial success is a first-class outcome.
//! - Verify reads the device back, persists the snapshot as the imported
//!   configuration, and updates `config_applied` from the comparison rules.
//! - Between a reboot and its verification the device stays pending; only
//!   the final verify moves the flag.

use serde::Serialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::error::{ConfigError, Result};
use crate::service::{ConfigurationService, OpContext};
use shelman_data::devices;
use shelman_model::{ConfigDifference, DeviceConfiguration, compare, has_errors};
use shelman_vendor::{Generation, from_api, to_api};

/// How long to wait between availability probes after a reboot.
const REBOOT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How many probes to attempt before giving up on a rebooting device.
const REBOOT_POLL_ATTEMPTS: u32 = 15;

/// Outcome of pushing a configuration to a device.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    /// Whether every section was accepted.
    pub success: bool,
    /// Sections the device accepted.
    pub applied_count: usize,
    /// Sections the device rejected.
    pub failed_count: usize,
    /// Rejection details.
    pub failures: Vec<ApplyFailure>,
    /// Whether a reboot is needed for the changes to take effect.
    pub requires_reboot: bool,
    /// Non-fatal notes for the operator.
    pub warnings: Vec<String>,
}

/// One rejected section.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    /// Section label.
    pub section: String,
    /// Device-reported detail.
    pub detail: String,
}

/// Outcome of comparing the device against its desired configuration.
#[derive(Debug, Clone, Serialize)]
pub struct VerifyResult {
    /// Whether no error-severity difference was found.
    #[serde(rename = "match")]
    pub matches: bool,
    /// All differences, including accepted warnings.
    pub differences: Vec<ConfigDifference>,
}

/// Combined result of `ApplyAndVerify`.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyAndVerifyResult {
    /// The apply outcome.
    pub apply: ApplyResult,
    /// The verification outcome.
    pub verify: VerifyResult,
}

/// One device's slot in a bulk apply.
#[derive(Debug, Clone, Serialize)]
pub struct BulkApplyEntry {
    /// Device id.
    pub device_id: i64,
    /// Whether the apply ran and fully succeeded.
    pub success: bool,
    /// The apply outcome when the device was reachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apply: Option<ApplyResult>,
    /// The failure when it was not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Configuration lifecycle summary for one device.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigStatus {
    /// Device id.
    pub device_id: i64,
    /// Whether the last verify matched.
    pub config_applied: bool,
    /// Whether a desired configuration has been computed.
    pub has_desired: bool,
    /// Whether the device has ever been read back.
    pub has_imported: bool,
}

impl ConfigurationService {
    /// Push the desired configuration to the device.
    #[instrument(name = "config.apply", skip(self, ctx))]
    pub async fn apply_config(&self, ctx: &OpContext, device_id: i64) -> Result<ApplyResult> {
        let row = self.get_device(device_id).await?;
        self.fail_fast_if_offline(device_id)?;

        let desired = match &row.desired_config {
            Some(tree) => DeviceConfiguration::from_tree(tree.clone())?,
            None => self.desired_config(device_id).await?.config,
        };
        let generation = Generation::from_number(row.generation)?;
        let raw = to_api(generation, &desired, &row.model)?;
        let target = self.target_for(&row)?;
        let token = self.token_for(device_id);

        let outcome = self.observe(
            device_id,
            self.client().put_settings(&target, &raw, &token).await,
        )?;

        let applied_count = outcome
            .sections
            .iter()
            .filter(|section| section.success)
            .count();
        let failures: Vec<ApplyFailure> = outcome
            .sections
            .iter()
            .filter(|section| !section.success)
            .map(|section| ApplyFailure {
                section: section.section.clone(),
                detail: section.detail.clone().unwrap_or_default(),
            })
            .collect();
        let requires_reboot = outcome.restart_required || needs_reboot(&desired);

        let mut warnings = Vec::new();
        if requires_reboot {
            warnings.push("device reboot required for some changes to take effect".to_string());
        }
        if !failures.is_empty() && applied_count > 0 {
            warnings.push(format!(
                "partial apply: {} of {} sections rejected",
                failures.len(),
                applied_count + failures.len()
            ));
        }

        let result = ApplyResult {
            success: failures.is_empty(),
            applied_count,
            failed_count: failures.len(),
            failures,
            requires_reboot,
            warnings,
        };

        let mut tx = self.store().begin().await?;
        devices::touch_last_seen(&mut *tx, device_id).await?;
        self.audit(
            &mut tx,
            ctx,
            "config.apply",
            "device",
            device_id,
            Some(json!({
                "applied": result.applied_count,
                "failed": result.failed_count,
                "requires_reboot": result.requires_reboot,
            })),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "config.apply.commit",
                source,
            })?;

        info!(
            device_id,
            applied = result.applied_count,
            failed = result.failed_count,
            "configuration apply finished"
        );
        Ok(result)
    }

    /// Read the device back, persist the snapshot, and reconcile the applied
    /// flag.
    #[instrument(name = "config.verify", skip(self, ctx))]
    pub async fn verify_config(&self, ctx: &OpContext, device_id: i64) -> Result<VerifyResult> {
        let row = self.get_device(device_id).await?;
        self.fail_fast_if_offline(device_id)?;
        let generation = Generation::from_number(row.generation)?;
        let target = self.target_for(&row)?;
        let token = self.token_for(device_id);

        let raw = self.observe(
            device_id,
            self.client().get_settings(&target, &token).await,
        )?;
        let imported = from_api(generation, &raw, &row.model)?;

        let desired = row
            .desired_config
            .clone()
            .map(DeviceConfiguration::from_tree)
            .transpose()?
            .unwrap_or_default();
        let differences = compare(&desired, &imported)?;
        let matches = !has_errors(&differences);

        let mut tx = self.store().begin().await?;
        devices::set_imported_config(&mut *tx, device_id, &imported.to_tree()?).await?;
        devices::set_config_applied(&mut *tx, device_id, matches).await?;
        self.audit(
            &mut tx,
            ctx,
            "config.verify",
            "device",
            device_id,
            Some(json!({"match": matches, "differences": differences.len()})),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "config.verify.commit",
                source,
            })?;

        self.events().publish(shelman_events::Event::DeviceEvent {
            device_id,
            kind: if matches {
                shelman_events::DeviceEventKind::ConfigApplied
            } else {
                shelman_events::DeviceEventKind::ConfigDrifted
            },
            detail: (!matches).then(|| format!("{} difference(s)", differences.len())),
        });

        Ok(VerifyResult {
            matches,
            differences,
        })
    }

    /// Apply, then immediately verify.
    pub async fn apply_and_verify(
        &self,
        ctx: &OpContext,
        device_id: i64,
    ) -> Result<ApplyAndVerifyResult> {
        let apply = self.apply_config(ctx, device_id).await?;
        let verify = self.verify_config(ctx, device_id).await?;
        Ok(ApplyAndVerifyResult { apply, verify })
    }

    /// Reboot the device, wait for it to come back, then verify. The device
    /// remains pending for the whole window; only the final verify can mark
    /// it applied.
    #[instrument(name = "config.reboot_and_verify", skip(self, ctx))]
    pub async fn reboot_and_verify(
        &self,
        ctx: &OpContext,
        device_id: i64,
    ) -> Result<VerifyResult> {
        let row = self.get_device(device_id).await?;
        let target = self.target_for(&row)?;
        let token = self.token_for(device_id);

        self.observe(device_id, self.client().reboot(&target, &token).await)?;
        info!(device_id, "device rebooting; polling for availability");

        let mut last_error = None;
        for _ in 0..REBOOT_POLL_ATTEMPTS {
            tokio::time::sleep(REBOOT_POLL_INTERVAL).await;
            match self.client().get_status(&target, &token).await {
                Ok(_) => {
                    self.cache().record_success(device_id);
                    last_error = None;
                    break;
                }
                Err(err) => last_error = Some(err),
            }
        }
        if let Some(err) = last_error {
            warn!(device_id, error = %err, "device did not come back after reboot");
            self.cache().record_failure(device_id);
            return Err(ConfigError::Device(err));
        }

        self.verify_config(ctx, device_id).await
    }

    /// Apply to many devices; each entry reports independently.
    pub async fn apply_bulk(
        &self,
        ctx: &OpContext,
        device_ids: Vec<i64>,
    ) -> Result<Vec<BulkApplyEntry>> {
        let mut entries = Vec::with_capacity(device_ids.len());
        for device_id in device_ids {
            match self.apply_config(ctx, device_id).await {
                Ok(apply) => entries.push(BulkApplyEntry {
                    device_id,
                    success: apply.success,
                    apply: Some(apply),
                    error: None,
                }),
                Err(err) => entries.push(BulkApplyEntry {
                    device_id,
                    success: false,
                    apply: None,
                    error: Some(err.to_string()),
                }),
            }
        }
        Ok(entries)
    }

    /// Compare the stored desired and imported documents without touching
    /// the device.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoImportedConfig`] when the device has never
    /// been read back; surfaced to clients as not-found, never as a server
    /// fault.
    pub async fn drift_report(&self, device_id: i64) -> Result<VerifyResult> {
        let row = self.get_device(device_id).await?;
        let Some(imported_tree) = row.imported_config else {
            return Err(ConfigError::NoImportedConfig { device_id });
        };
        let imported = DeviceConfiguration::from_tree(imported_tree)?;
        let desired = row
            .desired_config
            .map(DeviceConfiguration::from_tree)
            .transpose()?
            .unwrap_or_default();
        let differences = compare(&desired, &imported)?;
        Ok(VerifyResult {
            matches: !has_errors(&differences),
            differences,
        })
    }

    /// Configuration lifecycle summary for one device.
    pub async fn config_status(&self, device_id: i64) -> Result<ConfigStatus> {
        let row = self.get_device(device_id).await?;
        Ok(ConfigStatus {
            device_id,
            config_applied: row.config_applied,
            has_desired: row.desired_config.is_some(),
            has_imported: row.imported_config.is_some(),
        })
    }
}

/// Heuristic for changes that only take effect after a restart: WiFi
/// credentials, authentication enablement, and profile switches.
fn needs_reboot(desired: &DeviceConfiguration) -> bool {
    if let Some(network) = &desired.network {
        let station_changed = [&network.wifi_sta, &network.wifi_sta1]
            .into_iter()
            .flatten()
            .any(|sta| sta.ssid.is_some() || sta.password.is_some() || sta.enabled.is_some());
        let ap_changed = network
            .wifi_ap
            .as_ref()
            .is_some_and(|ap| ap.ssid.is_some() || ap.password.is_some() || ap.enabled.is_some());
        if station_changed || ap_changed {
            return true;
        }
    }
    if let Some(auth) = &desired.auth {
        if auth.enabled.is_some() || auth.password.is_some() {
            return true;
        }
    }
    desired
        .system
        .as_ref()
        .is_some_and(|system| system.device_profile.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelman_model::{AuthConfig, MqttConfig, NetworkConfig, SystemConfig, WifiStationConfig};

    #[test]
    fn wifi_credentials_trigger_the_reboot_heuristic() {
        let config = DeviceConfiguration {
            network: Some(NetworkConfig {
                wifi_sta: Some(WifiStationConfig {
                    ssid: Some("new-net".to_string()),
                    ..WifiStationConfig::default()
                }),
                ..NetworkConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        assert!(needs_reboot(&config));
    }

    #[test]
    fn auth_enablement_triggers_the_reboot_heuristic() {
        let config = DeviceConfiguration {
            auth: Some(AuthConfig {
                enabled: Some(true),
                ..AuthConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        assert!(needs_reboot(&config));
    }

    #[test]
    fn plain_mqtt_changes_do_not() {
        let config = DeviceConfiguration {
            mqtt: Some(MqttConfig {
                server: Some("broker.local:1883".to_string()),
                ..MqttConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        assert!(!needs_reboot(&config));
    }

    #[test]
    fn profile_switch_triggers_the_reboot_heuristic() {
        let config = DeviceConfiguration {
            system: Some(SystemConfig {
                device_profile: Some("cover".to_string()),
                ..SystemConfig::default()
            }),
            ..DeviceConfiguration::default()
        };
        assert!(needs_reboot(&config));
    }
}
