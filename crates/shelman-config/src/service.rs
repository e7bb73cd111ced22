//! Device, template, assignment, and override operations.
//!
//! # Design
//! - The store is the single source of truth; the service recomputes each
//!   affected device's `desired_config` inside the same transaction as the
//!   mutation that invalidated it.
//! - Layer order for a device: global templates (creation order), then
//!   device-type templates matching the model, then explicitly assigned
//!   templates in declared order, then the device override.
//! - Source attribution uses the level names surfaced to operators:
//!   `global`, `device-type`, `template:<name>`, `device-override`.

use std::sync::Arc;

use serde_json::json;
use sqlx::{Postgres, Transaction};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{ConfigError, Result};
use shelman_data::{
    DeviceQuery, DevicePatch, DeviceRow, NewDevice, NewTemplate, Store, TagCount, TemplateRow,
    TemplateScope, TemplateUpdate, audit, devices, tags, templates,
};
use shelman_device::{
    DeviceClient, DeviceDetail, DeviceTokens, ReachabilityCache, ReachabilityStatus, SwitchAction,
    fetch_detail,
};
use shelman_events::{DeviceEventKind, Event, EventBus};
use shelman_model::{
    ConfigLayer, DeviceConfiguration, SourceMap, ValidationMode, apply_patch, merge, validate,
};
use shelman_vendor::{DeviceCapabilities, Generation};

/// Who is performing an operation, threaded into the audit trail.
#[derive(Debug, Clone)]
pub struct OpContext {
    /// Acting principal.
    pub actor: String,
    /// Request id assigned by the HTTP layer, when present.
    pub request_id: Option<String>,
}

impl OpContext {
    /// Context for operator-initiated actions.
    #[must_use]
    pub fn new(actor: impl Into<String>, request_id: Option<String>) -> Self {
        Self {
            actor: actor.into(),
            request_id,
        }
    }

    /// Context for internally triggered actions (sweepers, pollers).
    #[must_use]
    pub fn system() -> Self {
        Self {
            actor: "system".to_string(),
            request_id: None,
        }
    }
}

/// Fields accepted when creating a device.
#[derive(Debug, Clone)]
pub struct NewDeviceSpec {
    /// Hardware MAC address in any common notation.
    pub mac: String,
    /// Current IP address, when known.
    pub ip: Option<String>,
    /// Operator-assigned name.
    pub name: Option<String>,
    /// Vendor model code.
    pub model: String,
    /// Vendor API generation (1 or 2).
    pub generation: i64,
}

/// Fields accepted when creating a template.
#[derive(Debug, Clone)]
pub struct NewTemplateSpec {
    /// Unique template name.
    pub name: String,
    /// Operator-facing description.
    pub description: Option<String>,
    /// Attachment scope.
    pub scope: TemplateScope,
    /// Model code; required iff scope is `device_type`.
    pub device_type: Option<String>,
    /// Normalized partial configuration.
    pub config: DeviceConfiguration,
}

/// Fields accepted when updating a template.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdateSpec {
    /// New name, when present.
    pub name: Option<String>,
    /// New description, when present.
    pub description: Option<String>,
    /// New configuration document, when present.
    pub config: Option<DeviceConfiguration>,
}

/// A device's merged configuration with per-field source attribution.
#[derive(Debug, Clone)]
pub struct DesiredConfig {
    /// The merged configuration.
    pub config: DeviceConfiguration,
    /// Which layer set each field.
    pub sources: SourceMap,
}

/// Control actions accepted for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    /// Energize the first relay.
    On,
    /// De-energize the first relay.
    Off,
    /// Reboot the device.
    Restart,
}

/// The orchestrator for catalogue and configuration state.
#[derive(Clone)]
pub struct ConfigurationService {
    store: Store,
    client: DeviceClient,
    cache: Arc<ReachabilityCache>,
    tokens: Arc<DeviceTokens>,
    events: EventBus,
}

impl ConfigurationService {
    /// Wire the service from its collaborators.
    #[must_use]
    pub fn new(
        store: Store,
        client: DeviceClient,
        cache: Arc<ReachabilityCache>,
        tokens: Arc<DeviceTokens>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            client,
            cache,
            tokens,
            events,
        }
    }

    /// Access the underlying store.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Access the event bus.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Access the reachability cache.
    #[must_use]
    pub fn cache(&self) -> &ReachabilityCache {
        &self.cache
    }

    pub(crate) const fn client(&self) -> &DeviceClient {
        &self.client
    }

    pub(crate) fn token_for(&self, device_id: i64) -> CancellationToken {
        self.tokens.token_for(device_id)
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Create a device and compute its initial desired configuration from
    /// the implicit layers. New devices start in the pending state.
    #[instrument(name = "config.create_device", skip(self, ctx, spec), fields(mac = %spec.mac))]
    pub async fn create_device(&self, ctx: &OpContext, spec: NewDeviceSpec) -> Result<DeviceRow> {
        Generation::from_number(spec.generation)?;
        let mac = canonical_mac(&spec.mac);

        let mut tx = self.store.begin().await?;
        let row = devices::insert_device(
            &mut *tx,
            &NewDevice {
                mac,
                ip: spec.ip,
                name: spec.name,
                model: spec.model,
                generation: spec.generation,
            },
        )
        .await
        .map_err(|err| ConfigError::from_unique(err, "a device with this MAC already exists"))?;

        self.recompute_in_tx(&mut tx, row.id).await?;
        self.audit(&mut tx, ctx, "device.create", "device", row.id, None)
            .await?;
        let row = self.require_device_tx(&mut tx, row.id).await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.create.commit",
                source,
            })?;

        info!(device_id = row.id, "device created");
        self.events.publish(Event::DeviceEvent {
            device_id: row.id,
            kind: DeviceEventKind::Created,
            detail: None,
        });
        Ok(row)
    }

    /// Fetch one device.
    pub async fn get_device(&self, id: i64) -> Result<DeviceRow> {
        devices::fetch_device(self.store.pool(), id)
            .await?
            .ok_or(ConfigError::DeviceNotFound { id })
    }

    /// List devices with the unpaginated total.
    pub async fn list_devices(&self, query: &DeviceQuery) -> Result<(Vec<DeviceRow>, i64)> {
        Ok(devices::list_devices(self.store.pool(), query).await?)
    }

    /// Apply a partial update; absent fields keep their stored values, so a
    /// body without `mac` or `ip` can never zero them.
    #[instrument(name = "config.update_device", skip(self, ctx, patch))]
    pub async fn update_device(
        &self,
        ctx: &OpContext,
        id: i64,
        mut patch: DevicePatch,
    ) -> Result<DeviceRow> {
        if let Some(generation) = patch.generation {
            Generation::from_number(generation)?;
        }
        if let Some(mac) = &patch.mac {
            patch.mac = Some(canonical_mac(mac));
        }

        let mut tx = self.store.begin().await?;
        let row = devices::update_device(&mut tx, id, &patch)
            .await
            .map_err(|err| match err {
                shelman_data::DataError::NotFound { .. } => ConfigError::DeviceNotFound { id },
                other => ConfigError::from_unique(other, "a device with this MAC already exists"),
            })?;
        self.audit(&mut tx, ctx, "device.update", "device", id, None)
            .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.update.commit",
                source,
            })?;

        self.events.publish(Event::DeviceEvent {
            device_id: id,
            kind: DeviceEventKind::Updated,
            detail: None,
        });
        Ok(row)
    }

    /// Delete a device, cancelling its in-flight I/O first so no late reply
    /// outlives the row.
    #[instrument(name = "config.delete_device", skip(self, ctx))]
    pub async fn delete_device(&self, ctx: &OpContext, id: i64) -> Result<()> {
        self.tokens.cancel(id);

        let mut tx = self.store.begin().await?;
        let deleted = devices::delete_device(&mut *tx, id).await?;
        if !deleted {
            return Err(ConfigError::DeviceNotFound { id });
        }
        self.audit(&mut tx, ctx, "device.delete", "device", id, None)
            .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.delete.commit",
                source,
            })?;

        self.cache.forget(id);
        info!(device_id = id, "device deleted");
        self.events.publish(Event::DeviceEvent {
            device_id: id,
            kind: DeviceEventKind::Deleted,
            detail: None,
        });
        Ok(())
    }

    /// Parallel detail fetch (status, energy, settings) with offline
    /// fast-fail. A device without a known address reports every section
    /// unavailable instead of failing the whole request.
    pub async fn fetch_device_detail(
        &self,
        id: i64,
        force: bool,
    ) -> Result<(DeviceRow, DeviceDetail)> {
        let row = self.get_device(id).await?;
        let target = match self.target_for(&row) {
            Ok(target) => target,
            Err(ConfigError::NoAddress { .. }) => {
                let unaddressed = || shelman_device::SectionResult::Unavailable {
                    reason: "device has no known IP address".to_string(),
                };
                return Ok((
                    row,
                    DeviceDetail {
                        offline: true,
                        status: unaddressed(),
                        energy: unaddressed(),
                        settings: unaddressed(),
                    },
                ));
            }
            Err(err) => return Err(err),
        };
        let token = self.token_for(id);
        let detail = fetch_detail(&self.client, &self.cache, &target, force, &token).await;
        Ok((row, detail))
    }

    /// Live status for one device, fast-failing when cached offline.
    pub async fn device_status(&self, id: i64) -> Result<serde_json::Value> {
        let row = self.get_device(id).await?;
        self.fail_fast_if_offline(id)?;
        let target = self.target_for(&row)?;
        let token = self.token_for(id);
        let status = self.observe(id, self.client.get_status(&target, &token).await)?;
        Ok(status)
    }

    /// Live energy readings for one device, fast-failing when cached
    /// offline. Meterless hardware is a client error, not a device fault.
    pub async fn device_energy(&self, id: i64) -> Result<serde_json::Value> {
        let row = self.get_device(id).await?;
        if DeviceCapabilities::for_model(&row.model).meters == 0 {
            return Err(ConfigError::Unsupported {
                device_id: id,
                capability: "power meter",
            });
        }
        self.fail_fast_if_offline(id)?;
        let target = self.target_for(&row)?;
        let token = self.token_for(id);
        let energy = self.observe(id, self.client.get_energy(&target, &token).await)?;
        Ok(energy)
    }

    /// Drive a device relay or reboot it.
    #[instrument(name = "config.control", skip(self, ctx))]
    pub async fn control_device(
        &self,
        ctx: &OpContext,
        id: i64,
        action: DeviceAction,
    ) -> Result<()> {
        let row = self.get_device(id).await?;
        if action != DeviceAction::Restart
            && DeviceCapabilities::for_model(&row.model).switches == 0
        {
            return Err(ConfigError::Unsupported {
                device_id: id,
                capability: "switch channel",
            });
        }
        self.fail_fast_if_offline(id)?;
        let target = self.target_for(&row)?;
        let token = self.token_for(id);

        let result = match action {
            DeviceAction::On => self.client.set_switch(&target, 0, SwitchAction::On, &token).await,
            DeviceAction::Off => {
                self.client.set_switch(&target, 0, SwitchAction::Off, &token).await
            }
            DeviceAction::Restart => self.client.reboot(&target, &token).await,
        };
        self.observe(id, result)?;

        let mut tx = self.store.begin().await?;
        devices::touch_last_seen(&mut *tx, id).await?;
        self.audit(
            &mut tx,
            ctx,
            "device.control",
            "device",
            id,
            Some(json!({"action": format!("{action:?}").to_lowercase()})),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.control.commit",
                source,
            })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Templates
    // ------------------------------------------------------------------

    /// Create a template. No recompute happens here: nothing references the
    /// template yet, and implicit (global/device-type) layers pick it up on
    /// the next recompute of each device.
    #[instrument(name = "config.create_template", skip(self, ctx, spec), fields(name = %spec.name))]
    pub async fn create_template(
        &self,
        ctx: &OpContext,
        spec: NewTemplateSpec,
    ) -> Result<TemplateRow> {
        check_scope_consistency(spec.scope, spec.device_type.as_deref())?;
        let issues = validate(&spec.config, ValidationMode::Layer);
        if !issues.is_empty() {
            return Err(ConfigError::ValidationFailed { issues });
        }

        let mut tx = self.store.begin().await?;
        let row = templates::insert_template(
            &mut *tx,
            &NewTemplate {
                name: spec.name,
                description: spec.description,
                scope: spec.scope,
                device_type: spec.device_type,
                config: spec.config.to_tree()?,
            },
        )
        .await
        .map_err(|err| ConfigError::from_unique(err, "a template with this name already exists"))?;
        self.audit(&mut tx, ctx, "template.create", "template", row.id, None)
            .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "template.create.commit",
                source,
            })?;
        Ok(row)
    }

    /// Fetch one template.
    pub async fn get_template(&self, id: i64) -> Result<TemplateRow> {
        templates::fetch_template(self.store.pool(), id)
            .await?
            .ok_or(ConfigError::TemplateNotFound { id })
    }

    /// List templates, optionally filtered by scope.
    pub async fn list_templates(&self, scope: Option<TemplateScope>) -> Result<Vec<TemplateRow>> {
        Ok(templates::list_templates(self.store.pool(), scope).await?)
    }

    /// Update a template and recompute every affected device atomically.
    /// Readers never observe the new template text with stale device state.
    #[instrument(name = "config.update_template", skip(self, ctx, spec))]
    pub async fn update_template(
        &self,
        ctx: &OpContext,
        id: i64,
        spec: TemplateUpdateSpec,
    ) -> Result<TemplateRow> {
        let config_tree = match &spec.config {
            Some(config) => {
                let issues = validate(config, ValidationMode::Layer);
                if !issues.is_empty() {
                    return Err(ConfigError::ValidationFailed { issues });
                }
                Some(config.to_tree()?)
            }
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let row = templates::update_template(
            &mut *tx,
            id,
            &TemplateUpdate {
                name: spec.name,
                description: spec.description,
                config: config_tree,
            },
        )
        .await
        .map_err(|err| match err {
            shelman_data::DataError::NotFound { .. } => ConfigError::TemplateNotFound { id },
            other => ConfigError::from_unique(other, "a template with this name already exists"),
        })?;

        let affected = self.affected_devices(&mut tx, &row).await?;
        for device_id in &affected {
            self.recompute_in_tx(&mut tx, *device_id).await?;
        }
        self.audit(
            &mut tx,
            ctx,
            "template.update",
            "template",
            id,
            Some(json!({"recomputed_devices": affected.len()})),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "template.update.commit",
                source,
            })?;

        info!(template_id = id, devices = affected.len(), "template updated");
        Ok(row)
    }

    /// Delete a template; refused while any device's assignment references
    /// it.
    #[instrument(name = "config.delete_template", skip(self, ctx))]
    pub async fn delete_template(&self, ctx: &OpContext, id: i64) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let referencing = devices::devices_referencing_template(&mut *tx, id).await?;
        if !referencing.is_empty() {
            return Err(ConfigError::TemplateInUse {
                id,
                device_count: referencing.len(),
            });
        }
        let deleted = templates::delete_template(&mut *tx, id).await?;
        if !deleted {
            return Err(ConfigError::TemplateNotFound { id });
        }
        self.audit(&mut tx, ctx, "template.delete", "template", id, None)
            .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "template.delete.commit",
                source,
            })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Templates currently assigned to a device, in priority order.
    pub async fn device_templates(&self, device_id: i64) -> Result<Vec<TemplateRow>> {
        let row = self.get_device(device_id).await?;
        Ok(templates::fetch_templates_ordered(self.store.pool(), &row.template_ids).await?)
    }

    /// Replace the ordered template assignment.
    #[instrument(name = "config.set_templates", skip(self, ctx, template_ids))]
    pub async fn set_templates(
        &self,
        ctx: &OpContext,
        device_id: i64,
        template_ids: Vec<i64>,
    ) -> Result<DeviceRow> {
        let device = self.get_device(device_id).await?;

        let mut tx = self.store.begin().await?;
        let rows = templates::fetch_templates_ordered(&mut *tx, &template_ids)
            .await
            .map_err(|err| match err {
                shelman_data::DataError::NotFound { id, .. } => {
                    ConfigError::TemplateNotFound { id }
                }
                other => ConfigError::Data(other),
            })?;
        for template in &rows {
            check_assignable(template, &device)?;
        }

        devices::set_template_ids(&mut *tx, device_id, &template_ids).await?;
        self.recompute_in_tx(&mut tx, device_id).await?;
        self.audit(
            &mut tx,
            ctx,
            "device.set_templates",
            "device",
            device_id,
            Some(json!({"template_ids": template_ids})),
        )
        .await?;
        let row = self.require_device_tx(&mut tx, device_id).await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.set_templates.commit",
                source,
            })?;
        Ok(row)
    }

    /// Insert one template into the assignment at `position` (appended when
    /// absent).
    pub async fn add_template(
        &self,
        ctx: &OpContext,
        device_id: i64,
        template_id: i64,
        position: Option<usize>,
    ) -> Result<DeviceRow> {
        let device = self.get_device(device_id).await?;
        let mut ids = device.template_ids.clone();
        ids.retain(|existing| *existing != template_id);
        let index = position.unwrap_or(ids.len()).min(ids.len());
        ids.insert(index, template_id);
        self.set_templates(ctx, device_id, ids).await
    }

    /// Remove one template from the assignment.
    pub async fn remove_template(
        &self,
        ctx: &OpContext,
        device_id: i64,
        template_id: i64,
    ) -> Result<DeviceRow> {
        let device = self.get_device(device_id).await?;
        if !device.template_ids.contains(&template_id) {
            return Err(ConfigError::TemplateNotFound { id: template_id });
        }
        let ids: Vec<i64> = device
            .template_ids
            .into_iter()
            .filter(|existing| *existing != template_id)
            .collect();
        self.set_templates(ctx, device_id, ids).await
    }

    // ------------------------------------------------------------------
    // Overrides
    // ------------------------------------------------------------------

    /// The device's override document, when present.
    pub async fn get_overrides(&self, device_id: i64) -> Result<Option<DeviceConfiguration>> {
        let row = self.get_device(device_id).await?;
        row.overrides
            .map(DeviceConfiguration::from_tree)
            .transpose()
            .map_err(ConfigError::from)
    }

    /// Replace the override document.
    pub async fn put_overrides(
        &self,
        ctx: &OpContext,
        device_id: i64,
        config: DeviceConfiguration,
    ) -> Result<DeviceRow> {
        let issues = validate(&config, ValidationMode::Layer);
        if !issues.is_empty() {
            return Err(ConfigError::ValidationFailed { issues });
        }
        self.write_overrides(ctx, device_id, Some(config), "device.put_overrides")
            .await
    }

    /// Deep-merge a partial document into the existing override. Patching
    /// twice with the same body is a no-op.
    pub async fn patch_overrides(
        &self,
        ctx: &OpContext,
        device_id: i64,
        patch: DeviceConfiguration,
    ) -> Result<DeviceRow> {
        let current = self.get_overrides(device_id).await?.unwrap_or_default();
        let merged = apply_patch(&current, &patch)?;
        let issues = validate(&merged, ValidationMode::Layer);
        if !issues.is_empty() {
            return Err(ConfigError::ValidationFailed { issues });
        }
        self.write_overrides(ctx, device_id, Some(merged), "device.patch_overrides")
            .await
    }

    /// Clear the override document.
    pub async fn clear_overrides(&self, ctx: &OpContext, device_id: i64) -> Result<DeviceRow> {
        self.write_overrides(ctx, device_id, None, "device.clear_overrides")
            .await
    }

    async fn write_overrides(
        &self,
        ctx: &OpContext,
        device_id: i64,
        overrides: Option<DeviceConfiguration>,
        action: &str,
    ) -> Result<DeviceRow> {
        self.get_device(device_id).await?;
        let tree = overrides.map(|config| config.to_tree()).transpose()?;

        let mut tx = self.store.begin().await?;
        devices::set_overrides(&mut *tx, device_id, tree.as_ref()).await?;
        self.recompute_in_tx(&mut tx, device_id).await?;
        self.audit(&mut tx, ctx, action, "device", device_id, None)
            .await?;
        let row = self.require_device_tx(&mut tx, device_id).await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.overrides.commit",
                source,
            })?;
        Ok(row)
    }

    // ------------------------------------------------------------------
    // Desired configuration
    // ------------------------------------------------------------------

    /// The cached merged configuration plus a recomputed source map (the
    /// map is derived, never persisted).
    pub async fn desired_config(&self, device_id: i64) -> Result<DesiredConfig> {
        let row = self.get_device(device_id).await?;
        let implicit = templates::list_templates_for_model(self.store.pool(), &row.model).await?;
        let assigned =
            templates::fetch_templates_ordered(self.store.pool(), &row.template_ids).await?;
        let layers = build_layers(&implicit, &assigned, row.overrides.as_ref())?;
        let outcome = merge(&layers)?;

        let config = match row.desired_config {
            Some(tree) => DeviceConfiguration::from_tree(tree)?,
            None => {
                let mut merged = outcome.config.clone();
                DeviceCapabilities::for_model(&row.model).clamp(&mut merged);
                merged
            }
        };
        Ok(DesiredConfig {
            config,
            sources: outcome.sources,
        })
    }

    /// Devices whose desired configuration is not verified as applied.
    pub async fn pending_devices(&self) -> Result<Vec<DeviceRow>> {
        Ok(devices::list_pending_devices(self.store.pool()).await?)
    }

    /// Recompute one device inside an open transaction and persist the
    /// result with `config_applied = false`.
    pub(crate) async fn recompute_in_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        device_id: i64,
    ) -> Result<()> {
        let row = devices::fetch_device(&mut **tx, device_id)
            .await?
            .ok_or(ConfigError::DeviceNotFound { id: device_id })?;
        let implicit = templates::list_templates_for_model(&mut **tx, &row.model).await?;
        let assigned = templates::fetch_templates_ordered(&mut **tx, &row.template_ids).await?;
        let layers = build_layers(&implicit, &assigned, row.overrides.as_ref())?;
        let outcome = merge(&layers)?;
        let mut merged = outcome.config;
        DeviceCapabilities::for_model(&row.model).clamp(&mut merged);
        devices::set_desired_config(&mut **tx, device_id, &merged.to_tree()?).await?;
        Ok(())
    }

    async fn affected_devices(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        template: &TemplateRow,
    ) -> Result<Vec<i64>> {
        let mut affected = devices::devices_referencing_template(&mut **tx, template.id).await?;
        match template.parsed_scope() {
            Ok(TemplateScope::Global) => {
                affected = devices::all_device_ids(&mut **tx).await?;
            }
            Ok(TemplateScope::DeviceType) => {
                if let Some(model) = &template.device_type {
                    let by_model = devices::device_ids_by_model(&mut **tx, model).await?;
                    for id in by_model {
                        if !affected.contains(&id) {
                            affected.push(id);
                        }
                    }
                    affected.sort_unstable();
                }
            }
            Ok(TemplateScope::Group) => {}
            Err(raw) => warn!(template_id = template.id, scope = %raw, "unknown stored scope"),
        }
        Ok(affected)
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    /// Attach a tag to a device.
    pub async fn add_tag(&self, ctx: &OpContext, device_id: i64, tag: &str) -> Result<()> {
        self.get_device(device_id).await?;
        let mut tx = self.store.begin().await?;
        tags::add_tag(&mut *tx, device_id, tag).await?;
        self.audit(
            &mut tx,
            ctx,
            "device.tag",
            "device",
            device_id,
            Some(json!({"tag": tag})),
        )
        .await?;
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.tag.commit",
                source,
            })?;
        Ok(())
    }

    /// Detach a tag from a device.
    pub async fn remove_tag(&self, ctx: &OpContext, device_id: i64, tag: &str) -> Result<bool> {
        self.get_device(device_id).await?;
        let mut tx = self.store.begin().await?;
        let removed = tags::remove_tag(&mut *tx, device_id, tag).await?;
        if removed {
            self.audit(
                &mut tx,
                ctx,
                "device.untag",
                "device",
                device_id,
                Some(json!({"tag": tag})),
            )
            .await?;
        }
        tx.commit()
            .await
            .map_err(|source| shelman_data::DataError::QueryFailed {
                operation: "device.untag.commit",
                source,
            })?;
        Ok(removed)
    }

    /// Tags attached to one device.
    pub async fn device_tags(&self, device_id: i64) -> Result<Vec<String>> {
        self.get_device(device_id).await?;
        Ok(tags::tags_for_device(self.store.pool(), device_id).await?)
    }

    /// Every tag with its device count.
    pub async fn tag_index(&self) -> Result<Vec<TagCount>> {
        Ok(tags::list_tags(self.store.pool()).await?)
    }

    /// Devices carrying one tag.
    pub async fn devices_for_tag(&self, tag: &str) -> Result<Vec<DeviceRow>> {
        let ids = tags::devices_for_tag(self.store.pool(), tag).await?;
        let mut rows = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(row) = devices::fetch_device(self.store.pool(), id).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    pub(crate) fn target_for(&self, row: &DeviceRow) -> Result<shelman_device::DeviceTarget> {
        let host = row
            .ip
            .clone()
            .filter(|ip| !ip.is_empty())
            .ok_or(ConfigError::NoAddress { device_id: row.id })?;
        Ok(shelman_device::DeviceTarget {
            id: row.id,
            host,
            generation: Generation::from_number(row.generation)?,
            model: row.model.clone(),
        })
    }

    pub(crate) fn fail_fast_if_offline(&self, device_id: i64) -> Result<()> {
        if self.cache.status(device_id) == ReachabilityStatus::Offline {
            return Err(ConfigError::Device(shelman_device::DeviceError::Offline));
        }
        Ok(())
    }

    /// Fold a device I/O outcome into the reachability cache.
    pub(crate) fn observe<T>(
        &self,
        device_id: i64,
        result: shelman_device::Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.cache.record_success(device_id);
                Ok(value)
            }
            Err(err) => {
                if err.marks_offline() {
                    self.cache.record_failure(device_id);
                }
                Err(ConfigError::Device(err))
            }
        }
    }

    async fn require_device_tx(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        device_id: i64,
    ) -> Result<DeviceRow> {
        devices::fetch_device(&mut **tx, device_id)
            .await?
            .ok_or(ConfigError::DeviceNotFound { id: device_id })
    }

    pub(crate) async fn audit(
        &self,
        tx: &mut Transaction<'static, Postgres>,
        ctx: &OpContext,
        action: &str,
        entity: &'static str,
        entity_id: i64,
        detail: Option<serde_json::Value>,
    ) -> Result<()> {
        audit::append(
            &mut **tx,
            &shelman_data::NewAuditRecord {
                actor: ctx.actor.clone(),
                request_id: ctx.request_id.clone(),
                action: action.to_string(),
                entity,
                entity_id,
                detail,
            },
        )
        .await?;
        Ok(())
    }
}

/// Assemble a device's layer stack: globals, device-type templates,
/// explicitly assigned templates, then the override.
fn build_layers(
    implicit: &[TemplateRow],
    assigned: &[TemplateRow],
    overrides: Option<&serde_json::Value>,
) -> Result<Vec<ConfigLayer>> {
    let mut layers = Vec::with_capacity(implicit.len() + assigned.len() + 1);
    for template in implicit {
        let name = if template.scope == TemplateScope::Global.as_str() {
            "global"
        } else {
            "device-type"
        };
        layers.push(ConfigLayer::new(
            name,
            DeviceConfiguration::from_tree(template.config.clone())?,
        ));
    }
    for template in assigned {
        layers.push(ConfigLayer::new(
            format!("template:{}", template.name),
            DeviceConfiguration::from_tree(template.config.clone())?,
        ));
    }
    if let Some(overrides) = overrides {
        layers.push(ConfigLayer::new(
            "device-override",
            DeviceConfiguration::from_tree(overrides.clone())?,
        ));
    }
    Ok(layers)
}

fn check_scope_consistency(scope: TemplateScope, device_type: Option<&str>) -> Result<()> {
    let consistent = match scope {
        TemplateScope::DeviceType => device_type.is_some_and(|model| !model.is_empty()),
        TemplateScope::Global | TemplateScope::Group => device_type.is_none(),
    };
    if consistent {
        Ok(())
    } else {
        Err(ConfigError::ValidationFailed {
            issues: vec![shelman_model::ValidationIssue {
                pointer: "/device_type".to_string(),
                message: "required for scope 'device_type' and forbidden otherwise".to_string(),
            }],
        })
    }
}

fn check_assignable(template: &TemplateRow, device: &DeviceRow) -> Result<()> {
    match template.parsed_scope() {
        Ok(TemplateScope::Global) => Err(ConfigError::ScopeMismatch {
            template_id: template.id,
            detail: "global templates apply implicitly and cannot be assigned".to_string(),
        }),
        Ok(TemplateScope::DeviceType) => {
            if template.device_type.as_deref() == Some(device.model.as_str()) {
                Ok(())
            } else {
                Err(ConfigError::ScopeMismatch {
                    template_id: template.id,
                    detail: format!(
                        "template targets model '{}', device is '{}'",
                        template.device_type.as_deref().unwrap_or(""),
                        device.model
                    ),
                })
            }
        }
        // Group templates have no assignment surface of their own yet, but
        // the merge engine accepts them in an explicit layer list.
        Ok(TemplateScope::Group) => Ok(()),
        Err(raw) => Err(ConfigError::ScopeMismatch {
            template_id: template.id,
            detail: format!("stored scope '{raw}' is not recognized"),
        }),
    }
}

/// Canonical uppercase colon-separated MAC form.
fn canonical_mac(raw: &str) -> String {
    let hex: String = raw
        .chars()
        .filter(char::is_ascii_hexdigit)
        .collect::<String>()
        .to_ascii_uppercase();
    if hex.len() == 12 {
        hex.as_bytes()
            .chunks(2)
            .map(|pair| std::str::from_utf8(pair).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(":")
    } else {
        raw.trim().to_ascii_uppercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_canonicalization_accepts_common_notations() {
        assert_eq!(canonical_mac("a4:cf:12:f4:5b:21"), "A4:CF:12:F4:5B:21");
        assert_eq!(canonical_mac("A4CF12F45B21"), "A4:CF:12:F4:5B:21");
        assert_eq!(canonical_mac("a4-cf-12-f4-5b-21"), "A4:CF:12:F4:5B:21");
        // Anything that is not twelve hex digits is left as typed.
        assert_eq!(canonical_mac("not-a-mac"), "NOT-A-MAC");
    }

    #[test]
    fn scope_consistency_matches_the_schema_check() {
        assert!(check_scope_consistency(TemplateScope::Global, None).is_ok());
        assert!(check_scope_consistency(TemplateScope::DeviceType, Some("SHSW-1")).is_ok());
        assert!(check_scope_consistency(TemplateScope::DeviceType, None).is_err());
        assert!(check_scope_consistency(TemplateScope::Global, Some("SHSW-1")).is_err());
    }
}
