//! Request and response DTOs for the REST surface.
//!
//! These types pin the wire contract independently of the storage rows:
//! secrets are redacted before any configuration document leaves the
//! service, and partial-update bodies keep every field optional so absence
//! is distinguishable from an explicit value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shelman_data::{DeviceRow, TagCount, TemplateRow, TemplateScope};
use shelman_model::{DeviceConfiguration, SourceMap};

/// One device as surfaced by the API.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDto {
    /// Device id.
    pub id: i64,
    /// Hardware MAC address.
    pub mac: String,
    /// Current IP address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Operator-assigned name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Vendor model code.
    pub model: String,
    /// Vendor API generation.
    pub generation: i64,
    /// Last successful contact.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Assigned template ids, lowest priority first.
    pub template_ids: Vec<i64>,
    /// Whether the desired configuration matches the last import.
    pub config_applied: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

impl From<DeviceRow> for DeviceDto {
    fn from(row: DeviceRow) -> Self {
        Self {
            id: row.id,
            mac: row.mac,
            ip: row.ip,
            name: row.name,
            model: row.model,
            generation: row.generation,
            last_seen: row.last_seen,
            template_ids: row.template_ids,
            config_applied: row.config_applied,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Device detail: catalogue row plus live sections from the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDetailDto {
    /// The catalogue row.
    pub device: DeviceDto,
    /// Whether the fetch was short-circuited by the offline cache.
    pub offline: bool,
    /// Live status, when fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    /// Live energy readings, when fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<Value>,
    /// Normalized (and redacted) settings snapshot, when fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<DeviceConfiguration>,
    /// Reasons for sections that could not be fetched.
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub unavailable: std::collections::BTreeMap<String, String>,
}

/// Body of `POST /devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDeviceRequest {
    /// Hardware MAC address in any common notation.
    pub mac: String,
    /// Current IP address.
    #[serde(default)]
    pub ip: Option<String>,
    /// Operator-assigned name.
    #[serde(default)]
    pub name: Option<String>,
    /// Vendor model code.
    pub model: String,
    /// Vendor API generation (1 or 2).
    pub generation: i64,
}

/// Body of `PUT /devices/{id}`; every field optional, absence preserves the
/// stored value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateDeviceRequest {
    /// New name.
    pub name: Option<String>,
    /// New IP address.
    pub ip: Option<String>,
    /// New MAC address.
    pub mac: Option<String>,
    /// New model code.
    pub model: Option<String>,
    /// New generation.
    pub generation: Option<i64>,
}

/// Body of `POST /devices/{id}/control`.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlRequest {
    /// One of `on`, `off`, `restart`.
    pub action: String,
}

/// One template as surfaced by the API.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateDto {
    /// Template id.
    pub id: i64,
    /// Unique template name.
    pub name: String,
    /// Operator-facing description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Attachment scope.
    pub scope: String,
    /// Target model for `device_type` templates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Normalized partial configuration, secrets redacted.
    pub config: DeviceConfiguration,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

impl TemplateDto {
    /// Build the DTO, redacting stored secrets.
    ///
    /// # Errors
    ///
    /// Returns the model error when the stored document does not parse;
    /// only possible after out-of-band writes.
    pub fn from_row(row: TemplateRow) -> Result<Self, shelman_model::ModelError> {
        let mut config = DeviceConfiguration::from_tree(row.config)?;
        config.redact_secrets();
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            scope: row.scope,
            device_type: row.device_type,
            config,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Body of `POST /config/templates`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTemplateRequest {
    /// Unique template name.
    pub name: String,
    /// Operator-facing description.
    #[serde(default)]
    pub description: Option<String>,
    /// Attachment scope.
    pub scope: TemplateScope,
    /// Target model; required iff scope is `device_type`.
    #[serde(default)]
    pub device_type: Option<String>,
    /// Normalized partial configuration.
    #[serde(default)]
    pub config: DeviceConfiguration,
}

/// Body of `PUT /config/templates/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdateTemplateRequest {
    /// New name.
    pub name: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New configuration document.
    pub config: Option<DeviceConfiguration>,
}

/// Body of `PUT /devices/{id}/templates`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetTemplatesRequest {
    /// Replacement assignment, lowest priority first.
    pub template_ids: Vec<i64>,
}

/// Query of `POST /devices/{id}/templates/{tid}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PositionQuery {
    /// Insertion position; appended when absent.
    #[serde(default)]
    pub position: Option<usize>,
}

/// Body of `POST /devices/{id}/config/apply-template`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyTemplateRequest {
    /// Template to assign and apply.
    pub template_id: i64,
}

/// Body of `POST /config/apply-bulk`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BulkApplyRequest {
    /// Explicit device ids.
    pub device_ids: Vec<i64>,
    /// Alternatively, every device carrying this tag.
    pub tag: Option<String>,
}

/// Body of `POST /devices/{id}/tags`.
#[derive(Debug, Clone, Deserialize)]
pub struct TagRequest {
    /// Tag label.
    pub tag: String,
}

/// One tag with its device count.
#[derive(Debug, Clone, Serialize)]
pub struct TagDto {
    /// Tag label.
    pub tag: String,
    /// Number of devices carrying it.
    pub device_count: i64,
}

impl From<TagCount> for TagDto {
    fn from(row: TagCount) -> Self {
        Self {
            tag: row.tag,
            device_count: row.device_count,
        }
    }
}

/// Response of `GET /devices/{id}/desired-config`.
#[derive(Debug, Clone, Serialize)]
pub struct DesiredConfigDto {
    /// The merged configuration, secrets redacted.
    pub config: DeviceConfiguration,
    /// Which layer set each field.
    pub sources: SourceMap,
}

/// Common list query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Items per page.
    pub page_size: Option<u32>,
    /// Case-insensitive search term.
    pub search: Option<String>,
    /// Sort key, `-` prefix for descending.
    pub sort: Option<String>,
    /// Restrict to one tag.
    pub tag: Option<String>,
}

/// Query of `GET /devices/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetailQuery {
    /// Force live reads even when the device is cached offline.
    pub force: Option<bool>,
}

/// Query of `GET /config/templates`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TemplateListQuery {
    /// Restrict to one scope.
    pub scope: Option<TemplateScope>,
}
