//! Device rows, partial updates, and catalogue queries.
//!
//! Partial updates are read-modify-write under a row lock: only fields the
//! patch names change, so a request that omits `mac` or `ip` can never zero
//! them. Unique-key collisions surface as [`DataError::UniqueViolation`]
//! rather than a generic query failure.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgExecutor, Postgres, Transaction};

use crate::error::{DataError, Result, map_write_error};

/// One device in the catalogue.
#[derive(Debug, Clone, FromRow)]
pub struct DeviceRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Hardware MAC address, canonical uppercase colon form; unique.
    pub mac: String,
    /// Current IP address, when known.
    pub ip: Option<String>,
    /// Operator-assigned name.
    pub name: Option<String>,
    /// Vendor model code, e.g. `SHPLG-S`.
    pub model: String,
    /// Vendor API generation (1 or 2).
    pub generation: i64,
    /// Last successful contact.
    pub last_seen: Option<DateTime<Utc>>,
    /// Assigned template ids, lowest priority first.
    pub template_ids: Vec<i64>,
    /// Per-device override document (normalized partial), when present.
    pub overrides: Option<Value>,
    /// Cached merged configuration, when computed.
    pub desired_config: Option<Value>,
    /// Most recent configuration snapshot read from the device.
    pub imported_config: Option<Value>,
    /// Whether the desired configuration matches the last import.
    pub config_applied: bool,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

/// Fields required to create a device.
#[derive(Debug, Clone)]
pub struct NewDevice {
    /// Hardware MAC address.
    pub mac: String,
    /// Current IP address, when known.
    pub ip: Option<String>,
    /// Operator-assigned name.
    pub name: Option<String>,
    /// Vendor model code.
    pub model: String,
    /// Vendor API generation.
    pub generation: i64,
}

/// Partial update; absent fields keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct DevicePatch {
    /// New name, when present.
    pub name: Option<String>,
    /// New IP address, when present.
    pub ip: Option<String>,
    /// New MAC address, when present.
    pub mac: Option<String>,
    /// New model code, when present.
    pub model: Option<String>,
    /// New generation, when present.
    pub generation: Option<i64>,
}

impl DevicePatch {
    /// Whether the patch changes anything at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.ip.is_none()
            && self.mac.is_none()
            && self.model.is_none()
            && self.generation.is_none()
    }
}

/// Sort keys accepted by the catalogue listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSort {
    /// By id ascending (default).
    Id,
    /// By operator name.
    Name,
    /// By MAC address.
    Mac,
    /// By IP address.
    Ip,
    /// By model code.
    Model,
    /// By last contact time.
    LastSeen,
    /// By creation time.
    CreatedAt,
}

impl DeviceSort {
    /// Parse a `sort` query value; a `-` prefix selects descending order.
    /// Unknown keys are rejected so they can surface as validation errors.
    #[must_use]
    pub fn parse(raw: &str) -> Option<(Self, bool)> {
        let (key, descending) = raw
            .strip_prefix('-')
            .map_or((raw, false), |stripped| (stripped, true));
        let sort = match key {
            "id" => Self::Id,
            "name" => Self::Name,
            "mac" => Self::Mac,
            "ip" => Self::Ip,
            "model" => Self::Model,
            "last_seen" => Self::LastSeen,
            "created_at" => Self::CreatedAt,
            _ => return None,
        };
        Some((sort, descending))
    }

    const fn column(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Mac => "mac",
            Self::Ip => "ip",
            Self::Model => "model",
            Self::LastSeen => "last_seen",
            Self::CreatedAt => "created_at",
        }
    }
}

/// Catalogue listing filter.
#[derive(Debug, Clone)]
pub struct DeviceQuery {
    /// Case-insensitive substring over name, MAC, IP, and model.
    pub search: Option<String>,
    /// Restrict to devices carrying this tag.
    pub tag: Option<String>,
    /// Sort key.
    pub sort: DeviceSort,
    /// Whether the sort is descending.
    pub descending: bool,
    /// Page size; `None` returns everything.
    pub limit: Option<i64>,
    /// Row offset.
    pub offset: i64,
}

impl Default for DeviceQuery {
    fn default() -> Self {
        Self {
            search: None,
            tag: None,
            sort: DeviceSort::Id,
            descending: false,
            limit: None,
            offset: 0,
        }
    }
}

const LIST_FILTER: &str = r"
    WHERE ($1::text IS NULL
           OR d.name ILIKE '%' || $1 || '%'
           OR d.mac ILIKE '%' || $1 || '%'
           OR d.ip ILIKE '%' || $1 || '%'
           OR d.model ILIKE '%' || $1 || '%')
      AND ($2::text IS NULL
           OR EXISTS (SELECT 1 FROM device_tags t
                      WHERE t.device_id = d.id AND t.tag = $2))
";

/// Insert a device row.
///
/// # Errors
///
/// Returns [`DataError::UniqueViolation`] when the MAC is already catalogued.
pub async fn insert_device(
    executor: impl PgExecutor<'_>,
    new: &NewDevice,
) -> Result<DeviceRow> {
    sqlx::query_as::<_, DeviceRow>(
        r"INSERT INTO devices (mac, ip, name, model, generation)
          VALUES ($1, $2, $3, $4, $5)
          RETURNING *",
    )
    .bind(&new.mac)
    .bind(&new.ip)
    .bind(&new.name)
    .bind(&new.model)
    .bind(new.generation)
    .fetch_one(executor)
    .await
    .map_err(|source| map_write_error("devices.insert", "devices.mac", source))
}

/// Fetch a device by id.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn fetch_device(executor: impl PgExecutor<'_>, id: i64) -> Result<Option<DeviceRow>> {
    sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(|source| DataError::query("devices.fetch", source))
}

/// Fetch a device by MAC.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn fetch_device_by_mac(
    executor: impl PgExecutor<'_>,
    mac: &str,
) -> Result<Option<DeviceRow>> {
    sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE mac = $1")
        .bind(mac)
        .fetch_optional(executor)
        .await
        .map_err(|source| DataError::query("devices.fetch_by_mac", source))
}

/// List devices matching `query` along with the unpaginated total.
///
/// # Errors
///
/// Returns a [`DataError`] when either query fails.
pub async fn list_devices(
    pool: &sqlx::PgPool,
    query: &DeviceQuery,
) -> Result<(Vec<DeviceRow>, i64)> {
    let direction = if query.descending { "DESC" } else { "ASC" };
    let listing_sql = format!(
        "SELECT d.* FROM devices d {LIST_FILTER} ORDER BY d.{column} {direction}, d.id ASC \
         LIMIT $3 OFFSET $4",
        column = query.sort.column(),
    );

    let rows = sqlx::query_as::<_, DeviceRow>(&listing_sql)
        .bind(&query.search)
        .bind(&query.tag)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(pool)
        .await
        .map_err(|source| DataError::query("devices.list", source))?;

    let total: i64 =
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM devices d {LIST_FILTER}"))
            .bind(&query.search)
            .bind(&query.tag)
            .fetch_one(pool)
            .await
            .map_err(|source| DataError::query("devices.count", source))?;

    Ok((rows, total))
}

/// Apply a partial update under a row lock, so concurrent edits to the same
/// device serialize instead of losing fields.
///
/// # Errors
///
/// Returns [`DataError::NotFound`] for unknown devices and
/// [`DataError::UniqueViolation`] for MAC collisions.
pub async fn update_device(
    tx: &mut Transaction<'_, Postgres>,
    id: i64,
    patch: &DevicePatch,
) -> Result<DeviceRow> {
    let row = sqlx::query_as::<_, DeviceRow>("SELECT * FROM devices WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|source| DataError::query("devices.lock", source))?;
    let Some(mut row) = row else {
        return Err(DataError::NotFound {
            entity: "device",
            id,
        });
    };

    if let Some(name) = &patch.name {
        row.name = Some(name.clone());
    }
    if let Some(ip) = &patch.ip {
        row.ip = Some(ip.clone());
    }
    if let Some(mac) = &patch.mac {
        row.mac = mac.clone();
    }
    if let Some(model) = &patch.model {
        row.model = model.clone();
    }
    if let Some(generation) = patch.generation {
        row.generation = generation;
    }

    sqlx::query_as::<_, DeviceRow>(
        r"UPDATE devices
          SET mac = $2, ip = $3, name = $4, model = $5, generation = $6, updated_at = now()
          WHERE id = $1
          RETURNING *",
    )
    .bind(id)
    .bind(&row.mac)
    .bind(&row.ip)
    .bind(&row.name)
    .bind(&row.model)
    .bind(row.generation)
    .fetch_one(&mut **tx)
    .await
    .map_err(|source| map_write_error("devices.update", "devices.mac", source))
}

/// Delete a device row; tags cascade.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn delete_device(executor: impl PgExecutor<'_>, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM devices WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("devices.delete", source))?;
    Ok(result.rows_affected() > 0)
}

/// Record a successful contact with the device.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn touch_last_seen(executor: impl PgExecutor<'_>, id: i64) -> Result<()> {
    sqlx::query("UPDATE devices SET last_seen = now() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("devices.touch", source))?;
    Ok(())
}

/// Replace the ordered template assignment.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn set_template_ids(
    executor: impl PgExecutor<'_>,
    id: i64,
    template_ids: &[i64],
) -> Result<()> {
    sqlx::query("UPDATE devices SET template_ids = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(template_ids)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("devices.set_templates", source))?;
    Ok(())
}

/// Replace (or clear) the per-device override document.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn set_overrides(
    executor: impl PgExecutor<'_>,
    id: i64,
    overrides: Option<&Value>,
) -> Result<()> {
    sqlx::query("UPDATE devices SET overrides = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(overrides)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("devices.set_overrides", source))?;
    Ok(())
}

/// Persist a recomputed desired configuration; always clears the applied
/// flag, since the device has not seen the new document yet.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn set_desired_config(
    executor: impl PgExecutor<'_>,
    id: i64,
    desired: &Value,
) -> Result<()> {
    sqlx::query(
        r"UPDATE devices
          SET desired_config = $2, config_applied = FALSE, updated_at = now()
          WHERE id = $1",
    )
    .bind(id)
    .bind(desired)
    .execute(executor)
    .await
    .map_err(|source| DataError::query("devices.set_desired", source))?;
    Ok(())
}

/// Replace the imported configuration snapshot.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn set_imported_config(
    executor: impl PgExecutor<'_>,
    id: i64,
    imported: &Value,
) -> Result<()> {
    sqlx::query(
        "UPDATE devices SET imported_config = $2, last_seen = now(), updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .bind(imported)
    .execute(executor)
    .await
    .map_err(|source| DataError::query("devices.set_imported", source))?;
    Ok(())
}

/// Record the verification outcome.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn set_config_applied(
    executor: impl PgExecutor<'_>,
    id: i64,
    applied: bool,
) -> Result<()> {
    sqlx::query("UPDATE devices SET config_applied = $2, updated_at = now() WHERE id = $1")
        .bind(id)
        .bind(applied)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("devices.set_applied", source))?;
    Ok(())
}

/// Devices whose desired configuration has not been verified as applied.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn list_pending_devices(executor: impl PgExecutor<'_>) -> Result<Vec<DeviceRow>> {
    sqlx::query_as::<_, DeviceRow>(
        "SELECT * FROM devices WHERE config_applied = FALSE ORDER BY id",
    )
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("devices.list_pending", source))
}

/// Ids of devices whose assignment references the template.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn devices_referencing_template(
    executor: impl PgExecutor<'_>,
    template_id: i64,
) -> Result<Vec<i64>> {
    sqlx::query_scalar(
        "SELECT id FROM devices WHERE template_ids @> ARRAY[$1]::bigint[] ORDER BY id",
    )
    .bind(template_id)
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("devices.referencing_template", source))
}

/// Ids of devices with the given model code.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn device_ids_by_model(
    executor: impl PgExecutor<'_>,
    model: &str,
) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM devices WHERE model = $1 ORDER BY id")
        .bind(model)
        .fetch_all(executor)
        .await
        .map_err(|source| DataError::query("devices.by_model", source))
}

/// Ids of every catalogued device.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn all_device_ids(executor: impl PgExecutor<'_>) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT id FROM devices ORDER BY id")
        .fetch_all(executor)
        .await
        .map_err(|source| DataError::query("devices.all_ids", source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_parsing_accepts_known_keys_and_direction() {
        assert_eq!(DeviceSort::parse("name"), Some((DeviceSort::Name, false)));
        assert_eq!(
            DeviceSort::parse("-last_seen"),
            Some((DeviceSort::LastSeen, true))
        );
        assert_eq!(DeviceSort::parse("power_draw"), None);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(DevicePatch::default().is_empty());
        let patch = DevicePatch {
            name: Some("Updated".to_string()),
            ..DevicePatch::default()
        };
        assert!(!patch.is_empty());
    }
}
