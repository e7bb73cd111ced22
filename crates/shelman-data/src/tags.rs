//! Device tag rows for labelling and bulk operations.

use sqlx::{FromRow, PgExecutor};

use crate::error::{DataError, Result, map_write_error};

/// One tag with its device count, for the tag index listing.
#[derive(Debug, Clone, FromRow)]
pub struct TagCount {
    /// Tag label.
    pub tag: String,
    /// Number of devices carrying the label.
    pub device_count: i64,
}

/// Attach a tag to a device; attaching an existing tag is a no-op.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails (e.g. the device row is
/// gone).
pub async fn add_tag(executor: impl PgExecutor<'_>, device_id: i64, tag: &str) -> Result<()> {
    sqlx::query(
        r"INSERT INTO device_tags (device_id, tag)
          VALUES ($1, $2)
          ON CONFLICT (device_id, tag) DO NOTHING",
    )
    .bind(device_id)
    .bind(tag)
    .execute(executor)
    .await
    .map_err(|source| map_write_error("tags.add", "device_tags", source))?;
    Ok(())
}

/// Detach a tag from a device.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn remove_tag(executor: impl PgExecutor<'_>, device_id: i64, tag: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM device_tags WHERE device_id = $1 AND tag = $2")
        .bind(device_id)
        .bind(tag)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("tags.remove", source))?;
    Ok(result.rows_affected() > 0)
}

/// Tags attached to one device, alphabetically.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn tags_for_device(executor: impl PgExecutor<'_>, device_id: i64) -> Result<Vec<String>> {
    sqlx::query_scalar("SELECT tag FROM device_tags WHERE device_id = $1 ORDER BY tag")
        .bind(device_id)
        .fetch_all(executor)
        .await
        .map_err(|source| DataError::query("tags.for_device", source))
}

/// Device ids carrying a tag.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn devices_for_tag(executor: impl PgExecutor<'_>, tag: &str) -> Result<Vec<i64>> {
    sqlx::query_scalar("SELECT device_id FROM device_tags WHERE tag = $1 ORDER BY device_id")
        .bind(tag)
        .fetch_all(executor)
        .await
        .map_err(|source| DataError::query("tags.devices", source))
}

/// Every known tag with its device count.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn list_tags(executor: impl PgExecutor<'_>) -> Result<Vec<TagCount>> {
    sqlx::query_as::<_, TagCount>(
        r"SELECT tag, COUNT(*) AS device_count
          FROM device_tags
          GROUP BY tag
          ORDER BY tag",
    )
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("tags.list", source))
}
