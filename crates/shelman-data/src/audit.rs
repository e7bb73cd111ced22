//! Append-only audit trail for configuration mutations and apply attempts.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgExecutor};

use crate::error::{DataError, Result};

/// One stored audit record.
#[derive(Debug, Clone, FromRow)]
pub struct AuditRecord {
    /// Surrogate identifier.
    pub id: i64,
    /// Acting principal (`admin`, `system`).
    pub actor: String,
    /// Request id the action ran under, when available.
    pub request_id: Option<String>,
    /// Action verb, e.g. `template.update`, `config.apply`.
    pub action: String,
    /// Entity kind (`device`, `template`).
    pub entity: String,
    /// Entity identifier.
    pub entity_id: i64,
    /// Structured action detail.
    pub detail: Option<Value>,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
}

/// Fields of a new audit record.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    /// Acting principal.
    pub actor: String,
    /// Request id the action ran under.
    pub request_id: Option<String>,
    /// Action verb.
    pub action: String,
    /// Entity kind.
    pub entity: &'static str,
    /// Entity identifier.
    pub entity_id: i64,
    /// Structured action detail.
    pub detail: Option<Value>,
}

/// Append one record to the trail.
///
/// # Errors
///
/// Returns a [`DataError`] when the insert fails.
pub async fn append(executor: impl PgExecutor<'_>, record: &NewAuditRecord) -> Result<()> {
    sqlx::query(
        r"INSERT INTO audit_log (actor, request_id, action, entity, entity_id, detail)
          VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&record.actor)
    .bind(&record.request_id)
    .bind(&record.action)
    .bind(record.entity)
    .bind(record.entity_id)
    .bind(&record.detail)
    .execute(executor)
    .await
    .map_err(|source| DataError::query("audit.append", source))?;
    Ok(())
}

/// Most recent records for one entity, newest first.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn list_for_entity(
    executor: impl PgExecutor<'_>,
    entity: &str,
    entity_id: i64,
    limit: i64,
) -> Result<Vec<AuditRecord>> {
    sqlx::query_as::<_, AuditRecord>(
        r"SELECT * FROM audit_log
          WHERE entity = $1 AND entity_id = $2
          ORDER BY id DESC
          LIMIT $3",
    )
    .bind(entity)
    .bind(entity_id)
    .bind(limit)
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("audit.list", source))
}
