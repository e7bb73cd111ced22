//! Configuration template rows.
//!
//! Templates are additive layers of normalized partial configuration. Scope
//! decides how they attach: `global` templates apply to every device without
//! assignment, `device_type` templates to matching models, and `group`
//! templates are stored but have no assignment surface yet.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, PgExecutor};

use crate::error::{DataError, Result, map_write_error};

/// Template attachment scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    /// Applies to every device implicitly.
    Global,
    /// Attaches by tag; reserved for a later revision.
    Group,
    /// Applies to devices of one model code.
    DeviceType,
}

impl TemplateScope {
    /// Stable string stored in the `scope` column.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Group => "group",
            Self::DeviceType => "device_type",
        }
    }
}

impl FromStr for TemplateScope {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw {
            "global" => Ok(Self::Global),
            "group" => Ok(Self::Group),
            "device_type" => Ok(Self::DeviceType),
            other => Err(format!("unknown template scope '{other}'")),
        }
    }
}

/// One stored template.
#[derive(Debug, Clone, FromRow)]
pub struct TemplateRow {
    /// Surrogate identifier.
    pub id: i64,
    /// Unique template name.
    pub name: String,
    /// Operator-facing description.
    pub description: Option<String>,
    /// Attachment scope (`global`, `group`, `device_type`).
    pub scope: String,
    /// Model code; non-null iff scope is `device_type`.
    pub device_type: Option<String>,
    /// Normalized partial configuration document.
    pub config: Value,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last row update time.
    pub updated_at: DateTime<Utc>,
}

impl TemplateRow {
    /// Parsed scope of this row.
    ///
    /// # Errors
    ///
    /// Returns the raw value when the stored scope is unknown (only possible
    /// with out-of-band writes).
    pub fn parsed_scope(&self) -> std::result::Result<TemplateScope, String> {
        self.scope.parse()
    }
}

/// Fields required to create a template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    /// Unique template name.
    pub name: String,
    /// Operator-facing description.
    pub description: Option<String>,
    /// Attachment scope.
    pub scope: TemplateScope,
    /// Model code; required iff scope is `device_type`.
    pub device_type: Option<String>,
    /// Normalized partial configuration document.
    pub config: Value,
}

/// Fields of a template update; absent fields keep their stored values.
#[derive(Debug, Clone, Default)]
pub struct TemplateUpdate {
    /// New name, when present.
    pub name: Option<String>,
    /// New description, when present.
    pub description: Option<String>,
    /// New configuration document, when present.
    pub config: Option<Value>,
}

/// Insert a template row.
///
/// # Errors
///
/// Returns [`DataError::UniqueViolation`] when the name is taken.
pub async fn insert_template(
    executor: impl PgExecutor<'_>,
    new: &NewTemplate,
) -> Result<TemplateRow> {
    sqlx::query_as::<_, TemplateRow>(
        r"INSERT INTO config_templates (name, description, scope, device_type, config)
          VALUES ($1, $2, $3, $4, $5)
          RETURNING *",
    )
    .bind(&new.name)
    .bind(&new.description)
    .bind(new.scope.as_str())
    .bind(&new.device_type)
    .bind(&new.config)
    .fetch_one(executor)
    .await
    .map_err(|source| map_write_error("templates.insert", "config_templates.name", source))
}

/// Fetch a template by id.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn fetch_template(
    executor: impl PgExecutor<'_>,
    id: i64,
) -> Result<Option<TemplateRow>> {
    sqlx::query_as::<_, TemplateRow>("SELECT * FROM config_templates WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .map_err(|source| DataError::query("templates.fetch", source))
}

/// List templates, optionally restricted to one scope, in id order.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn list_templates(
    executor: impl PgExecutor<'_>,
    scope: Option<TemplateScope>,
) -> Result<Vec<TemplateRow>> {
    sqlx::query_as::<_, TemplateRow>(
        r"SELECT * FROM config_templates
          WHERE ($1::text IS NULL OR scope = $1)
          ORDER BY id",
    )
    .bind(scope.map(TemplateScope::as_str))
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("templates.list", source))
}

/// Templates that implicitly or explicitly apply to a model: all globals
/// followed by matching `device_type` templates, in creation (id) order.
///
/// # Errors
///
/// Returns a [`DataError`] when the query fails.
pub async fn list_templates_for_model(
    executor: impl PgExecutor<'_>,
    model: &str,
) -> Result<Vec<TemplateRow>> {
    sqlx::query_as::<_, TemplateRow>(
        r"SELECT * FROM config_templates
          WHERE scope = 'global' OR (scope = 'device_type' AND device_type = $1)
          ORDER BY (scope <> 'global'), id",
    )
    .bind(model)
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("templates.for_model", source))
}

/// Fetch several templates preserving the order of `ids`.
///
/// # Errors
///
/// Returns [`DataError::NotFound`] naming the first id that does not resolve.
pub async fn fetch_templates_ordered(
    executor: impl PgExecutor<'_>,
    ids: &[i64],
) -> Result<Vec<TemplateRow>> {
    let rows = sqlx::query_as::<_, TemplateRow>(
        "SELECT * FROM config_templates WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(executor)
    .await
    .map_err(|source| DataError::query("templates.fetch_many", source))?;

    let mut ordered = Vec::with_capacity(ids.len());
    for id in ids {
        match rows.iter().find(|row| row.id == *id) {
            Some(row) => ordered.push(row.clone()),
            None => {
                return Err(DataError::NotFound {
                    entity: "template",
                    id: *id,
                });
            }
        }
    }
    Ok(ordered)
}

/// Apply a template update.
///
/// # Errors
///
/// Returns [`DataError::NotFound`] for unknown templates and
/// [`DataError::UniqueViolation`] for name collisions.
pub async fn update_template(
    executor: impl PgExecutor<'_>,
    id: i64,
    update: &TemplateUpdate,
) -> Result<TemplateRow> {
    sqlx::query_as::<_, TemplateRow>(
        r"UPDATE config_templates
          SET name = COALESCE($2, name),
              description = COALESCE($3, description),
              config = COALESCE($4, config),
              updated_at = now()
          WHERE id = $1
          RETURNING *",
    )
    .bind(id)
    .bind(&update.name)
    .bind(&update.description)
    .bind(&update.config)
    .fetch_optional(executor)
    .await
    .map_err(|source| map_write_error("templates.update", "config_templates.name", source))?
    .ok_or(DataError::NotFound {
        entity: "template",
        id,
    })
}

/// Delete a template row.
///
/// # Errors
///
/// Returns a [`DataError`] when the statement fails.
pub async fn delete_template(executor: impl PgExecutor<'_>, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM config_templates WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await
        .map_err(|source| DataError::query("templates.delete", source))?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_round_trips_through_strings() {
        for scope in [
            TemplateScope::Global,
            TemplateScope::Group,
            TemplateScope::DeviceType,
        ] {
            assert_eq!(scope.as_str().parse::<TemplateScope>(), Ok(scope));
        }
        assert!("regional".parse::<TemplateScope>().is_err());
    }
}
