//! Template, assignment, override, and apply/verify endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Response;

use crate::dto::{
    ApplyTemplateRequest, BulkApplyRequest, CreateTemplateRequest, DesiredConfigDto,
    PositionQuery, SetTemplatesRequest, TemplateDto, TemplateListQuery, UpdateTemplateRequest,
};
use crate::envelope::{self, ApiError, Meta};
use crate::handlers::op_context;
use crate::state::ApiState;
use shelman_config::{NewTemplateSpec, TemplateUpdateSpec};
use shelman_model::DeviceConfiguration;

fn template_dto(row: shelman_data::TemplateRow) -> Result<TemplateDto, ApiError> {
    TemplateDto::from_row(row).map_err(|err| {
        tracing::error!(error = %err, "stored template document is corrupt");
        ApiError::internal("stored template could not be decoded")
    })
}

/// `GET /api/v1/config/templates`
pub(crate) async fn list_templates(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TemplateListQuery>,
) -> Result<Response, ApiError> {
    let rows = state.service.list_templates(query.scope).await?;
    let items = rows
        .into_iter()
        .map(template_dto)
        .collect::<Result<Vec<_>, _>>()?;
    let meta = Meta::counted(items.len());
    Ok(envelope::ok_with_meta(items, meta))
}

/// `POST /api/v1/config/templates`
pub(crate) async fn create_template(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateTemplateRequest>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .create_template(
            &op_context(),
            NewTemplateSpec {
                name: body.name,
                description: body.description,
                scope: body.scope,
                device_type: body.device_type,
                config: body.config,
            },
        )
        .await?;
    Ok(envelope::created(template_dto(row)?))
}

/// `GET /api/v1/config/templates/{id}`
pub(crate) async fn get_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let row = state.service.get_template(id).await?;
    Ok(envelope::ok(template_dto(row)?))
}

/// `PUT /api/v1/config/templates/{id}` — edits propagate to every assigned
/// device atomically.
pub(crate) async fn update_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateTemplateRequest>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .update_template(
            &op_context(),
            id,
            TemplateUpdateSpec {
                name: body.name,
                description: body.description,
                config: body.config,
            },
        )
        .await?;
    Ok(envelope::ok(template_dto(row)?))
}

/// `DELETE /api/v1/config/templates/{id}`
pub(crate) async fn delete_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.service.delete_template(&op_context(), id).await?;
    Ok(envelope::ok(serde_json::json!({"deleted": true})))
}

/// `GET /api/v1/devices/{id}/templates`
pub(crate) async fn get_device_templates(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let rows = state.service.device_templates(id).await?;
    let items = rows
        .into_iter()
        .map(template_dto)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(envelope::ok(items))
}

/// `PUT /api/v1/devices/{id}/templates`
pub(crate) async fn set_device_templates(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<SetTemplatesRequest>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .set_templates(&op_context(), id, body.template_ids)
        .await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `POST /api/v1/devices/{id}/templates/{tid}?position=`
pub(crate) async fn add_device_template(
    State(state): State<Arc<ApiState>>,
    Path((id, template_id)): Path<(i64, i64)>,
    Query(query): Query<PositionQuery>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .add_template(&op_context(), id, template_id, query.position)
        .await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `DELETE /api/v1/devices/{id}/templates/{tid}`
pub(crate) async fn remove_device_template(
    State(state): State<Arc<ApiState>>,
    Path((id, template_id)): Path<(i64, i64)>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .remove_template(&op_context(), id, template_id)
        .await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `GET /api/v1/devices/{id}/overrides`
pub(crate) async fn get_overrides(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let overrides = state.service.get_overrides(id).await?;
    let redacted = overrides.map(|mut config| {
        config.redact_secrets();
        config
    });
    Ok(envelope::ok(redacted))
}

/// `PUT /api/v1/devices/{id}/overrides`
pub(crate) async fn put_overrides(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<DeviceConfiguration>,
) -> Result<Response, ApiError> {
    let row = state.service.put_overrides(&op_context(), id, body).await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `PATCH /api/v1/devices/{id}/overrides`
pub(crate) async fn patch_overrides(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<DeviceConfiguration>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .patch_overrides(&op_context(), id, body)
        .await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `DELETE /api/v1/devices/{id}/overrides`
pub(crate) async fn delete_overrides(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let row = state.service.clear_overrides(&op_context(), id).await?;
    Ok(envelope::ok(crate::dto::DeviceDto::from(row)))
}

/// `GET /api/v1/devices/{id}/desired-config`
pub(crate) async fn desired_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let desired = state.service.desired_config(id).await?;
    let mut config = desired.config;
    config.redact_secrets();
    Ok(envelope::ok(DesiredConfigDto {
        config,
        sources: desired.sources,
    }))
}

/// `POST /api/v1/devices/{id}/config/apply`
pub(crate) async fn apply_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let result = state.service.apply_config(&op_context(), id).await?;
    state
        .metrics
        .inc_config_apply(if result.success { "ok" } else { "partial" });
    Ok(envelope::ok(result))
}

/// `GET /api/v1/devices/{id}/config/status`
pub(crate) async fn config_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let status = state.service.config_status(id).await?;
    Ok(envelope::ok(status))
}

/// `POST /api/v1/devices/{id}/config/verify`
pub(crate) async fn verify_config(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let result = state.service.verify_config(&op_context(), id).await?;
    Ok(envelope::ok(result))
}

/// `POST /api/v1/devices/{id}/config/reboot-and-verify`
pub(crate) async fn reboot_and_verify(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let result = state.service.reboot_and_verify(&op_context(), id).await?;
    Ok(envelope::ok(result))
}

/// `GET /api/v1/devices/{id}/config/drift` — 404 when no baseline exists.
pub(crate) async fn config_drift(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let report = state.service.drift_report(id).await?;
    Ok(envelope::ok(report))
}

/// `POST /api/v1/devices/{id}/config/apply-template` — assigns one template
/// and applies the recomputed configuration. An unknown template id is a
/// not-found, never a server error.
pub(crate) async fn apply_template(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<ApplyTemplateRequest>,
) -> Result<Response, ApiError> {
    let ctx = op_context();
    state.service.get_template(body.template_id).await?;
    state
        .service
        .add_template(&ctx, id, body.template_id, None)
        .await?;
    let result = state.service.apply_config(&ctx, id).await?;
    Ok(envelope::ok(result))
}

/// `POST /api/v1/config/apply-bulk`
pub(crate) async fn apply_bulk(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<BulkApplyRequest>,
) -> Result<Response, ApiError> {
    let mut device_ids = body.device_ids;
    if let Some(tag) = &body.tag {
        let tagged = state.service.devices_for_tag(tag).await?;
        for row in tagged {
            if !device_ids.contains(&row.id) {
                device_ids.push(row.id);
            }
        }
    }
    if device_ids.is_empty() {
        return Err(ApiError::bad_request(
            "provide device_ids or a tag with at least one device",
        ));
    }

    let entries = state.service.apply_bulk(&op_context(), device_ids).await?;
    let meta = Meta::counted(entries.len());
    Ok(envelope::ok_with_meta(entries, meta))
}

/// `GET /api/v1/config/pending`
pub(crate) async fn pending_devices(
    State(state): State<Arc<ApiState>>,
) -> Result<Response, ApiError> {
    let rows = state.service.pending_devices().await?;
    let items: Vec<crate::dto::DeviceDto> =
        rows.into_iter().map(crate::dto::DeviceDto::from).collect();
    let meta = Meta::counted(items.len());
    Ok(envelope::ok_with_meta(items, meta))
}
