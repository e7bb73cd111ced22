//! Tag endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::response::Response;

use crate::dto::{DeviceDto, TagDto, TagRequest};
use crate::envelope::{self, ApiError, Meta};
use crate::handlers::op_context;
use crate::state::ApiState;

/// `GET /api/v1/devices/{id}/tags`
pub(crate) async fn get_device_tags(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let tags = state.service.device_tags(id).await?;
    Ok(envelope::ok(tags))
}

/// `POST /api/v1/devices/{id}/tags`
pub(crate) async fn add_device_tag(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<TagRequest>,
) -> Result<Response, ApiError> {
    let tag = body.tag.trim().to_string();
    if tag.is_empty() {
        return Err(ApiError::bad_request("tag must not be empty"));
    }
    state.service.add_tag(&op_context(), id, &tag).await?;
    Ok(envelope::created(serde_json::json!({"tag": tag})))
}

/// `DELETE /api/v1/devices/{id}/tags/{tag}`
pub(crate) async fn remove_device_tag(
    State(state): State<Arc<ApiState>>,
    Path((id, tag)): Path<(i64, String)>,
) -> Result<Response, ApiError> {
    let removed = state.service.remove_tag(&op_context(), id, &tag).await?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "device {id} does not carry tag '{tag}'"
        )));
    }
    Ok(envelope::ok(serde_json::json!({"deleted": true})))
}

/// `GET /api/v1/tags`
pub(crate) async fn list_tags(State(state): State<Arc<ApiState>>) -> Result<Response, ApiError> {
    let tags: Vec<TagDto> = state
        .service
        .tag_index()
        .await?
        .into_iter()
        .map(TagDto::from)
        .collect();
    let meta = Meta::counted(tags.len());
    Ok(envelope::ok_with_meta(tags, meta))
}

/// `GET /api/v1/tags/{tag}/devices`
pub(crate) async fn devices_for_tag(
    State(state): State<Arc<ApiState>>,
    Path(tag): Path<String>,
) -> Result<Response, ApiError> {
    let rows = state.service.devices_for_tag(&tag).await?;
    let items: Vec<DeviceDto> = rows.into_iter().map(DeviceDto::from).collect();
    let meta = Meta::counted(items.len());
    Ok(envelope::ok_with_meta(items, meta))
}
