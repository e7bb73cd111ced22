//! Device catalogue, control, and live-read endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::Response;

use crate::dto::{
    ControlRequest, CreateDeviceRequest, DetailQuery, DeviceDetailDto, DeviceDto, ListQuery,
    UpdateDeviceRequest,
};
use crate::envelope::{self, ApiError, Meta};
use crate::handlers::op_context;
use crate::state::ApiState;
use shelman_config::{DeviceAction, NewDeviceSpec};
use shelman_data::{DeviceQuery, DevicePatch, DeviceSort};
use shelman_device::SectionResult;
use shelman_vendor::{Generation, from_api};

/// `GET /api/v1/devices`
pub(crate) async fn list_devices(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    let (sort, descending) = match &query.sort {
        Some(raw) => DeviceSort::parse(raw).ok_or_else(|| {
            ApiError::bad_request(format!("unknown sort key '{raw}'"))
        })?,
        None => (DeviceSort::Id, false),
    };

    let paginated = query.page.is_some() || query.page_size.is_some();
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(50).clamp(1, 500);

    let device_query = DeviceQuery {
        search: query.search.clone().filter(|term| !term.is_empty()),
        tag: query.tag.clone().filter(|tag| !tag.is_empty()),
        sort,
        descending,
        limit: paginated.then(|| i64::from(page_size)),
        offset: if paginated {
            i64::from(page - 1) * i64::from(page_size)
        } else {
            0
        },
    };

    let (rows, total) = state.service.list_devices(&device_query).await?;
    let items: Vec<DeviceDto> = rows.into_iter().map(DeviceDto::from).collect();
    let meta = if paginated {
        Meta::paginated(page, page_size, items.len(), total)
    } else {
        Meta::counted(items.len())
    };
    Ok(envelope::ok_with_meta(items, meta))
}

/// `POST /api/v1/devices`
pub(crate) async fn create_device(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateDeviceRequest>,
) -> Result<Response, ApiError> {
    let row = state
        .service
        .create_device(
            &op_context(),
            NewDeviceSpec {
                mac: body.mac,
                ip: body.ip,
                name: body.name,
                model: body.model,
                generation: body.generation,
            },
        )
        .await?;
    Ok(envelope::created(DeviceDto::from(row)))
}

/// `GET /api/v1/devices/{id}` — catalogue row plus a parallel live fetch.
pub(crate) async fn get_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Query(query): Query<DetailQuery>,
) -> Result<Response, ApiError> {
    let force = query.force.unwrap_or(false);
    let (row, detail) = state.service.fetch_device_detail(id, force).await?;
    let generation = Generation::from_number(row.generation)
        .map_err(|_| ApiError::internal("device row carries an unsupported generation"))?;
    let model = row.model.clone();

    let mut unavailable = BTreeMap::new();
    let status = section_value("status", detail.status, &mut unavailable);
    let energy = section_value("energy", detail.energy, &mut unavailable);
    let settings = match detail.settings {
        SectionResult::Ok(document) => {
            match serde_json::to_vec(&document)
                .ok()
                .and_then(|raw| from_api(generation, &raw, &model).ok())
            {
                Some(mut config) => {
                    config.redact_secrets();
                    Some(config)
                }
                None => {
                    unavailable.insert(
                        "settings".to_string(),
                        "device settings could not be normalized".to_string(),
                    );
                    None
                }
            }
        }
        SectionResult::Unavailable { reason } => {
            unavailable.insert("settings".to_string(), reason);
            None
        }
    };

    Ok(envelope::ok(DeviceDetailDto {
        device: DeviceDto::from(row),
        offline: detail.offline,
        status,
        energy,
        settings,
        unavailable,
    }))
}

fn section_value(
    name: &str,
    section: SectionResult,
    unavailable: &mut BTreeMap<String, String>,
) -> Option<serde_json::Value> {
    match section {
        SectionResult::Ok(value) => Some(value),
        SectionResult::Unavailable { reason } => {
            unavailable.insert(name.to_string(), reason);
            None
        }
    }
}

/// `PUT /api/v1/devices/{id}` — partial update; omitted fields keep their
/// stored values.
pub(crate) async fn update_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateDeviceRequest>,
) -> Result<Response, ApiError> {
    let patch = DevicePatch {
        name: body.name,
        ip: body.ip,
        mac: body.mac,
        model: body.model,
        generation: body.generation,
    };
    let row = state.service.update_device(&op_context(), id, patch).await?;
    Ok(envelope::ok(DeviceDto::from(row)))
}

/// `DELETE /api/v1/devices/{id}` — cancels pending device I/O first.
pub(crate) async fn delete_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.service.delete_device(&op_context(), id).await?;
    Ok(envelope::ok(serde_json::json!({"deleted": true})))
}

/// `POST /api/v1/devices/{id}/control`
pub(crate) async fn control_device(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
    Json(body): Json<ControlRequest>,
) -> Result<Response, ApiError> {
    let action = match body.action.as_str() {
        "on" => DeviceAction::On,
        "off" => DeviceAction::Off,
        "restart" => DeviceAction::Restart,
        other => {
            return Err(ApiError::bad_request(format!(
                "unknown action '{other}'; expected 'on', 'off', or 'restart'"
            )));
        }
    };
    state.service.control_device(&op_context(), id, action).await?;
    Ok(envelope::ok(serde_json::json!({"action": body.action})))
}

/// `GET /api/v1/devices/{id}/status`
pub(crate) async fn device_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let status = state.service.device_status(id).await?;
    Ok(envelope::ok(status))
}

/// `GET /api/v1/devices/{id}/energy`
pub(crate) async fn device_energy(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let energy = state.service.device_energy(id).await?;
    Ok(envelope::ok(energy))
}
