use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use surveyengine_core::domain::Host;

use crate::app::AppState;
use crate::error::{error_response, ErrorBody};

type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

#[derive(Deserialize)]
pub struct HostPayload {
    pub name: String,
    pub role: String,
}

pub async fn list_hosts(State(state): State<Arc<AppState>>) -> JsonResult<Vec<Host>> {
    Ok(Json(state.hosts.list().map_err(error_response)?))
}

pub async fn get_host(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> JsonResult<Host> {
    Ok(Json(state.hosts.get(&id).map_err(error_response)?))
}

pub async fn create_host(State(state): State<Arc<AppState>>, Json(payload): Json<HostPayload>) -> JsonResult<Host> {
    Ok(Json(state.hosts.create(&payload.name, &payload.role).map_err(error_response)?))
}

pub async fn update_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<HostPayload>,
) -> JsonResult<Host> {
    Ok(Json(state.hosts.update(&id, Some(&payload.name), Some(&payload.role)).map_err(error_response)?))
}

pub async fn delete_host(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    state.hosts.delete(&id).map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
