use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use surveyengine_core::domain::Template;
use surveyengine_core::error::SurveyError;
use surveyengine_core::resolver::TemplateLoader;

use crate::app::{AppState, TemplateBackend};
use crate::error::{error_response, ErrorBody};

type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

fn require_database(state: &AppState) -> Result<&surveyengine_store::TemplateStore, (StatusCode, Json<ErrorBody>)> {
    match &state.templates {
        TemplateBackend::Database(store) => Ok(store),
        TemplateBackend::File(_) => Err(error_response(SurveyError::Validation(
            "template store is read-only while running in file mode".into(),
        ))),
    }
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> JsonResult<Vec<Template>> {
    let templates = match &state.templates {
        TemplateBackend::Database(store) => store.list().map_err(error_response)?,
        TemplateBackend::File(loader) => loader.list().to_vec(),
    };
    Ok(Json(templates))
}

pub async fn get_template(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> JsonResult<Template> {
    Ok(Json(state.templates.get(&id).map_err(error_response)?))
}

pub async fn create_template(State(state): State<Arc<AppState>>, Json(template): Json<Template>) -> JsonResult<Template> {
    let store = require_database(&state)?;
    Ok(Json(store.create(template).map_err(error_response)?))
}

pub async fn update_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(mut template): Json<Template>,
) -> JsonResult<Template> {
    let store = require_database(&state)?;
    template.id = id;
    Ok(Json(store.update(template).map_err(error_response)?))
}

pub async fn delete_template(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<StatusCode, (StatusCode, Json<ErrorBody>)> {
    let store = require_database(&state)?;
    store.delete(&id).map_err(error_response)?;
    Ok(StatusCode::NO_CONTENT)
}
