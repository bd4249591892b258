use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use surveyengine_core::error::SurveyError;

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

/// Maps a domain error onto the HTTP status its error table names, the
/// same per-variant status mapping the source's routers apply by hand in
/// each handler's `except` clause.
fn status_for(err: &SurveyError) -> StatusCode {
    match err {
        SurveyError::TemplateNotFound(_) | SurveyError::HostNotFound(_) | SurveyError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        SurveyError::SessionConflict(_) => StatusCode::CONFLICT,
        SurveyError::Validation(_) => StatusCode::BAD_REQUEST,
        SurveyError::Config(_) | SurveyError::Internal(_) | SurveyError::Serialization(_) | SurveyError::Io(_) | SurveyError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SurveyError::Oracle(_) | SurveyError::Checkpoint(_) => StatusCode::BAD_GATEWAY,
    }
}

pub fn error_response(err: SurveyError) -> (StatusCode, Json<ErrorBody>) {
    let status = status_for(&err);
    let code = err.code();
    (status, Json(ErrorBody { error: err.to_string(), code }))
}
