use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurveyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session conflict: {0}")]
    SessionConflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Oracle error: {0}")]
    Oracle(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SurveyError {
    /// Short error code string sent to clients as part of an error response body.
    pub fn code(&self) -> &'static str {
        match self {
            SurveyError::Config(_) => "CONFIG_ERROR",
            SurveyError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            SurveyError::HostNotFound(_) => "HOST_NOT_FOUND",
            SurveyError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            SurveyError::SessionConflict(_) => "SESSION_CONFLICT",
            SurveyError::Validation(_) => "VALIDATION_ERROR",
            SurveyError::Oracle(_) => "ORACLE_ERROR",
            SurveyError::Checkpoint(_) => "CHECKPOINT_ERROR",
            SurveyError::Storage(_) => "STORAGE_ERROR",
            SurveyError::Serialization(_) => "SERIALIZATION_ERROR",
            SurveyError::Io(_) => "IO_ERROR",
            SurveyError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SurveyError>;
