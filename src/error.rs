use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Connection not authorized: {0}")]
    Unauthorized(String),

    #[error("Decryption failed: {0}")]
    Crypto(String),

    #[error("Checksum validation failed")]
    ChecksumMismatch,

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("No valid installation scripts found for {0}")]
    ScriptNotFound(String),

    #[error("OS '{0}' is not supported")]
    UnsupportedOs(String),

    #[error("Script execution timed out after {0} seconds")]
    ProcessTimeout(u64),

    #[error("Exception: {0}")]
    ProcessLaunch(String),

    #[error("No active upload session found")]
    NoActiveSession,

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::Execution(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::FORBIDDEN,
            AppError::ExecutionNotFound(_) | AppError::ScriptNotFound(_) => StatusCode::NOT_FOUND,
            AppError::NoActiveSession => StatusCode::CONFLICT,
            AppError::Crypto(_)
            | AppError::ChecksumMismatch
            | AppError::Archive(_)
            | AppError::UnsupportedOs(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ProcessTimeout(_) | AppError::ProcessLaunch(_) | AppError::Io(_) => {
                tracing::error!("Internal error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = json!({
            "error": self.to_string()
        });

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
