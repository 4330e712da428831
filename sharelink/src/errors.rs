use crate::backend::errors::BackendError;
use crate::files::UploadError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error as ThisError;

/// Shown for any upload that failed on the backend side
pub const UPLOAD_FAILED_MESSAGE: &str = "Upload failed. Please try again.";

#[derive(ThisError, Debug)]
pub enum Error {
    /// Authentication required but not provided
    #[error("Not authenticated")]
    Unauthenticated { message: Option<String> },

    /// Invalid request data or business rule violation
    #[error("{message}")]
    BadRequest { message: String },

    /// Generic internal service error
    #[error("Failed to {operation}")]
    Internal { operation: String },

    /// Upload pipeline failure
    #[error(transparent)]
    Upload(#[from] UploadError),

    /// Backend port error
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// Conflict error, e.g., for unique constraint violations
    #[error("Conflict: {message}")]
    Conflict { message: String },
}

impl Error {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            Error::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Upload(upload_err) => match upload_err {
                UploadError::NothingSelected | UploadError::EmptyFileName => StatusCode::BAD_REQUEST,
                UploadError::NotSignedIn => StatusCode::UNAUTHORIZED,
                UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                UploadError::Transfer(_) | UploadError::PublicUrl(_) | UploadError::Record(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Backend(backend_err) => match backend_err {
                BackendError::NotFound => StatusCode::NOT_FOUND,
                BackendError::AlreadyExists { .. } | BackendError::UniqueViolation { .. } => StatusCode::CONFLICT,
                BackendError::InvalidKey { .. } | BackendError::InvalidUpdate { .. } => StatusCode::BAD_REQUEST,
                BackendError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Conflict { .. } => StatusCode::CONFLICT,
        }
    }

    /// Returns a user-safe error message, without leaking internal implementation details
    pub fn user_message(&self) -> String {
        match self {
            Error::Unauthenticated { message } => message.clone().unwrap_or_else(|| "Authentication required".to_string()),
            Error::BadRequest { message } => message.clone(),
            Error::Internal { .. } => "Internal server error".to_string(),
            Error::Upload(upload_err) => match upload_err {
                UploadError::NothingSelected => "Please select a file to upload".to_string(),
                UploadError::EmptyFileName => "The selected file has no name".to_string(),
                UploadError::NotSignedIn => "Please sign in to upload files".to_string(),
                UploadError::TooLarge { max, .. } => {
                    format!("File size exceeds maximum allowed size of {}", crate::format::format_file_size(*max))
                }
                UploadError::Transfer(_) | UploadError::PublicUrl(_) | UploadError::Record(_) => UPLOAD_FAILED_MESSAGE.to_string(),
            },
            Error::Backend(backend_err) => match backend_err {
                BackendError::NotFound => "Resource not found".to_string(),
                BackendError::AlreadyExists { .. } | BackendError::UniqueViolation { .. } => "Resource already exists".to_string(),
                BackendError::InvalidKey { .. } => "Invalid object key".to_string(),
                BackendError::InvalidUpdate { .. } => "Invalid data provided".to_string(),
                BackendError::Other(_) => "Storage error occurred".to_string(),
            },
            Error::Other(_) => "Internal server error".to_string(),
            Error::Conflict { message } => message.clone(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::Backend(BackendError::Other(_))
            | Error::Upload(UploadError::Transfer(_) | UploadError::PublicUrl(_) | UploadError::Record(_))
            | Error::Internal { .. }
            | Error::Other(_) => {
                tracing::error!("Internal service error: {:#}", self);
            }
            Error::Backend(_) => {
                tracing::warn!("Backend constraint error: {}", self);
            }
            Error::Unauthenticated { .. } | Error::Upload(UploadError::NotSignedIn) => {
                tracing::info!("Authorization error: {}", self);
            }
            Error::BadRequest { .. } | Error::Upload(_) => {
                tracing::debug!("Client error: {}", self);
            }
            Error::Conflict { .. } => {
                tracing::warn!("Conflict error: {}", self);
            }
        }

        let status = self.status_code();
        let body = json!({ "message": self.user_message() });
        (status, axum::response::Json(body)).into_response()
    }
}

/// Type alias for service operation results
pub type Result<T> = std::result::Result<T, Error>;
