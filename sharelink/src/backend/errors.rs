use thiserror::Error;

/// Unified error type for backend port operations that application code can handle
#[derive(Error, Debug)]
pub enum BackendError {
    /// Entity or object not found by the given identifier
    #[error("Entity not found")]
    NotFound,

    /// An object already exists under the key and overwriting was not allowed
    #[error("Object already exists at {key}")]
    AlreadyExists { key: String },

    /// Unique constraint violation
    #[error("Unique constraint violation")]
    UniqueViolation {
        constraint: Option<String>,
        table: Option<String>,
        message: String,
    },

    /// Storage key does not have the `{owner}/{uuid}.{ext}` shape
    #[error("Invalid storage key: {key}")]
    InvalidKey { key: String },

    /// Update rejected because it would break a record invariant
    #[error("Invalid update: {message}")]
    InvalidUpdate { message: String },

    /// Catch-all for non-recoverable errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convert from sqlx::Error using proper sqlx error categorization
impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => BackendError::NotFound,
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    BackendError::UniqueViolation {
                        constraint: db_err.constraint().map(|s| s.to_string()),
                        table: db_err.table().map(|s| s.to_string()),
                        message: db_err.message().to_string(),
                    }
                } else if db_err.is_check_violation() {
                    BackendError::InvalidUpdate {
                        message: db_err.message().to_string(),
                    }
                } else {
                    BackendError::Other(anyhow::Error::from(err))
                }
            }
            _ => BackendError::Other(anyhow::Error::from(err)),
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => BackendError::NotFound,
            _ => BackendError::Other(anyhow::Error::from(err)),
        }
    }
}

/// Type alias for backend operation results
pub type Result<T> = std::result::Result<T, BackendError>;
