//! Engine error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::response::ApiResponse;

/// Errors raised by the projection and filter engines.
///
/// Unknown filter keys and unknown sort columns are never errors; they are
/// ignored or replaced by the default sort.
#[derive(Debug, Error)]
pub enum Error {
    /// A definition references an operation that does not exist, or a
    /// definition could not be parsed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A caller-supplied operation (provider, formatter, guard, filter) failed.
    #[error("operation '{name}' failed")]
    Operation {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// Raised by authorisation collaborators; rendered as 403.
    #[error("{0}")]
    Authorisation(String),

    /// The query collaborator failed.
    #[error("query error")]
    Query(#[from] anyhow::Error),

    #[error("database error")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// Wrap a collaborator failure with the name of the operation that raised it.
    pub fn operation(name: &str, source: anyhow::Error) -> Self {
        Error::Operation {
            name: name.to_string(),
            source,
        }
    }

    /// HTTP status this error renders with.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Authorisation(_) => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Configuration and collaborator details stay in the logs
        let message = match &self {
            Error::Authorisation(message) => message.clone(),
            Error::Operation { name, source } => {
                tracing::error!(operation = %name, error = %source, "operation failed");
                "internal server error".to_string()
            }
            Error::Database(e) => {
                tracing::error!(error = %e, "database error");
                "internal server error".to_string()
            }
            other => {
                tracing::error!(error = %other, "internal server error");
                "internal server error".to_string()
            }
        };

        let body = ApiResponse::error(status, Some(message)).into_value();
        (status, Json(body)).into_response()
    }
}

/// Result type alias using the engine [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
