use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// ApiError
///
/// The single error type returned by every handler. Domain rejections (insufficient role
/// privilege, wrong password, invalid verification code, bad upload) are all `BadRequest`
/// and reach the client as a 400 with a human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,
    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) | ApiError::Database(_) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (code, message) = match &self {
            ApiError::BadRequest(msg) => ("BAD_REQUEST", msg.clone()),
            ApiError::Validation(msg) => ("VALIDATION_ERROR", msg.clone()),
            ApiError::Unauthorized => ("UNAUTHORIZED", self.to_string()),
            ApiError::Forbidden => ("FORBIDDEN", self.to_string()),
            ApiError::NotFound => ("NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => ("CONFLICT", msg.clone()),
            // Internal details stay in the logs.
            ApiError::Storage(_) => ("STORAGE_ERROR", "Storage error".to_string()),
            ApiError::Database(_) => ("DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => ("INTERNAL_ERROR", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (self.status(), body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            sqlx::Error::Database(db_err) => {
                match db_err.code().as_deref() {
                    // unique violation (duplicate username / email)
                    Some("23505") => ApiError::Conflict("User already exists".to_string()),
                    // foreign key violation (role or department deleted meanwhile)
                    Some("23503") => ApiError::bad_request("Referenced record does not exist"),
                    _ => ApiError::Database(db_err.to_string()),
                }
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

/// Result type alias for handlers and collaborators.
pub type ApiResult<T> = Result<T, ApiError>;
