use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use validator::ValidationErrors;

use crate::service::ServiceError;
use user_api_shared::models::ErrorResponse;

pub const DUPLICATE_EMAIL_MESSAGE: &str = "A user with this email already exists.";

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// `message` goes to the client, `detail` only to the logs.
    #[error("Internal server error: {message}: {detail}")]
    InternalServerError {
        message: &'static str,
        detail: String,
    },
}

impl AppError {
    pub fn user_not_found(id: i64) -> Self {
        AppError::NotFound(format!("User with ID {} not found", id))
    }

    pub fn internal(message: &'static str, detail: impl ToString) -> Self {
        AppError::InternalServerError {
            message,
            detail: detail.to_string(),
        }
    }

    /// Maps a service failure, naming the operation for store errors.
    pub fn from_service(err: ServiceError, message: &'static str) -> Self {
        match err {
            ServiceError::DuplicateEmail(_) => AppError::Conflict(DUPLICATE_EMAIL_MESSAGE.into()),
            ServiceError::Store(err) => AppError::internal(message, err),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InternalServerError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message sent to the client. Internal details stay in the logs.
    pub fn public_message(&self) -> &str {
        match self {
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Conflict(msg) => msg,
            AppError::InternalServerError { message, .. } => message,
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(errors: ValidationErrors) -> Self {
        AppError::BadRequest(format!("Validation failed: {}", errors))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::InternalServerError { message, detail } => {
                tracing::error!("{}: {}", message, detail);
            }
            other => {
                tracing::warn!("{}", other);
            }
        }

        let body = ErrorResponse {
            error: self.public_message().to_string(),
        };
        tracing::info!("Returning error response: status={}", status);
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
