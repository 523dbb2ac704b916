use aws_sdk_dynamodb::error::{BuildError, SdkError};
use thiserror::Error;

use crate::telemetry::redact::redact_email;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Failures raised by a `UserStore`.
///
/// `DuplicateEmail` carries the redacted address only, so the error can be
/// logged or attached to a span as-is.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("A user with email {0} already exists")]
    DuplicateEmail(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl StoreError {
    /// Builds a `DuplicateEmail` error from a raw address.
    pub fn duplicate_email(email: &str) -> Self {
        StoreError::DuplicateEmail(redact_email(email))
    }
}

// Helper function to map general DynamoDB errors
pub fn map_dynamo_error<E>(operation: &str, err: SdkError<E>) -> StoreError
where
    E: std::error::Error + 'static,
{
    StoreError::InternalError(format!("DynamoDB {} error: {}", operation, err))
}

impl From<BuildError> for StoreError {
    fn from(err: BuildError) -> Self {
        StoreError::InternalError(format!("DynamoDB request build error: {}", err))
    }
}

impl From<serde_dynamo::Error> for StoreError {
    fn from(err: serde_dynamo::Error) -> Self {
        StoreError::InternalError(format!("DynamoDB serialization error: {}", err))
    }
}
