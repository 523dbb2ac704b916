use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::service::{NewUser, UserPatch};
use user_api_shared::models::UserRecord;

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

// Request DTOs
#[derive(Deserialize, Debug, Validate)]
pub struct CreateUserRequest {
    #[serde(rename = "firstName")]
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub first_name: String,
    #[serde(rename = "lastName")]
    #[validate(length(min = 1, max = 100), custom(function = "validate_not_blank"))]
    pub last_name: String,
    #[validate(email, length(max = 255))]
    pub email: String,
    #[serde(rename = "phoneNumber", default)]
    #[validate(length(max = 20))]
    pub phone_number: Option<String>,
}

/// Partial update. A missing field and an explicit `null` both mean
/// "leave unchanged".
#[derive(Deserialize, Debug, Default, Validate)]
pub struct UpdateUserRequest {
    #[serde(rename = "firstName", default)]
    #[validate(length(max = 100))]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", default)]
    #[validate(length(max = 100))]
    pub last_name: Option<String>,
    #[serde(default)]
    #[validate(email, length(max = 255))]
    pub email: Option<String>,
    #[serde(rename = "phoneNumber", default)]
    #[validate(length(max = 20))]
    pub phone_number: Option<String>,
}

impl From<CreateUserRequest> for NewUser {
    fn from(request: CreateUserRequest) -> Self {
        NewUser {
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            phone_number: request.phone_number,
        }
    }
}

impl From<UpdateUserRequest> for UserPatch {
    fn from(request: UpdateUserRequest) -> Self {
        UserPatch {
            first_name: request.first_name,
            last_name: request.last_name,
            email: request.email,
            phone_number: request.phone_number,
        }
    }
}

// Response DTOs
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UserResponse {
    pub id: i64,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    pub email: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl From<UserRecord> for UserResponse {
    fn from(user: UserRecord) -> Self {
        UserResponse {
            id: user.id,
            first_name: user.first_name,
            last_name: user.last_name,
            email: user.email,
            phone_number: user.phone_number,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}
