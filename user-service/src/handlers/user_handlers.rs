use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, OriginalUri, Path, State,
    },
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use super::fail_span;
use crate::error::{AppError, Result};
use crate::models::{CreateUserRequest, UpdateUserRequest, UserResponse};
use crate::service::UserService;
use user_api_shared::store::UserStore;
use user_api_shared::telemetry::RequestSpan;

type Service<S> = State<Arc<UserService<S>>>;

const LIST_ERROR: &str = "An error occurred while retrieving users";
const GET_ERROR: &str = "An error occurred while retrieving the user";
const CREATE_ERROR: &str = "An error occurred while creating the user";
const UPDATE_ERROR: &str = "An error occurred while updating the user";
const DELETE_ERROR: &str = "An error occurred while deleting the user";

// GET /api/user
pub async fn get_users<S>(
    State(service): Service<S>,
    Extension(span): Extension<RequestSpan>,
) -> Result<Json<Vec<UserResponse>>>
where
    S: UserStore,
{
    span.set_operation("get_all_users");

    let users = service
        .list_all()
        .await
        .map_err(|e| fail_span(&span, AppError::from_service(e, LIST_ERROR)))?;
    Ok(Json(users))
}

// GET /api/user/:id
pub async fn get_user<S>(
    State(service): Service<S>,
    Extension(span): Extension<RequestSpan>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<UserResponse>>
where
    S: UserStore,
{
    span.set_operation("get_user_by_id");
    let Path(id) = id.map_err(|e| fail_span(&span, e))?;
    span.set_user_id(id);

    match service
        .get_by_id(id)
        .await
        .map_err(|e| fail_span(&span, AppError::from_service(e, GET_ERROR)))?
    {
        Some(user) => Ok(Json(user)),
        None => Err(fail_span(&span, AppError::user_not_found(id))),
    }
}

// POST /api/user
pub async fn create_user<S>(
    State(service): Service<S>,
    Extension(span): Extension<RequestSpan>,
    OriginalUri(uri): OriginalUri,
    payload: std::result::Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse>
where
    S: UserStore,
{
    span.set_operation("create_user");
    let Json(payload) = payload.map_err(|e| fail_span(&span, e))?;
    span.set_email_domain(&payload.email);
    payload.validate().map_err(|e| fail_span(&span, e))?;

    let user = service
        .create(payload.into())
        .await
        .map_err(|e| fail_span(&span, AppError::from_service(e, CREATE_ERROR)))?;
    span.set_user_id(user.id);

    let location = format!("{}/{}", uri.path().trim_end_matches('/'), user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(user),
    ))
}

// PUT and PATCH /api/user/:id
pub async fn update_user<S>(
    State(service): Service<S>,
    Extension(span): Extension<RequestSpan>,
    id: std::result::Result<Path<i64>, PathRejection>,
    payload: std::result::Result<Json<UpdateUserRequest>, JsonRejection>,
) -> Result<Json<UserResponse>>
where
    S: UserStore,
{
    span.set_operation("update_user");
    let Path(id) = id.map_err(|e| fail_span(&span, e))?;
    span.set_user_id(id);

    let Json(payload) = payload.map_err(|e| fail_span(&span, e))?;
    if let Some(email) = payload.email.as_deref().filter(|e| !e.is_empty()) {
        span.set_email_domain(email);
    }
    payload.validate().map_err(|e| fail_span(&span, e))?;

    match service
        .update(id, payload.into())
        .await
        .map_err(|e| fail_span(&span, AppError::from_service(e, UPDATE_ERROR)))?
    {
        Some(user) => Ok(Json(user)),
        None => Err(fail_span(&span, AppError::user_not_found(id))),
    }
}

// DELETE /api/user/:id
pub async fn delete_user<S>(
    State(service): Service<S>,
    Extension(span): Extension<RequestSpan>,
    id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<StatusCode>
where
    S: UserStore,
{
    span.set_operation("delete_user");
    let Path(id) = id.map_err(|e| fail_span(&span, e))?;
    span.set_user_id(id);

    let deleted = service
        .delete(id)
        .await
        .map_err(|e| fail_span(&span, AppError::from_service(e, DELETE_ERROR)))?;
    if deleted {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(fail_span(&span, AppError::user_not_found(id)))
    }
}
