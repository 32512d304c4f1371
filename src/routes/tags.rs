use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::tags::TagFields;
use crate::error::{ok, ApiError, ApiResult};
use crate::AppState;

pub async fn create_tag(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(fields): Json<TagFields>,
) -> ApiResult<impl IntoResponse> {
    validate_name(&fields.name)?;
    let tag = db::tags::create(&state.db, &fields)
        .await
        .map_err(map_tag_error)?;
    Ok((StatusCode::CREATED, ok(tag)))
}

pub async fn list_tags(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let tags = db::tags::list(&state.db).await?;
    Ok(ok(tags))
}

pub async fn update_tag(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(fields): Json<TagFields>,
) -> ApiResult<impl IntoResponse> {
    validate_name(&fields.name)?;
    let tag = db::tags::update(&state.db, id, &fields)
        .await
        .map_err(map_tag_error)?
        .ok_or_else(|| ApiError::not_found("Tag"))?;
    Ok(ok(tag))
}

pub async fn delete_tag(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if !db::tags::soft_delete(&state.db, id).await? {
        return Err(ApiError::not_found("Tag"));
    }
    Ok(ok("Tag deleted"))
}

fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("Tag name is required".to_string()));
    }
    Ok(())
}

fn map_tag_error(e: sqlx::Error) -> ApiError {
    if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
        return ApiError::Validation("A tag with this name already exists".to_string());
    }
    ApiError::Database(e)
}
