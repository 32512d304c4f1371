use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::db::donors::DonorFields;
use crate::db::models::{Donor, Tag};
use crate::db;
use crate::error::{ok, ApiError, ApiResult};
use crate::filters::{DonorListParams, Pagination};
use crate::import;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListResponse {
    donors: Vec<Donor>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorDetail {
    #[serde(flatten)]
    donor: Donor,
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
pub struct UpdateDonorRequest {
    #[serde(flatten)]
    fields: DonorFields,
    #[serde(rename = "tagIds")]
    tag_ids: Option<Vec<Uuid>>,
}

pub async fn create_donor(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Json(fields): Json<DonorFields>,
) -> ApiResult<impl IntoResponse> {
    validate_identity(&fields)?;
    let donor = db::donors::create(&state.db, &fields).await?;
    Ok((StatusCode::CREATED, ok(donor)))
}

pub async fn list_donors(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(params): Query<DonorListParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = params.into_filter()?;
    let (donors, total) = db::donors::list(&state.db, &filter).await?;
    Ok(ok(DonorListResponse {
        donors,
        pagination: Pagination::new(total, &filter.page),
    }))
}

pub async fn get_donor(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let donor = db::donors::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Donor"))?;
    let tags = db::donors::tags_for(&state.db, id).await?;
    Ok(ok(DonorDetail { donor, tags }))
}

pub async fn update_donor(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateDonorRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_identity(&req.fields)?;
    let donor = db::donors::update_with_tags(&state.db, id, &req.fields, req.tag_ids.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Donor"))?;
    let tags = db::donors::tags_for(&state.db, id).await?;
    Ok(ok(DonorDetail { donor, tags }))
}

pub async fn delete_donor(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    if !db::donors::soft_delete(&state.db, id).await? {
        return Err(ApiError::not_found("Donor"));
    }
    Ok(ok("Donor deleted"))
}

pub async fn list_cities(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let cities = db::donors::distinct_cities(&state.db).await?;
    Ok(ok(cities))
}

/// Multipart CSV upload, field name "file".
pub async fn import_csv(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    let mut file: Option<Bytes> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Invalid multipart payload: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::Validation(format!("Could not read uploaded file: {e}")))?;
            file = Some(bytes);
        }
    }

    let bytes = file.ok_or_else(|| ApiError::Validation("No file uploaded".to_string()))?;
    let outcome = import::run_import(&state.db, &bytes).await?;
    Ok(ok(outcome))
}

fn validate_identity(fields: &DonorFields) -> Result<(), ApiError> {
    if fields.first_name.trim().is_empty()
        && fields.last_name.trim().is_empty()
        && fields.organization_name.trim().is_empty()
    {
        return Err(ApiError::Validation(
            "At least one of firstName, lastName, or organizationName is required".to_string(),
        ));
    }
    Ok(())
}
