use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::db;
use crate::db::models::User;
use crate::error::{ok, ApiResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct UserSearchParams {
    #[serde(default)]
    query: String,
}

pub async fn list_users(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> ApiResult<impl IntoResponse> {
    let users = db::users::list_all(&state.db).await?;
    Ok(ok(users))
}

pub async fn search_users(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(params): Query<UserSearchParams>,
) -> ApiResult<impl IntoResponse> {
    let query = params.query.trim();
    if query.is_empty() {
        return Ok(ok(Vec::<User>::new()));
    }
    let users = db::users::search(&state.db, query).await?;
    Ok(ok(users))
}
