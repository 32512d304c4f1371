use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::audit::{self, edit_type, HistoryEntry};
use crate::auth::AuthenticatedUser;
use crate::db::events::{CollaboratorUpdate, EventInfoPatch, EventWrite};
use crate::db::models::{
    Event, EventEditHistoryWithEditor, EventParticipant, EventStatus, ParticipationStatus, Tag,
    User,
};
use crate::db::{self, DbPool};
use crate::error::{ok, ApiError, ApiResult};
use crate::filters::{EventListParams, Pagination};
use crate::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    date: DateTime<Utc>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    capacity: Option<i32>,
    #[serde(default)]
    tag_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    date: DateTime<Utc>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    capacity: Option<i32>,
    #[serde(default)]
    tag_ids: Option<Vec<Uuid>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorStatusRequest {
    donor_id: Uuid,
    status: String,
    #[serde(default)]
    decline_reason: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EditDonorsRequest {
    add_donor_ids: Vec<Uuid>,
    remove_donor_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCollaboratorsRequest {
    user_ids: Vec<Uuid>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListResponse {
    events: Vec<Event>,
    pagination: Pagination,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetail {
    #[serde(flatten)]
    event: Event,
    tags: Vec<Tag>,
    collaborators: Vec<User>,
    participants: Vec<EventParticipant>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorStatusResponse {
    donor_id: Uuid,
    old_status: String,
    new_status: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditDonorsResponse {
    added: Vec<Uuid>,
    removed: Vec<Uuid>,
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<CreateEventRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Event name is required".to_string()));
    }
    let status = parse_event_status(req.status.as_deref())?.unwrap_or(EventStatus::Draft);

    let write = EventWrite {
        name: req.name,
        description: req.description,
        date: req.date,
        location: req.location,
        status: status.to_string(),
        capacity: req.capacity,
    };
    let event = db::events::create(&state.db, user.id, &write, req.tag_ids.as_deref()).await?;
    Ok((StatusCode::CREATED, ok(event)))
}

pub async fn list_events(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Query(params): Query<EventListParams>,
) -> ApiResult<impl IntoResponse> {
    let filter = params.into_filter()?;
    let (events, total) = db::events::list(&state.db, &filter).await?;
    Ok(ok(EventListResponse {
        events,
        pagination: Pagination::new(total, &filter.page),
    }))
}

pub async fn get_event(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    let detail = load_detail(&state.db, event).await?;
    Ok(ok(detail))
}

/// Owner-only full replace.
pub async fn update_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateEventRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("Event name is required".to_string()));
    }
    let event = fetch_event(&state.db, id).await?;
    require_owner(&event, user.id)?;

    let status = match parse_event_status(req.status.as_deref())? {
        Some(status) => status.to_string(),
        None => event.status.clone(),
    };
    let write = EventWrite {
        name: req.name,
        description: req.description,
        date: req.date,
        location: req.location,
        status,
        capacity: req.capacity,
    };
    let updated = db::events::update(&state.db, id, &write, req.tag_ids.as_deref())
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;
    Ok(ok(updated))
}

/// Owner-only soft delete.
pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    require_owner(&event, user.id)?;

    if !db::events::soft_delete(&state.db, id).await? {
        return Err(ApiError::not_found("Event"));
    }
    Ok(ok("Event deleted"))
}

/// Partial update with history tracking; open to the owner and
/// collaborators. History entries are computed against the stored event
/// before the write and queued only after it commits.
pub async fn update_event_info(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<EventInfoPatch>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    require_owner_or_collaborator(&state.db, &event, user.id).await?;
    if let Some(status) = patch.status.as_deref() {
        status
            .parse::<EventStatus>()
            .map_err(|e| ApiError::Validation(e.to_string()))?;
    }

    let old_tag_ids = match &patch.tag_ids {
        Some(_) => Some(db::events::tag_ids_for(&state.db, id).await?),
        None => None,
    };
    let entries = audit::tracked_field_changes(&event, &patch, user.id);

    let updated = db::events::update_info(&state.db, id, &patch)
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))?;

    state.audit.record_all(entries);
    if let (Some(old), Some(new)) = (old_tag_ids, &patch.tag_ids) {
        if let Some(entry) = audit::tag_change_entry(id, user.id, &old, new) {
            state.audit.record(entry);
        }
    }

    Ok(ok(updated))
}

pub async fn update_donor_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<DonorStatusRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    require_owner_or_collaborator(&state.db, &event, user.id).await?;

    let status: ParticipationStatus = req
        .status
        .parse()
        .map_err(|e: anyhow::Error| ApiError::Validation(e.to_string()))?;
    let has_reason = req
        .decline_reason
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    if has_reason && status != ParticipationStatus::Declined {
        return Err(ApiError::Validation(
            "declineReason can only be set when status is declined".to_string(),
        ));
    }
    let reason = if status == ParticipationStatus::Declined {
        req.decline_reason.as_deref().map(str::trim)
    } else {
        None
    };

    let change = db::events::set_donor_status(&state.db, id, req.donor_id, status, reason)
        .await?
        .ok_or_else(|| ApiError::not_found("Donor on this event"))?;

    state.audit.record(HistoryEntry {
        event_id: id,
        editor_id: user.id,
        edit_type: edit_type::DONOR_STATUS_UPDATED.to_string(),
        old_value: Some(change.old_status.clone()),
        new_value: Some(change.new_status.clone()),
        meta: Some(json!({ "donorId": req.donor_id })),
    });

    Ok(ok(DonorStatusResponse {
        donor_id: req.donor_id,
        old_status: change.old_status,
        new_status: change.new_status,
    }))
}

pub async fn edit_donors(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<EditDonorsRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    require_owner_or_collaborator(&state.db, &event, user.id).await?;

    let outcome =
        db::events::edit_donors(&state.db, id, &req.add_donor_ids, &req.remove_donor_ids).await?;

    if !outcome.added.is_empty() {
        state.audit.record(HistoryEntry {
            event_id: id,
            editor_id: user.id,
            edit_type: edit_type::DONORS_ADDED.to_string(),
            old_value: None,
            new_value: Some(outcome.added.len().to_string()),
            meta: Some(json!({ "donorIds": outcome.added })),
        });
    }
    if !outcome.removed.is_empty() {
        state.audit.record(HistoryEntry {
            event_id: id,
            editor_id: user.id,
            edit_type: edit_type::DONORS_REMOVED.to_string(),
            old_value: Some(outcome.removed.len().to_string()),
            new_value: None,
            meta: Some(json!({ "donorIds": outcome.removed })),
        });
    }

    Ok(ok(EditDonorsResponse {
        added: outcome.added,
        removed: outcome.removed,
    }))
}

pub async fn get_collaborators(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    fetch_event(&state.db, id).await?;
    let collaborators = db::events::collaborators(&state.db, id).await?;
    Ok(ok(collaborators))
}

/// Owner-only collaborator set replace. The owner cannot appear in the
/// new set.
pub async fn set_collaborators(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(req): Json<SetCollaboratorsRequest>,
) -> ApiResult<impl IntoResponse> {
    let event = fetch_event(&state.db, id).await?;
    require_owner(&event, user.id)?;
    if req.user_ids.contains(&event.creator_id) {
        return Err(ApiError::Validation(
            "The event owner cannot be added as a collaborator".to_string(),
        ));
    }

    let diff = match db::events::set_collaborators(&state.db, id, &req.user_ids).await? {
        CollaboratorUpdate::Applied(diff) => diff,
        CollaboratorUpdate::UnknownUser(user_id) => {
            return Err(ApiError::Validation(format!(
                "User {user_id} does not exist"
            )));
        }
    };

    for user_id in &diff.added {
        state.audit.record(HistoryEntry {
            event_id: id,
            editor_id: user.id,
            edit_type: edit_type::COLLABORATOR_ADDED.to_string(),
            old_value: None,
            new_value: Some(user_id.to_string()),
            meta: None,
        });
    }
    for user_id in &diff.removed {
        state.audit.record(HistoryEntry {
            event_id: id,
            editor_id: user.id,
            edit_type: edit_type::COLLABORATOR_REMOVED.to_string(),
            old_value: Some(user_id.to_string()),
            new_value: None,
            meta: None,
        });
    }

    let collaborators = db::events::collaborators(&state.db, id).await?;
    Ok(ok(collaborators))
}

pub async fn get_history(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    fetch_event(&state.db, id).await?;
    let history: Vec<EventEditHistoryWithEditor> =
        db::history::list_for_event(&state.db, id).await?;
    Ok(ok(history))
}

async fn fetch_event(pool: &DbPool, id: Uuid) -> Result<Event, ApiError> {
    db::events::get(pool, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Event"))
}

async fn load_detail(pool: &DbPool, event: Event) -> Result<EventDetail, ApiError> {
    let tags = db::events::tags_for(pool, event.id).await?;
    let collaborators = db::events::collaborators(pool, event.id).await?;
    let participants = db::events::participants(pool, event.id).await?;
    Ok(EventDetail {
        event,
        tags,
        collaborators,
        participants,
    })
}

fn require_owner(event: &Event, user_id: Uuid) -> Result<(), ApiError> {
    if event.creator_id != user_id {
        return Err(ApiError::Forbidden(
            "Only the event owner can do this".to_string(),
        ));
    }
    Ok(())
}

async fn require_owner_or_collaborator(
    pool: &DbPool,
    event: &Event,
    user_id: Uuid,
) -> Result<(), ApiError> {
    if event.creator_id == user_id {
        return Ok(());
    }
    if db::events::is_collaborator(pool, event.id, user_id).await? {
        return Ok(());
    }
    Err(ApiError::Forbidden(
        "You do not have access to this event".to_string(),
    ))
}

fn parse_event_status(raw: Option<&str>) -> Result<Option<EventStatus>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => s
            .parse::<EventStatus>()
            .map(Some)
            .map_err(|e| ApiError::Validation(e.to_string())),
    }
}
