//! Event queries, including donor participation and collaborator writes.
//!
//! Participation-status changes and bulk donor edits run in one
//! transaction with their counter updates: `counted_invitation` and
//! `counted_attendance` may each flip false -> true exactly once per
//! donor-event row, and the matching donor counter increments in the same
//! commit. Collaborator writes compute an explicit old/new set diff so the
//! caller can audit exactly what changed.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use crate::db::models::{Event, EventParticipant, ParticipationStatus, Tag, User};
use crate::db::DbPool;
use crate::filters::{self, EventFilter};

/// Full event payload for create and owner replace.
#[derive(Debug, Clone)]
pub struct EventWrite {
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub location: Option<String>,
    pub status: String,
    pub capacity: Option<i32>,
}

/// Partial update for `PATCH /api/event/{id}/info`. Absent fields are left
/// untouched; `status` arrives pre-validated by the handler.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventInfoPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub donor_count: Option<i32>,
    pub tag_ids: Option<Vec<Uuid>>,
}

/// Result of a participation-status write.
#[derive(Debug)]
pub struct StatusChange {
    pub old_status: String,
    pub new_status: String,
}

/// Which donors a bulk edit actually added or removed. Donors already on
/// the event (or already absent) do not appear.
#[derive(Debug, Default)]
pub struct DonorEditOutcome {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

/// Collaborator set replacement diff.
#[derive(Debug, Default)]
pub struct CollaboratorDiff {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

/// Outcome of a collaborator set replacement: the applied diff, or the
/// first requested user id that does not exist.
#[derive(Debug)]
pub enum CollaboratorUpdate {
    Applied(CollaboratorDiff),
    UnknownUser(Uuid),
}

pub async fn create(
    pool: &DbPool,
    creator_id: Uuid,
    write: &EventWrite,
    tag_ids: Option<&[Uuid]>,
) -> Result<Event, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let event = sqlx::query_as::<_, Event>(
        "INSERT INTO events (name, description, date, location, status, capacity, creator_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(&write.name)
    .bind(&write.description)
    .bind(write.date)
    .bind(&write.location)
    .bind(&write.status)
    .bind(write.capacity)
    .bind(creator_id)
    .fetch_one(&mut *tx)
    .await?;

    if let Some(tag_ids) = tag_ids {
        replace_tags(&mut tx, event.id, tag_ids).await?;
    }

    tx.commit().await?;
    Ok(event)
}

pub async fn get(pool: &DbPool, id: Uuid) -> Result<Option<Event>, sqlx::Error> {
    sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1 AND is_deleted = FALSE")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Owner replace. Returns `None` when the event is absent or soft-deleted.
pub async fn update(
    pool: &DbPool,
    id: Uuid,
    write: &EventWrite,
    tag_ids: Option<&[Uuid]>,
) -> Result<Option<Event>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let event = sqlx::query_as::<_, Event>(
        "UPDATE events SET name = $1, description = $2, date = $3, location = $4, \
         status = $5, capacity = $6, updated_at = NOW() \
         WHERE id = $7 AND is_deleted = FALSE \
         RETURNING *",
    )
    .bind(&write.name)
    .bind(&write.description)
    .bind(write.date)
    .bind(&write.location)
    .bind(&write.status)
    .bind(write.capacity)
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(event) = event else {
        return Ok(None);
    };

    if let Some(tag_ids) = tag_ids {
        replace_tags(&mut tx, event.id, tag_ids).await?;
    }

    tx.commit().await?;
    Ok(Some(event))
}

/// Apply a partial info patch, replacing the tag set when one is given.
pub async fn update_info(
    pool: &DbPool,
    id: Uuid,
    patch: &EventInfoPatch,
) -> Result<Option<Event>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("UPDATE events SET updated_at = NOW()");
    if let Some(name) = &patch.name {
        qb.push(", name = ");
        qb.push_bind(name.clone());
    }
    if let Some(description) = &patch.description {
        qb.push(", description = ");
        qb.push_bind(description.clone());
    }
    if let Some(date) = patch.date {
        qb.push(", date = ");
        qb.push_bind(date);
    }
    if let Some(location) = &patch.location {
        qb.push(", location = ");
        qb.push_bind(location.clone());
    }
    if let Some(status) = &patch.status {
        qb.push(", status = ");
        qb.push_bind(status.clone());
    }
    if let Some(donor_count) = patch.donor_count {
        qb.push(", donor_count = ");
        qb.push_bind(donor_count);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.push(" AND is_deleted = FALSE RETURNING *");

    let event = qb
        .build_query_as::<Event>()
        .fetch_optional(&mut *tx)
        .await?;

    let Some(event) = event else {
        return Ok(None);
    };

    if let Some(tag_ids) = &patch.tag_ids {
        replace_tags(&mut tx, event.id, tag_ids).await?;
    }

    tx.commit().await?;
    Ok(Some(event))
}

pub async fn soft_delete(pool: &DbPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE events SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn list(
    pool: &DbPool,
    filter: &EventFilter,
) -> Result<(Vec<Event>, i64), sqlx::Error> {
    let mut count_qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM events e WHERE e.is_deleted = FALSE");
    filters::push_event_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT e.* FROM events e WHERE e.is_deleted = FALSE");
    filters::push_event_filters(&mut qb, filter);
    qb.push(" ORDER BY ");
    qb.push(filter.sort.order_by());
    qb.push(" LIMIT ");
    qb.push_bind(filter.page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filter.page.offset());
    let events = qb.build_query_as::<Event>().fetch_all(pool).await?;

    Ok((events, total))
}

/// Move one donor's participation to `status`, incrementing the donor's
/// counters on first qualifying transition only. Returns `None` when the
/// donor is not on the event.
pub async fn set_donor_status(
    pool: &DbPool,
    event_id: Uuid,
    donor_id: Uuid,
    status: ParticipationStatus,
    decline_reason: Option<&str>,
) -> Result<Option<StatusChange>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    // Lock the row so two concurrent edits cannot both observe an
    // uncounted flag.
    let row: Option<(Uuid, String, bool, bool)> = sqlx::query_as(
        "SELECT id, status, counted_invitation, counted_attendance \
         FROM donor_events \
         WHERE event_id = $1 AND donor_id = $2 \
         FOR UPDATE",
    )
    .bind(event_id)
    .bind(donor_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((row_id, old_status, counted_invitation, counted_attendance)) = row else {
        return Ok(None);
    };

    let count_invitation = status.counts_invitation() && !counted_invitation;
    let count_attendance = status.counts_attendance() && !counted_attendance;

    sqlx::query(
        "UPDATE donor_events SET status = $1, decline_reason = $2, \
         counted_invitation = counted_invitation OR $3, \
         counted_attendance = counted_attendance OR $4, \
         updated_at = NOW() \
         WHERE id = $5",
    )
    .bind(status.to_string())
    .bind(decline_reason)
    .bind(count_invitation)
    .bind(count_attendance)
    .bind(row_id)
    .execute(&mut *tx)
    .await?;

    if count_invitation {
        sqlx::query(
            "UPDATE donors SET total_invitations = total_invitations + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(donor_id)
        .execute(&mut *tx)
        .await?;
    }
    if count_attendance {
        sqlx::query(
            "UPDATE donors SET total_attendance = total_attendance + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(donor_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(Some(StatusChange {
        old_status,
        new_status: status.to_string(),
    }))
}

/// Bulk add/remove donors. New participants start as "invited" with the
/// invitation counted immediately. Adding a donor who is already on the
/// event is a no-op; removals delete the join row but never decrement
/// counters.
pub async fn edit_donors(
    pool: &DbPool,
    event_id: Uuid,
    add: &[Uuid],
    remove: &[Uuid],
) -> Result<DonorEditOutcome, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut outcome = DonorEditOutcome::default();

    if !add.is_empty() {
        outcome.added = sqlx::query_scalar(
            "INSERT INTO donor_events (donor_id, event_id, status, counted_invitation) \
             SELECT unnest($1::uuid[]), $2, 'invited', TRUE \
             ON CONFLICT (donor_id, event_id) DO NOTHING \
             RETURNING donor_id",
        )
        .bind(add)
        .bind(event_id)
        .fetch_all(&mut *tx)
        .await?;

        if !outcome.added.is_empty() {
            sqlx::query(
                "UPDATE donors SET total_invitations = total_invitations + 1, \
                 updated_at = NOW() \
                 WHERE id = ANY($1)",
            )
            .bind(&outcome.added)
            .execute(&mut *tx)
            .await?;
        }
    }

    if !remove.is_empty() {
        outcome.removed = sqlx::query_scalar(
            "DELETE FROM donor_events \
             WHERE event_id = $1 AND donor_id = ANY($2) \
             RETURNING donor_id",
        )
        .bind(event_id)
        .bind(remove)
        .fetch_all(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(outcome)
}

pub async fn participants(
    pool: &DbPool,
    event_id: Uuid,
) -> Result<Vec<EventParticipant>, sqlx::Error> {
    sqlx::query_as::<_, EventParticipant>(
        "SELECT de.donor_id, d.first_name, d.last_name, d.organization_name, \
                de.status, de.decline_reason \
         FROM donor_events de \
         JOIN donors d ON d.id = de.donor_id \
         WHERE de.event_id = $1 AND d.is_deleted = FALSE \
         ORDER BY d.last_name, d.first_name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

pub async fn collaborators(pool: &DbPool, event_id: Uuid) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT u.* FROM users u \
         JOIN event_collaborators ec ON ec.user_id = u.id \
         WHERE ec.event_id = $1 \
         ORDER BY u.name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

/// Replace the collaborator set, reporting which user ids were actually
/// added and removed. The requested ids are checked against `users` inside
/// the transaction; an unknown id rejects the request before any write.
pub async fn set_collaborators(
    pool: &DbPool,
    event_id: Uuid,
    user_ids: &[Uuid],
) -> Result<CollaboratorUpdate, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if !user_ids.is_empty() {
        let known: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM users WHERE id = ANY($1)")
            .bind(user_ids)
            .fetch_all(&mut *tx)
            .await?;
        if let Some(missing) = user_ids.iter().copied().find(|id| !known.contains(id)) {
            return Ok(CollaboratorUpdate::UnknownUser(missing));
        }
    }

    let current: Vec<Uuid> =
        sqlx::query_scalar("SELECT user_id FROM event_collaborators WHERE event_id = $1")
            .bind(event_id)
            .fetch_all(&mut *tx)
            .await?;

    let old_set: HashSet<Uuid> = current.iter().copied().collect();
    let new_set: HashSet<Uuid> = user_ids.iter().copied().collect();
    let mut diff = CollaboratorDiff {
        added: new_set.difference(&old_set).copied().collect(),
        removed: old_set.difference(&new_set).copied().collect(),
    };
    diff.added.sort();
    diff.removed.sort();

    if !diff.removed.is_empty() {
        sqlx::query("DELETE FROM event_collaborators WHERE event_id = $1 AND user_id = ANY($2)")
            .bind(event_id)
            .bind(&diff.removed)
            .execute(&mut *tx)
            .await?;
    }
    if !diff.added.is_empty() {
        sqlx::query(
            "INSERT INTO event_collaborators (event_id, user_id) \
             SELECT $1, unnest($2::uuid[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(&diff.added)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(CollaboratorUpdate::Applied(diff))
}

pub async fn is_collaborator(
    pool: &DbPool,
    event_id: Uuid,
    user_id: Uuid,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM event_collaborators \
         WHERE event_id = $1 AND user_id = $2)",
    )
    .bind(event_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
}

pub async fn tags_for(pool: &DbPool, event_id: Uuid) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t \
         JOIN event_tags et ON et.tag_id = t.id \
         WHERE et.event_id = $1 AND t.is_deleted = FALSE \
         ORDER BY t.name",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}

/// Raw tag assignment ids, ignoring tag soft-delete state. Used to diff
/// the before/after sets when a patch replaces tags.
pub async fn tag_ids_for(pool: &DbPool, event_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT tag_id FROM event_tags WHERE event_id = $1")
        .bind(event_id)
        .fetch_all(pool)
        .await
}

async fn replace_tags(
    tx: &mut Transaction<'_, Postgres>,
    event_id: Uuid,
    tag_ids: &[Uuid],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM event_tags WHERE event_id = $1")
        .bind(event_id)
        .execute(&mut **tx)
        .await?;
    if !tag_ids.is_empty() {
        sqlx::query(
            "INSERT INTO event_tags (event_id, tag_id) \
             SELECT $1, unnest($2::uuid[]) \
             ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .bind(tag_ids)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}
