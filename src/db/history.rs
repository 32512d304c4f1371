//! Event edit history persistence. Rows are append-only; nothing here
//! updates or deletes.

use uuid::Uuid;

use crate::audit::HistoryEntry;
use crate::db::models::EventEditHistoryWithEditor;
use crate::db::DbPool;

pub async fn insert(pool: &DbPool, entry: &HistoryEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO event_edit_history \
         (event_id, editor_id, edit_type, old_value, new_value, meta) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(entry.event_id)
    .bind(entry.editor_id)
    .bind(&entry.edit_type)
    .bind(&entry.old_value)
    .bind(&entry.new_value)
    .bind(&entry.meta)
    .execute(pool)
    .await?;
    Ok(())
}

/// Newest-first history feed with the editor's display name joined in.
pub async fn list_for_event(
    pool: &DbPool,
    event_id: Uuid,
) -> Result<Vec<EventEditHistoryWithEditor>, sqlx::Error> {
    sqlx::query_as::<_, EventEditHistoryWithEditor>(
        "SELECT h.id, h.event_id, h.editor_id, h.edit_type, h.old_value, h.new_value, \
                h.meta, h.created_at, u.name AS editor_name \
         FROM event_edit_history h \
         JOIN users u ON u.id = h.editor_id \
         WHERE h.event_id = $1 \
         ORDER BY h.created_at DESC",
    )
    .bind(event_id)
    .fetch_all(pool)
    .await
}
