//! Event edit auditing.
//!
//! History rows are best-effort: handlers hand entries to an
//! [`AuditRecorder`], which queues them on an unbounded channel after the
//! primary write has committed. A background task drains the queue into
//! `event_edit_history`; a failed insert is logged and dropped, never
//! surfaced to the request that caused it.

use chrono::{DateTime, Datelike, Utc};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::db::events::EventInfoPatch;
use crate::db::models::Event;
use crate::db::{self, DbPool};

/// Edit-type tags. The column is an open string set; these are the values
/// this codebase writes.
pub mod edit_type {
    pub const NAME_UPDATED: &str = "name_updated";
    pub const DESCRIPTION_UPDATED: &str = "description_updated";
    pub const LOCATION_UPDATED: &str = "location_updated";
    pub const STATUS_UPDATED: &str = "status_updated";
    pub const DATE_UPDATED: &str = "date_updated";
    pub const DONOR_COUNT_UPDATED: &str = "donor_count_updated";
    pub const TAGS_UPDATED: &str = "tags_updated";
    pub const DONOR_STATUS_UPDATED: &str = "donor_status_updated";
    pub const DONORS_ADDED: &str = "donors_added";
    pub const DONORS_REMOVED: &str = "donors_removed";
    pub const COLLABORATOR_ADDED: &str = "collaborator_added";
    pub const COLLABORATOR_REMOVED: &str = "collaborator_removed";
}

/// One pending history row.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub event_id: Uuid,
    pub editor_id: Uuid,
    pub edit_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub meta: Option<JsonValue>,
}

/// Cheap-to-clone handle for queueing history writes.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::UnboundedSender<HistoryEntry>,
}

impl AuditRecorder {
    /// Start the drain task. The task ends once every recorder clone has
    /// been dropped and the queue is empty, which is what lets tests (and
    /// shutdown) await a full flush via the returned handle.
    pub fn spawn(pool: DbPool) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<HistoryEntry>();
        let handle = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(e) = db::history::insert(&pool, &entry).await {
                    tracing::warn!(
                        event_id = %entry.event_id,
                        edit_type = %entry.edit_type,
                        error = %e,
                        "failed to write event history row"
                    );
                }
            }
        });
        (Self { tx }, handle)
    }

    pub fn record(&self, entry: HistoryEntry) {
        if self.tx.send(entry).is_err() {
            tracing::warn!("history queue is closed; dropping audit entry");
        }
    }

    pub fn record_all(&self, entries: Vec<HistoryEntry>) {
        for entry in entries {
            self.record(entry);
        }
    }

    #[cfg(test)]
    fn test_pair() -> (Self, mpsc::UnboundedReceiver<HistoryEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

/// Diff an info patch against the stored event: at most one entry per
/// tracked field, and only for fields that are present in the patch and
/// actually different. Dates compare as instants so a reformatted but
/// identical timestamp is not a change; everything else compares as
/// strings, with absent stored values reading as empty.
pub fn tracked_field_changes(
    event: &Event,
    patch: &EventInfoPatch,
    editor_id: Uuid,
) -> Vec<HistoryEntry> {
    let mut entries = Vec::new();
    let entry = |edit_type: &str, old: Option<String>, new: Option<String>, meta| HistoryEntry {
        event_id: event.id,
        editor_id,
        edit_type: edit_type.to_string(),
        old_value: old,
        new_value: new,
        meta,
    };

    if let Some(name) = &patch.name {
        if *name != event.name {
            entries.push(entry(
                edit_type::NAME_UPDATED,
                Some(event.name.clone()),
                Some(name.clone()),
                None,
            ));
        }
    }
    if let Some(description) = &patch.description {
        if description.as_str() != event.description.as_deref().unwrap_or("") {
            entries.push(entry(
                edit_type::DESCRIPTION_UPDATED,
                event.description.clone(),
                Some(description.clone()),
                None,
            ));
        }
    }
    if let Some(location) = &patch.location {
        if location.as_str() != event.location.as_deref().unwrap_or("") {
            entries.push(entry(
                edit_type::LOCATION_UPDATED,
                event.location.clone(),
                Some(location.clone()),
                None,
            ));
        }
    }
    if let Some(status) = &patch.status {
        if *status != event.status {
            entries.push(entry(
                edit_type::STATUS_UPDATED,
                Some(event.status.clone()),
                Some(status.clone()),
                None,
            ));
        }
    }
    if let Some(date) = patch.date {
        if date != event.date {
            entries.push(entry(
                edit_type::DATE_UPDATED,
                Some(event.date.to_rfc3339()),
                Some(date.to_rfc3339()),
                Some(json!({ "formattedDate": format_history_date(date) })),
            ));
        }
    }
    if let Some(donor_count) = patch.donor_count {
        if donor_count != event.donor_count {
            entries.push(entry(
                edit_type::DONOR_COUNT_UPDATED,
                Some(event.donor_count.to_string()),
                Some(donor_count.to_string()),
                None,
            ));
        }
    }

    entries
}

/// Tag ids a reassignment added and removed, or `None` when the sets are
/// equal (re-saving the same tags is not a change).
#[derive(Debug, PartialEq, Eq)]
pub struct TagSetDiff {
    pub added: Vec<Uuid>,
    pub removed: Vec<Uuid>,
}

pub fn diff_tag_sets(old: &[Uuid], new: &[Uuid]) -> Option<TagSetDiff> {
    use std::collections::HashSet;
    let old_set: HashSet<Uuid> = old.iter().copied().collect();
    let new_set: HashSet<Uuid> = new.iter().copied().collect();

    let mut added: Vec<Uuid> = new_set.difference(&old_set).copied().collect();
    let mut removed: Vec<Uuid> = old_set.difference(&new_set).copied().collect();
    if added.is_empty() && removed.is_empty() {
        return None;
    }
    added.sort();
    removed.sort();
    Some(TagSetDiff { added, removed })
}

/// One `tags_updated` entry carrying the full old/new sets plus the diff,
/// or `None` for a no-op reassignment.
pub fn tag_change_entry(
    event_id: Uuid,
    editor_id: Uuid,
    old: &[Uuid],
    new: &[Uuid],
) -> Option<HistoryEntry> {
    let diff = diff_tag_sets(old, new)?;
    Some(HistoryEntry {
        event_id,
        editor_id,
        edit_type: edit_type::TAGS_UPDATED.to_string(),
        old_value: Some(join_ids(old)),
        new_value: Some(join_ids(new)),
        meta: Some(json!({ "added": diff.added, "removed": diff.removed })),
    })
}

fn join_ids(ids: &[Uuid]) -> String {
    ids.iter()
        .map(Uuid::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Human form used in the date-change metadata, e.g. "June 3rd, 2025".
pub fn format_history_date(date: DateTime<Utc>) -> String {
    let day = date.day();
    format!(
        "{} {}{}, {}",
        date.format("%B"),
        day,
        ordinal_suffix(day),
        date.year()
    )
}

fn ordinal_suffix(day: u32) -> &'static str {
    match day % 100 {
        11 | 12 | 13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_event() -> Event {
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 17, 0, 0).unwrap();
        Event {
            id: Uuid::new_v4(),
            name: "Spring Gala".to_string(),
            description: None,
            date: now,
            location: Some("Harbour Hall".to_string()),
            status: "published".to_string(),
            capacity: Some(200),
            donor_count: 40,
            creator_id: Uuid::new_v4(),
            is_deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn absent_fields_produce_no_entries() {
        let event = sample_event();
        let entries = tracked_field_changes(&event, &EventInfoPatch::default(), Uuid::new_v4());
        assert!(entries.is_empty());
    }

    #[test]
    fn unchanged_values_produce_no_entries() {
        let event = sample_event();
        let patch = EventInfoPatch {
            name: Some("Spring Gala".to_string()),
            location: Some("Harbour Hall".to_string()),
            date: Some(event.date),
            donor_count: Some(40),
            ..Default::default()
        };
        assert!(tracked_field_changes(&event, &patch, Uuid::new_v4()).is_empty());
    }

    #[test]
    fn empty_patch_string_matches_absent_stored_value() {
        let event = sample_event();
        let patch = EventInfoPatch {
            description: Some(String::new()),
            ..Default::default()
        };
        assert!(tracked_field_changes(&event, &patch, Uuid::new_v4()).is_empty());
    }

    #[test]
    fn one_entry_per_changed_field() {
        let event = sample_event();
        let patch = EventInfoPatch {
            name: Some("Autumn Gala".to_string()),
            donor_count: Some(55),
            ..Default::default()
        };
        let entries = tracked_field_changes(&event, &patch, Uuid::new_v4());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].edit_type, edit_type::NAME_UPDATED);
        assert_eq!(entries[0].old_value.as_deref(), Some("Spring Gala"));
        assert_eq!(entries[0].new_value.as_deref(), Some("Autumn Gala"));
        assert_eq!(entries[1].edit_type, edit_type::DONOR_COUNT_UPDATED);
    }

    #[test]
    fn date_change_carries_formatted_metadata() {
        let event = sample_event();
        let new_date = Utc.with_ymd_and_hms(2025, 6, 21, 17, 0, 0).unwrap();
        let patch = EventInfoPatch {
            date: Some(new_date),
            ..Default::default()
        };
        let entries = tracked_field_changes(&event, &patch, Uuid::new_v4());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].edit_type, edit_type::DATE_UPDATED);
        assert_eq!(
            entries[0].meta.as_ref().unwrap()["formattedDate"],
            "June 21st, 2025"
        );
    }

    #[test]
    fn ordinal_suffixes_cover_the_teens() {
        let cases = [
            (1, "1st"),
            (2, "2nd"),
            (3, "3rd"),
            (4, "4th"),
            (11, "11th"),
            (12, "12th"),
            (13, "13th"),
            (21, "21st"),
            (22, "22nd"),
            (23, "23rd"),
            (31, "31st"),
        ];
        for (day, expected) in cases {
            let date = Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap();
            assert_eq!(
                format_history_date(date),
                format!("January {expected}, 2025")
            );
        }
    }

    #[test]
    fn equal_tag_sets_are_not_a_change() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(diff_tag_sets(&[a, b], &[b, a]), None);
        assert!(tag_change_entry(Uuid::new_v4(), Uuid::new_v4(), &[a], &[a]).is_none());
    }

    #[test]
    fn tag_diff_reports_added_and_removed() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let diff = diff_tag_sets(&[a, b], &[b, c]).unwrap();
        assert_eq!(diff.added, vec![c]);
        assert_eq!(diff.removed, vec![a]);

        let entry = tag_change_entry(Uuid::new_v4(), Uuid::new_v4(), &[a, b], &[b, c]).unwrap();
        assert_eq!(entry.edit_type, edit_type::TAGS_UPDATED);
        let meta = entry.meta.unwrap();
        assert_eq!(meta["added"], json!([c]));
        assert_eq!(meta["removed"], json!([a]));
    }

    #[tokio::test]
    async fn recorder_queues_entries_in_order() {
        let (recorder, mut rx) = AuditRecorder::test_pair();
        for edit_type in [edit_type::NAME_UPDATED, edit_type::DATE_UPDATED] {
            recorder.record(HistoryEntry {
                event_id: Uuid::new_v4(),
                editor_id: Uuid::new_v4(),
                edit_type: edit_type.to_string(),
                old_value: None,
                new_value: None,
                meta: None,
            });
        }
        assert_eq!(rx.recv().await.unwrap().edit_type, edit_type::NAME_UPDATED);
        assert_eq!(rx.recv().await.unwrap().edit_type, edit_type::DATE_UPDATED);
    }

    #[test]
    fn record_on_a_closed_queue_is_swallowed() {
        let (recorder, rx) = AuditRecorder::test_pair();
        drop(rx);
        recorder.record(HistoryEntry {
            event_id: Uuid::new_v4(),
            editor_id: Uuid::new_v4(),
            edit_type: edit_type::NAME_UPDATED.to_string(),
            old_value: None,
            new_value: None,
            meta: None,
        });
    }
}
