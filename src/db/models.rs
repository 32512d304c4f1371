use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// A donor record. Monetary aggregates are fixed-point decimals (two
/// decimal places), never floats. `organization_name` and `street_address`
/// are stored as empty strings rather than NULL because the CSV import
/// matches donors by exact equality on those columns.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Donor {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub organization_name: String,
    pub street_address: String,
    pub unit_number: Option<String>,
    pub city: Option<String>,
    pub pmm: Option<String>,
    pub total_donation_amount: Decimal,
    pub total_pledge: Option<Decimal>,
    pub largest_gift_amount: Decimal,
    pub largest_gift_appeal: Option<String>,
    pub last_gift_amount: Option<Decimal>,
    pub last_gift_date: Option<NaiveDate>,
    pub last_gift_appeal: Option<String>,
    pub exclude_from_communications: bool,
    pub deceased: bool,
    pub contact_phone_type: Option<String>,
    pub phone_restrictions: Option<String>,
    pub email_restrictions: Option<String>,
    pub communication_restrictions: Option<String>,
    pub subscriptions: Option<String>,
    /// Bumped only by event participation transitions, never edited directly.
    pub total_invitations: i32,
    pub total_attendance: i32,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub location: Option<String>,
    pub status: String,
    pub capacity: Option<i32>,
    /// Denormalized participant count, maintained by the client UI.
    pub donor_count: i32,
    pub creator_id: Uuid,
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Donor participation in an event.
///
/// `counted_invitation` / `counted_attendance` are one-way flags: each may
/// flip false -> true exactly once, driving a single increment of the
/// donor's matching counter. They are never cleared, even when the status
/// changes again, so repeated status edits cannot double-count.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DonorEvent {
    pub id: Uuid,
    pub donor_id: Uuid,
    pub event_id: Uuid,
    pub status: String,
    pub decline_reason: Option<String>,
    pub counted_invitation: bool,
    pub counted_attendance: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only edit history row. Never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventEditHistory {
    pub id: Uuid,
    pub event_id: Uuid,
    pub editor_id: Uuid,
    /// Open string set ("name_updated", "donor_status_updated", ...);
    /// readers must not assume it is closed.
    pub edit_type: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub meta: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

/// History row joined with the editor's display name for the history feed.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventEditHistoryWithEditor {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub entry: EventEditHistory,
    pub editor_name: String,
}

/// Donor row as it appears in an event's participant list.
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct EventParticipant {
    pub donor_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: String,
    pub status: String,
    pub decline_reason: Option<String>,
}

/// Event lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Draft,
    Published,
    Archived,
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventStatus::Draft => write!(f, "draft"),
            EventStatus::Published => write!(f, "published"),
            EventStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EventStatus::Draft),
            "published" => Ok(EventStatus::Published),
            "archived" => Ok(EventStatus::Archived),
            _ => Err(anyhow::anyhow!("Invalid event status: {}", s)),
        }
    }
}

/// Donor participation states for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipationStatus {
    Invited,
    Confirmed,
    Declined,
    Attended,
}

impl ParticipationStatus {
    /// Whether entering this status counts as an invitation for the donor's
    /// `total_invitations` counter.
    pub fn counts_invitation(self) -> bool {
        matches!(
            self,
            ParticipationStatus::Invited | ParticipationStatus::Confirmed
        )
    }

    /// Whether entering this status counts toward `total_attendance`.
    pub fn counts_attendance(self) -> bool {
        matches!(self, ParticipationStatus::Attended)
    }
}

impl std::fmt::Display for ParticipationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParticipationStatus::Invited => write!(f, "invited"),
            ParticipationStatus::Confirmed => write!(f, "confirmed"),
            ParticipationStatus::Declined => write!(f, "declined"),
            ParticipationStatus::Attended => write!(f, "attended"),
        }
    }
}

impl std::str::FromStr for ParticipationStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invited" => Ok(ParticipationStatus::Invited),
            "confirmed" => Ok(ParticipationStatus::Confirmed),
            "declined" => Ok(ParticipationStatus::Declined),
            "attended" => Ok(ParticipationStatus::Attended),
            _ => Err(anyhow::anyhow!("Invalid participation status: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn participation_status_round_trips() {
        for s in ["invited", "confirmed", "declined", "attended"] {
            assert_eq!(ParticipationStatus::from_str(s).unwrap().to_string(), s);
        }
        assert!(ParticipationStatus::from_str("maybe").is_err());
    }

    #[test]
    fn invitation_and_attendance_counting_rules() {
        assert!(ParticipationStatus::Invited.counts_invitation());
        assert!(ParticipationStatus::Confirmed.counts_invitation());
        assert!(!ParticipationStatus::Declined.counts_invitation());
        assert!(!ParticipationStatus::Attended.counts_invitation());
        assert!(ParticipationStatus::Attended.counts_attendance());
        assert!(!ParticipationStatus::Confirmed.counts_attendance());
    }

    #[test]
    fn event_status_rejects_unknown() {
        assert!(EventStatus::from_str("published").is_ok());
        assert!(EventStatus::from_str("cancelled").is_err());
    }
}
