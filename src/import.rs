//! CSV donor import.
//!
//! Each uploaded row is normalized, matched against existing donors by
//! exact identity (first name, last name, organization name, street
//! address), and then either updates the matched donor or inserts a new
//! one. Matching a soft-deleted donor resurrects it. Every row commits on
//! its own so one bad row never rolls back its neighbours; row failures
//! are collected and reported alongside the counts.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::donors::DonorFields;
use crate::db::{self, DbPool};
use crate::error::ApiError;

/// Aggregate result of one import run.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportOutcome {
    pub created_count: u32,
    pub updated_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// Raw CSV row. Every column is optional; absent columns read as empty
/// strings and unknown columns are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DonorCsvRow {
    first_name: String,
    last_name: String,
    nickname: String,
    organization_name: String,
    street_address: String,
    unit_number: String,
    city: String,
    pmm: String,
    total_donations: String,
    total_pledge: String,
    largest_gift: String,
    largest_gift_appeal: String,
    last_gift: String,
    last_gift_date: String,
    last_gift_appeal: String,
    exclude: String,
    deceased: String,
    contact_phone_type: String,
    phone_restrictions: String,
    email_restrictions: String,
    communication_restrictions: String,
    subscriptions: String,
}

enum RowAction {
    Created,
    Updated,
}

/// Run a full import over the raw upload bytes.
///
/// A failure to parse the file itself aborts the import with a single
/// validation error. Row-level failures never abort the batch; they are
/// reported as `"Row {n}: {message}"` with 1-indexed data row numbers.
pub async fn run_import(pool: &DbPool, bytes: &[u8]) -> Result<ImportOutcome, ApiError> {
    let mut reader = csv::Reader::from_reader(bytes);
    reader
        .headers()
        .map_err(|e| ApiError::Validation(format!("Could not parse CSV file: {e}")))?;

    let mut outcome = ImportOutcome::default();
    for (idx, record) in reader.deserialize::<DonorCsvRow>().enumerate() {
        let row_number = idx + 1;
        match import_row(pool, record).await {
            Ok(RowAction::Created) => outcome.created_count += 1,
            Ok(RowAction::Updated) => outcome.updated_count += 1,
            Err(message) => outcome.errors.push(format!("Row {row_number}: {message}")),
        }
    }

    tracing::info!(
        created = outcome.created_count,
        updated = outcome.updated_count,
        failed = outcome.errors.len(),
        "CSV import finished"
    );
    Ok(outcome)
}

async fn import_row(
    pool: &DbPool,
    record: Result<DonorCsvRow, csv::Error>,
) -> Result<RowAction, String> {
    let row = record.map_err(|e| e.to_string())?;
    let import = normalize_row(row)?;

    // Active donors are matched before soft-deleted ones; a deleted match
    // is resurrected by the overwrite.
    match db::donors::find_import_match(pool, &import)
        .await
        .map_err(|e| e.to_string())?
    {
        Some(donor_id) => {
            db::donors::overwrite_from_import(pool, donor_id, &import)
                .await
                .map_err(|e| e.to_string())?;
            Ok(RowAction::Updated)
        }
        None => {
            db::donors::create(pool, &import)
                .await
                .map_err(|e| e.to_string())?;
            Ok(RowAction::Created)
        }
    }
}

fn normalize_row(row: DonorCsvRow) -> Result<DonorFields, String> {
    let first_name = row.first_name.trim().to_string();
    let last_name = row.last_name.trim().to_string();
    let organization_name = row.organization_name.trim().to_string();

    if first_name.is_empty() && last_name.is_empty() && organization_name.is_empty() {
        return Err(
            "at least one of first_name, last_name, or organization_name is required".to_string(),
        );
    }

    Ok(DonorFields {
        first_name,
        last_name,
        nickname: trimmed(&row.nickname),
        organization_name,
        street_address: row.street_address.trim().to_string(),
        unit_number: trimmed(&row.unit_number),
        city: trimmed(&row.city),
        pmm: trimmed(&row.pmm),
        total_donation_amount: parse_currency(&row.total_donations, "total_donations")?
            .unwrap_or_else(zero_amount),
        total_pledge: parse_currency(&row.total_pledge, "total_pledge")?,
        largest_gift_amount: parse_currency(&row.largest_gift, "largest_gift")?
            .unwrap_or_else(zero_amount),
        largest_gift_appeal: normalize_token(&row.largest_gift_appeal),
        last_gift_amount: parse_currency(&row.last_gift, "last_gift")?,
        last_gift_date: parse_csv_date(&row.last_gift_date),
        last_gift_appeal: normalize_token(&row.last_gift_appeal),
        exclude_from_communications: parse_flag(&row.exclude),
        deceased: parse_flag(&row.deceased),
        contact_phone_type: normalize_token(&row.contact_phone_type),
        phone_restrictions: normalize_token(&row.phone_restrictions),
        email_restrictions: normalize_token(&row.email_restrictions),
        communication_restrictions: normalize_token(&row.communication_restrictions),
        subscriptions: normalize_token(&row.subscriptions),
    })
}

fn zero_amount() -> Decimal {
    Decimal::new(0, 2)
}

fn trimmed(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Currency cells arrive as display strings ("$1,234.50"). Unparseable or
/// empty values degrade to `None` rather than failing the row; negative
/// amounts are a row error.
fn parse_currency(raw: &str, column: &str) -> Result<Option<Decimal>, String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '$' && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    match cleaned.parse::<Decimal>() {
        Ok(value) if value.is_sign_negative() => {
            Err(format!("{column} cannot be negative"))
        }
        Ok(mut value) => {
            value.rescale(2);
            Ok(Some(value))
        }
        Err(_) => Ok(None),
    }
}

/// Dates accept ISO (`2025-06-03`) and North-American (`6/3/2025`) forms;
/// anything else reads as no date.
fn parse_csv_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(t, "%m/%d/%Y"))
        .ok()
}

/// Free-text enumeration cells are stored as tokens: trimmed, internal
/// whitespace runs and hyphens collapsed to single underscores. Empty
/// cells map to `None`.
pub fn normalize_token(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(trimmed.len());
    let mut last_was_sep = false;
    for c in trimmed.chars() {
        if c.is_whitespace() || c == '-' {
            if !last_was_sep {
                out.push('_');
                last_was_sep = true;
            }
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }
    Some(out)
}

/// Flags are the exact string "true"; any other value, including "True",
/// reads as false.
fn parse_flag(raw: &str) -> bool {
    raw.trim() == "true"
}
