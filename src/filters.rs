//! Query filter building for the donor and event list endpoints.
//!
//! A flat set of optional query parameters becomes a validated filter, and
//! the filter becomes a conjunctive WHERE clause over active (non
//! soft-deleted) rows. Sorting is restricted to an explicit allow-list of
//! columns; nothing caller-supplied is ever spliced into SQL as an
//! identifier.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};

use crate::db::donors::normalize_city;
use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Raw query parameters for `GET /api/donor`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorListParams {
    pub search: Option<String>,
    pub city: Option<String>,
    pub pmm: Option<String>,
    pub largest_gift_appeal: Option<String>,
    pub contact_phone_type: Option<String>,
    pub phone_restrictions: Option<String>,
    pub email_restrictions: Option<String>,
    pub communication_restrictions: Option<String>,
    pub min_donation_amount: Option<Decimal>,
    pub max_donation_amount: Option<Decimal>,
    pub tags: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Raw query parameters for `GET /api/event`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventListParams {
    pub search: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub tags: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// Restriction-style filters use the literal string "None" to mean
/// "the column is NULL", not "the column equals the string None".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestrictionFilter {
    IsNull,
    Equals(String),
}

impl RestrictionFilter {
    fn parse(raw: Option<String>) -> Option<Self> {
        let value = raw?;
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed == "None" {
            Some(RestrictionFilter::IsNull)
        } else {
            Some(RestrictionFilter::Equals(trimmed.to_string()))
        }
    }
}

/// 1-indexed page selection.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub number: i64,
    pub limit: i64,
}

impl Page {
    fn from_params(page: Option<i64>, limit: Option<i64>) -> Self {
        Page {
            number: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.number - 1) * self.limit
    }
}

/// Pagination block returned alongside every list response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
}

impl Pagination {
    pub fn new(total: i64, page: &Page) -> Self {
        Pagination {
            total,
            page: page.number,
            limit: page.limit,
            total_pages: (total + page.limit - 1) / page.limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw {
            None => Ok(SortDirection::Asc),
            Some(s) => match s.to_ascii_lowercase().as_str() {
                "asc" => Ok(SortDirection::Asc),
                "desc" => Ok(SortDirection::Desc),
                other => Err(ApiError::Validation(format!(
                    "Invalid sortOrder: {other}"
                ))),
            },
        }
    }

    fn keyword(self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Columns a caller may sort donors by. Anything outside this list is a
/// 400; raw field names never reach the SQL layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DonorSortColumn {
    FirstName,
    LastName,
    OrganizationName,
    City,
    TotalDonationAmount,
    LargestGiftAmount,
    LastGiftAmount,
    LastGiftDate,
    TotalInvitations,
    TotalAttendance,
    CreatedAt,
}

impl DonorSortColumn {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "first_name" | "firstName" => Some(Self::FirstName),
            "last_name" | "lastName" => Some(Self::LastName),
            "organization_name" | "organizationName" => Some(Self::OrganizationName),
            "city" => Some(Self::City),
            "total_donation_amount" | "totalDonationAmount" => Some(Self::TotalDonationAmount),
            "largest_gift_amount" | "largestGiftAmount" => Some(Self::LargestGiftAmount),
            "last_gift_amount" | "lastGiftAmount" => Some(Self::LastGiftAmount),
            "last_gift_date" | "lastGiftDate" => Some(Self::LastGiftDate),
            "total_invitations" | "totalInvitations" => Some(Self::TotalInvitations),
            "total_attendance" | "totalAttendance" => Some(Self::TotalAttendance),
            "created_at" | "createdAt" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::FirstName => "d.first_name",
            Self::LastName => "d.last_name",
            Self::OrganizationName => "d.organization_name",
            Self::City => "d.city",
            Self::TotalDonationAmount => "d.total_donation_amount",
            Self::LargestGiftAmount => "d.largest_gift_amount",
            Self::LastGiftAmount => "d.last_gift_amount",
            Self::LastGiftDate => "d.last_gift_date",
            Self::TotalInvitations => "d.total_invitations",
            Self::TotalAttendance => "d.total_attendance",
            Self::CreatedAt => "d.created_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSortColumn {
    Name,
    Date,
    Status,
    CreatedAt,
}

impl EventSortColumn {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "name" => Some(Self::Name),
            "date" => Some(Self::Date),
            "status" => Some(Self::Status),
            "created_at" | "createdAt" => Some(Self::CreatedAt),
            _ => None,
        }
    }

    fn column(self) -> &'static str {
        match self {
            Self::Name => "e.name",
            Self::Date => "e.date",
            Self::Status => "e.status",
            Self::CreatedAt => "e.created_at",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DonorSort {
    pub column: DonorSortColumn,
    pub direction: SortDirection,
}

impl DonorSort {
    pub fn order_by(&self) -> String {
        format!("{} {}", self.column.column(), self.direction.keyword())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EventSort {
    pub column: EventSortColumn,
    pub direction: SortDirection,
}

impl EventSort {
    pub fn order_by(&self) -> String {
        format!("{} {}", self.column.column(), self.direction.keyword())
    }
}

/// Validated donor list filter.
#[derive(Debug)]
pub struct DonorFilter {
    pub search: Option<String>,
    pub cities: Vec<String>,
    pub pmm: Option<String>,
    pub largest_gift_appeal: Option<String>,
    pub contact_phone_type: Option<String>,
    pub phone_restrictions: Option<RestrictionFilter>,
    pub email_restrictions: Option<RestrictionFilter>,
    pub communication_restrictions: Option<RestrictionFilter>,
    pub min_donation_amount: Option<Decimal>,
    pub max_donation_amount: Option<Decimal>,
    pub tags: Vec<String>,
    pub page: Page,
    pub sort: DonorSort,
}

impl DonorListParams {
    pub fn into_filter(self) -> Result<DonorFilter, ApiError> {
        let column = match self.sort_by.as_deref() {
            None => DonorSortColumn::LastName,
            Some(raw) => DonorSortColumn::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("Invalid sortBy column: {raw}")))?,
        };
        let direction = SortDirection::parse(self.sort_order.as_deref())?;

        // Cities arrive display-form ("New Westminster"); compare against
        // the persisted underscore form.
        let cities = split_list(self.city.as_deref())
            .iter()
            .filter_map(|c| normalize_city(c))
            .collect();

        // The literal "all" means the caller is not filtering by phone type.
        let contact_phone_type = self
            .contact_phone_type
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && v != "all");

        Ok(DonorFilter {
            search: non_empty(self.search),
            cities,
            pmm: non_empty(self.pmm),
            largest_gift_appeal: non_empty(self.largest_gift_appeal),
            contact_phone_type,
            phone_restrictions: RestrictionFilter::parse(self.phone_restrictions),
            email_restrictions: RestrictionFilter::parse(self.email_restrictions),
            communication_restrictions: RestrictionFilter::parse(self.communication_restrictions),
            min_donation_amount: self.min_donation_amount,
            max_donation_amount: self.max_donation_amount,
            tags: split_list(self.tags.as_deref()),
            page: Page::from_params(self.page, self.limit),
            sort: DonorSort { column, direction },
        })
    }
}

/// Validated event list filter.
#[derive(Debug)]
pub struct EventFilter {
    pub search: Option<String>,
    pub status: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub page: Page,
    pub sort: EventSort,
}

impl EventListParams {
    pub fn into_filter(self) -> Result<EventFilter, ApiError> {
        let column = match self.sort_by.as_deref() {
            None => EventSortColumn::Date,
            Some(raw) => EventSortColumn::parse(raw)
                .ok_or_else(|| ApiError::Validation(format!("Invalid sortBy column: {raw}")))?,
        };
        let direction = match self.sort_order.as_deref() {
            None => SortDirection::Desc,
            raw => SortDirection::parse(raw)?,
        };

        let status = match non_empty(self.status) {
            None => None,
            Some(raw) => {
                let parsed: crate::db::models::EventStatus = raw
                    .parse()
                    .map_err(|e: anyhow::Error| ApiError::Validation(e.to_string()))?;
                Some(parsed.to_string())
            }
        };

        Ok(EventFilter {
            search: non_empty(self.search),
            status,
            from: self.from,
            to: self.to,
            tags: split_list(self.tags.as_deref()),
            page: Page::from_params(self.page, self.limit),
            sort: EventSort { column, direction },
        })
    }
}

fn non_empty(raw: Option<String>) -> Option<String> {
    raw.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// LIKE treats `%`, `_` and `\` as syntax; escape them so caller text
/// always matches literally. Patterns built from this carry `ESCAPE '\'`.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Append the donor predicate fragments to a query that already ends with
/// `... FROM donors d WHERE d.is_deleted = FALSE`.
pub fn push_donor_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &DonorFilter) {
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (d.first_name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR d.last_name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR d.organization_name ILIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }

    if !filter.cities.is_empty() {
        qb.push(" AND d.city = ANY(");
        qb.push_bind(filter.cities.clone());
        qb.push(")");
    }

    if let Some(pmm) = &filter.pmm {
        qb.push(" AND d.pmm ILIKE ");
        qb.push_bind(format!("%{}%", escape_like(pmm)));
        qb.push(" ESCAPE '\\'");
    }

    if let Some(appeal) = &filter.largest_gift_appeal {
        qb.push(" AND d.largest_gift_appeal = ");
        qb.push_bind(appeal.clone());
    }

    if let Some(phone_type) = &filter.contact_phone_type {
        qb.push(" AND d.contact_phone_type = ");
        qb.push_bind(phone_type.clone());
    }

    let restrictions = [
        ("phone_restrictions", &filter.phone_restrictions),
        ("email_restrictions", &filter.email_restrictions),
        (
            "communication_restrictions",
            &filter.communication_restrictions,
        ),
    ];
    for (column, restriction) in restrictions {
        match restriction {
            None => {}
            Some(RestrictionFilter::IsNull) => {
                qb.push(format!(" AND d.{column} IS NULL"));
            }
            Some(RestrictionFilter::Equals(value)) => {
                qb.push(format!(" AND d.{column} = "));
                qb.push_bind(value.clone());
            }
        }
    }

    if let Some(min) = filter.min_donation_amount {
        qb.push(" AND d.total_donation_amount >= ");
        qb.push_bind(min);
    }
    if let Some(max) = filter.max_donation_amount {
        qb.push(" AND d.total_donation_amount <= ");
        qb.push_bind(max);
    }

    if !filter.tags.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM donor_tags dt \
             JOIN tags t ON t.id = dt.tag_id \
             WHERE dt.donor_id = d.id AND t.is_deleted = FALSE AND t.name = ANY(",
        );
        qb.push_bind(filter.tags.clone());
        qb.push("))");
    }
}

/// Append the event predicate fragments to a query that already ends with
/// `... FROM events e WHERE e.is_deleted = FALSE`.
pub fn push_event_filters(qb: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (e.name ILIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\' OR e.location ILIKE ");
        qb.push_bind(pattern);
        qb.push(" ESCAPE '\\')");
    }

    if let Some(status) = &filter.status {
        qb.push(" AND e.status = ");
        qb.push_bind(status.clone());
    }

    if let Some(from) = filter.from {
        qb.push(" AND e.date >= ");
        qb.push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND e.date <= ");
        qb.push_bind(to);
    }

    if !filter.tags.is_empty() {
        qb.push(
            " AND EXISTS (SELECT 1 FROM event_tags et \
             JOIN tags t ON t.id = et.tag_id \
             WHERE et.event_id = e.id AND t.is_deleted = FALSE AND t.name = ANY(",
        );
        qb.push_bind(filter.tags.clone());
        qb.push("))");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn donor_sql(filter: &DonorFilter) -> String {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT d.* FROM donors d WHERE d.is_deleted = FALSE");
        push_donor_filters(&mut qb, filter);
        qb.sql().to_string()
    }

    fn event_sql(filter: &EventFilter) -> String {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("SELECT e.* FROM events e WHERE e.is_deleted = FALSE");
        push_event_filters(&mut qb, filter);
        qb.sql().to_string()
    }

    #[test]
    fn empty_params_give_defaults() {
        let filter = DonorListParams::default().into_filter().unwrap();
        assert_eq!(filter.page.number, 1);
        assert_eq!(filter.page.limit, DEFAULT_PAGE_SIZE);
        assert_eq!(filter.sort.order_by(), "d.last_name ASC");
        let sql = donor_sql(&filter);
        assert_eq!(sql, "SELECT d.* FROM donors d WHERE d.is_deleted = FALSE");
    }

    #[test]
    fn search_spans_name_columns() {
        let filter = DonorListParams {
            search: Some("lee".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let sql = donor_sql(&filter);
        assert!(sql.contains("d.first_name ILIKE"));
        assert!(sql.contains("d.last_name ILIKE"));
        assert!(sql.contains("d.organization_name ILIKE"));
    }

    #[test]
    fn search_text_matches_like_metacharacters_literally() {
        assert_eq!(escape_like("_a"), "\\_a");
        assert_eq!(escape_like("50% off"), "50\\% off");
        assert_eq!(escape_like(r"a\b"), r"a\\b");
        assert_eq!(escape_like("plain"), "plain");

        let filter = DonorListParams {
            search: Some("_a".to_string()),
            pmm: Some("50%".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let sql = donor_sql(&filter);
        assert_eq!(sql.matches(r"ESCAPE '\'").count(), 4);
    }

    #[test]
    fn cities_are_normalized_to_persisted_form() {
        let filter = DonorListParams {
            city: Some("Victoria, New Westminster,".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.cities, vec!["Victoria", "New_Westminster"]);
        assert!(donor_sql(&filter).contains("d.city = ANY("));
    }

    #[test]
    fn phone_type_all_is_a_sentinel() {
        let filter = DonorListParams {
            contact_phone_type: Some("all".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert!(filter.contact_phone_type.is_none());
        assert!(!donor_sql(&filter).contains("contact_phone_type"));
    }

    #[test]
    fn restriction_none_means_is_null() {
        let filter = DonorListParams {
            phone_restrictions: Some("None".to_string()),
            email_restrictions: Some("Do_not_email".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.phone_restrictions, Some(RestrictionFilter::IsNull));
        let sql = donor_sql(&filter);
        assert!(sql.contains("d.phone_restrictions IS NULL"));
        assert!(sql.contains("d.email_restrictions = "));
    }

    #[test]
    fn donation_bounds_are_inclusive() {
        let filter = DonorListParams {
            min_donation_amount: Some(Decimal::new(10000, 2)),
            max_donation_amount: Some(Decimal::new(50000, 2)),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let sql = donor_sql(&filter);
        assert!(sql.contains("d.total_donation_amount >= "));
        assert!(sql.contains("d.total_donation_amount <= "));
    }

    #[test]
    fn tag_filter_uses_membership_subquery() {
        let filter = DonorListParams {
            tags: Some("major donor,board".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.tags, vec!["major donor", "board"]);
        assert!(donor_sql(&filter).contains("EXISTS (SELECT 1 FROM donor_tags dt"));
    }

    #[test]
    fn unknown_sort_column_is_rejected() {
        let err = DonorListParams {
            sort_by: Some("password_hash".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn sort_accepts_both_casings() {
        for raw in ["totalDonationAmount", "total_donation_amount"] {
            let filter = DonorListParams {
                sort_by: Some(raw.to_string()),
                sort_order: Some("desc".to_string()),
                ..Default::default()
            }
            .into_filter()
            .unwrap();
            assert_eq!(filter.sort.order_by(), "d.total_donation_amount DESC");
        }
    }

    #[test]
    fn page_and_limit_are_clamped() {
        let filter = DonorListParams {
            page: Some(0),
            limit: Some(10_000),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.page.number, 1);
        assert_eq!(filter.page.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.page.offset(), 0);
    }

    #[test]
    fn pagination_math_rounds_up() {
        let page = Page {
            number: 2,
            limit: 10,
        };
        let p = Pagination::new(21, &page);
        assert_eq!(p.total_pages, 3);
        assert_eq!(p.page, 2);

        let empty = Pagination::new(0, &page);
        assert_eq!(empty.total_pages, 0);
    }

    #[test]
    fn event_filter_validates_status() {
        let err = EventListParams {
            status: Some("cancelled".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let filter = EventListParams {
            status: Some("published".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.status.as_deref(), Some("published"));
    }

    #[test]
    fn event_defaults_sort_by_date_desc() {
        let filter = EventListParams::default().into_filter().unwrap();
        assert_eq!(filter.sort.order_by(), "e.date DESC");
    }

    #[test]
    fn event_search_escapes_like_patterns() {
        let filter = EventListParams {
            search: Some("gala_%".to_string()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        let sql = event_sql(&filter);
        assert!(sql.contains("e.name ILIKE"));
        assert!(sql.contains("e.location ILIKE"));
        assert_eq!(sql.matches(r"ESCAPE '\'").count(), 2);
    }
}
