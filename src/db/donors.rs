//! Donor queries.

use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::models::{Donor, Tag};
use crate::db::DbPool;
use crate::filters::{self, DonorFilter};

/// Writable donor fields, shared by manual create/update bodies and the
/// CSV import. `organization_name` and `street_address` default to empty
/// strings because the import matcher compares them by equality.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DonorFields {
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
    pub last_gift_date: Option<chrono::NaiveDate>,
    pub last_gift_appeal: Option<String>,
    pub exclude_from_communications: bool,
    pub deceased: bool,
    pub contact_phone_type: Option<String>,
    pub phone_restrictions: Option<String>,
    pub email_restrictions: Option<String>,
    pub communication_restrictions: Option<String>,
    pub subscriptions: Option<String>,
}

/// Cities persist with spaces replaced by underscores ("New_Westminster");
/// the city list filter compares against this form.
pub fn normalize_city(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.split_whitespace().collect::<Vec<_>>().join("_"))
}

// Every donor write binds the canonical form, whatever the caller sent.
fn canonical_city(fields: &DonorFields) -> Option<String> {
    fields.city.as_deref().and_then(normalize_city)
}

const DONOR_FIELD_COLUMNS: &str = "first_name, last_name, nickname, organization_name, \
     street_address, unit_number, city, pmm, total_donation_amount, total_pledge, \
     largest_gift_amount, largest_gift_appeal, last_gift_amount, last_gift_date, \
     last_gift_appeal, exclude_from_communications, deceased, contact_phone_type, \
     phone_restrictions, email_restrictions, communication_restrictions, subscriptions";

const DONOR_FIELD_SET: &str = "first_name = $1, last_name = $2, nickname = $3, \
     organization_name = $4, street_address = $5, unit_number = $6, city = $7, pmm = $8, \
     total_donation_amount = $9, total_pledge = $10, largest_gift_amount = $11, \
     largest_gift_appeal = $12, last_gift_amount = $13, last_gift_date = $14, \
     last_gift_appeal = $15, exclude_from_communications = $16, deceased = $17, \
     contact_phone_type = $18, phone_restrictions = $19, email_restrictions = $20, \
     communication_restrictions = $21, subscriptions = $22";

fn bind_fields<'q, O>(
    query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
    fields: &'q DonorFields,
) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
    query
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.nickname)
        .bind(&fields.organization_name)
        .bind(&fields.street_address)
        .bind(&fields.unit_number)
        .bind(canonical_city(fields))
        .bind(&fields.pmm)
        .bind(fields.total_donation_amount)
        .bind(fields.total_pledge)
        .bind(fields.largest_gift_amount)
        .bind(&fields.largest_gift_appeal)
        .bind(fields.last_gift_amount)
        .bind(fields.last_gift_date)
        .bind(&fields.last_gift_appeal)
        .bind(fields.exclude_from_communications)
        .bind(fields.deceased)
        .bind(&fields.contact_phone_type)
        .bind(&fields.phone_restrictions)
        .bind(&fields.email_restrictions)
        .bind(&fields.communication_restrictions)
        .bind(&fields.subscriptions)
}

pub async fn create(pool: &DbPool, fields: &DonorFields) -> Result<Donor, sqlx::Error> {
    let sql = format!(
        "INSERT INTO donors ({DONOR_FIELD_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                 $17, $18, $19, $20, $21, $22) \
         RETURNING *"
    );
    bind_fields(sqlx::query_as::<_, Donor>(&sql), fields)
        .fetch_one(pool)
        .await
}

pub async fn get(pool: &DbPool, id: Uuid) -> Result<Option<Donor>, sqlx::Error> {
    sqlx::query_as::<_, Donor>("SELECT * FROM donors WHERE id = $1 AND is_deleted = FALSE")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Replace a donor's fields and, when a tag set is given, its tag
/// assignments, in one transaction. Returns `None` when the donor does not
/// exist or is soft-deleted.
pub async fn update_with_tags(
    pool: &DbPool,
    id: Uuid,
    fields: &DonorFields,
    tag_ids: Option<&[Uuid]>,
) -> Result<Option<Donor>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let sql = format!(
        "UPDATE donors SET {DONOR_FIELD_SET}, updated_at = NOW() \
         WHERE id = $23 AND is_deleted = FALSE \
         RETURNING *"
    );
    let donor = bind_fields(sqlx::query_as::<_, Donor>(&sql), fields)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

    let Some(donor) = donor else {
        return Ok(None);
    };

    if let Some(tag_ids) = tag_ids {
        sqlx::query("DELETE FROM donor_tags WHERE donor_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if !tag_ids.is_empty() {
            sqlx::query(
                "INSERT INTO donor_tags (donor_id, tag_id) \
                 SELECT $1, unnest($2::uuid[]) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(tag_ids)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(Some(donor))
}

/// Soft delete. Returns false when no active donor matched.
pub async fn soft_delete(pool: &DbPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE donors SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Filtered, paginated donor page plus the total row count for the same
/// predicate.
pub async fn list(
    pool: &DbPool,
    filter: &DonorFilter,
) -> Result<(Vec<Donor>, i64), sqlx::Error> {
    let mut count_qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT COUNT(*) FROM donors d WHERE d.is_deleted = FALSE");
    filters::push_donor_filters(&mut count_qb, filter);
    let total: i64 = count_qb.build_query_scalar().fetch_one(pool).await?;

    let mut qb: QueryBuilder<'_, Postgres> =
        QueryBuilder::new("SELECT d.* FROM donors d WHERE d.is_deleted = FALSE");
    filters::push_donor_filters(&mut qb, filter);
    qb.push(" ORDER BY ");
    qb.push(filter.sort.order_by());
    qb.push(" LIMIT ");
    qb.push_bind(filter.page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(filter.page.offset());
    let donors = qb.build_query_as::<Donor>().fetch_all(pool).await?;

    Ok((donors, total))
}

pub async fn distinct_cities(pool: &DbPool) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT city FROM donors \
         WHERE is_deleted = FALSE AND city IS NOT NULL \
         ORDER BY city",
    )
    .fetch_all(pool)
    .await
}

pub async fn tags_for(pool: &DbPool, donor_id: Uuid) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t \
         JOIN donor_tags dt ON dt.tag_id = t.id \
         WHERE dt.donor_id = $1 AND t.is_deleted = FALSE \
         ORDER BY t.name",
    )
    .bind(donor_id)
    .fetch_all(pool)
    .await
}

/// Import match lookup: exact identity equality, active donors first, then
/// soft-deleted ones. Oldest match wins when several qualify.
pub async fn find_import_match(
    pool: &DbPool,
    fields: &DonorFields,
) -> Result<Option<Uuid>, sqlx::Error> {
    for deleted in [false, true] {
        let found: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM donors \
             WHERE first_name = $1 AND last_name = $2 \
               AND organization_name = $3 AND street_address = $4 \
               AND is_deleted = $5 \
             ORDER BY created_at \
             LIMIT 1",
        )
        .bind(&fields.first_name)
        .bind(&fields.last_name)
        .bind(&fields.organization_name)
        .bind(&fields.street_address)
        .bind(deleted)
        .fetch_optional(pool)
        .await?;
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

/// Import overwrite: replaces every mapped field and clears the soft-delete
/// pair, which is how a deleted match gets resurrected.
pub async fn overwrite_from_import(
    pool: &DbPool,
    id: Uuid,
    fields: &DonorFields,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "UPDATE donors SET {DONOR_FIELD_SET}, \
         is_deleted = FALSE, deleted_at = NULL, updated_at = NOW() \
         WHERE id = $23 \
         RETURNING *"
    );
    bind_fields(sqlx::query_as::<_, Donor>(&sql), fields)
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cities_persist_with_underscores() {
        assert_eq!(
            normalize_city("New Westminster"),
            Some("New_Westminster".to_string())
        );
        assert_eq!(normalize_city("Victoria"), Some("Victoria".to_string()));
        assert_eq!(normalize_city(""), None);
    }

    #[test]
    fn manual_payload_city_binds_in_canonical_form() {
        let fields: DonorFields =
            serde_json::from_str(r#"{"firstName":"Ann","city":"New Westminster"}"#).unwrap();
        assert_eq!(fields.city.as_deref(), Some("New Westminster"));
        assert_eq!(canonical_city(&fields), Some("New_Westminster".to_string()));

        let blank: DonorFields = serde_json::from_str(r#"{"city":"  "}"#).unwrap();
        assert_eq!(canonical_city(&blank), None);
    }
}
