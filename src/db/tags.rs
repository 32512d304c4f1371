//! Tag queries. Tag names are globally unique and case-sensitive; the
//! unique index raises on duplicates and the handler translates that into
//! a validation error.

use serde::Deserialize;
use uuid::Uuid;

use crate::db::models::Tag;
use crate::db::DbPool;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagFields {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

pub async fn create(pool: &DbPool, fields: &TagFields) -> Result<Tag, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        "INSERT INTO tags (name, description, color) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(&fields.name)
    .bind(&fields.description)
    .bind(&fields.color)
    .fetch_one(pool)
    .await
}

pub async fn list(pool: &DbPool) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE is_deleted = FALSE ORDER BY name")
        .fetch_all(pool)
        .await
}

pub async fn update(
    pool: &DbPool,
    id: Uuid,
    fields: &TagFields,
) -> Result<Option<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        "UPDATE tags SET name = $1, description = $2, color = $3, updated_at = NOW() \
         WHERE id = $4 AND is_deleted = FALSE \
         RETURNING *",
    )
    .bind(&fields.name)
    .bind(&fields.description)
    .bind(&fields.color)
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn soft_delete(pool: &DbPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE tags SET is_deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
         WHERE id = $1 AND is_deleted = FALSE",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
