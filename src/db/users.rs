//! User lookups for auth and collaborator picking.

use uuid::Uuid;

use crate::db::models::User;
use crate::db::DbPool;

pub async fn get(pool: &DbPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_email(pool: &DbPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn list_all(pool: &DbPool) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY name")
        .fetch_all(pool)
        .await
}

/// Name/email substring search for the collaborator picker.
pub async fn search(pool: &DbPool, query: &str) -> Result<Vec<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(
        "SELECT * FROM users \
         WHERE name ILIKE $1 OR email ILIKE $1 \
         ORDER BY name \
         LIMIT 20",
    )
    .bind(format!("%{}%", query))
    .fetch_all(pool)
    .await
}
