//! User store — CRUD over the `users` table.
//!
//! Lookups return `Ok(None)` for absent rows; a duplicate email surfaces as
//! `StoreError::Conflict` so the HTTP layer can answer 409 instead of a
//! generic failure.

use sqlx::PgPool;

use crate::error::StoreError;
use crate::models::User;

const USER_COLUMNS: &str = "id, username, email, password_hash, created_at, updated_at";

pub async fn list_all(pool: &PgPool) -> Result<Vec<User>, StoreError> {
    let users = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY id"
    ))
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn get_by_id(pool: &PgPool, id: i32) -> Result<Option<User>, StoreError> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(user)
}

pub async fn create(
    pool: &PgPool,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<User, StoreError> {
    let result = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (username, email, password_hash) VALUES ($1, $2, $3) \
         RETURNING {USER_COLUMNS}"
    ))
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .fetch_one(pool)
    .await;

    match result {
        Ok(user) => Ok(user),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StoreError::Conflict("email"))
        }
        Err(e) => Err(StoreError::Database(e)),
    }
}
