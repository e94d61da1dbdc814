//! Conversation store — CRUD + token lookup over the `conversations` table.
//!
//! `chat_history` lives in a JSONB column. Encoding happens before any
//! statement is issued (a marshal failure never leaves a partial write) and
//! a row whose column does not decode to a turn sequence fails the read.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{ChatHistory, Conversation};

const CONVERSATION_COLUMNS: &str =
    "id, user_id, conversation_id, chat_history, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: i32,
    user_id: i32,
    conversation_id: Uuid,
    chat_history: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = serde_json::Error;

    fn try_from(row: ConversationRow) -> Result<Self, Self::Error> {
        Ok(Conversation {
            id: row.id,
            user_id: row.user_id,
            conversation_id: row.conversation_id,
            chat_history: ChatHistory::from_value(row.chat_history)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// All conversations for a user, oldest first. Zero rows is an empty vec.
pub async fn list_by_user(pool: &PgPool, user_id: i32) -> Result<Vec<Conversation>, StoreError> {
    let rows = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
         WHERE user_id = $1 ORDER BY created_at ASC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| Conversation::try_from(row).map_err(StoreError::from))
        .collect()
}

pub async fn get_by_token(pool: &PgPool, token: Uuid) -> Result<Option<Conversation>, StoreError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE conversation_id = $1"
    ))
    .bind(token)
    .fetch_optional(pool)
    .await?;

    row.map(Conversation::try_from)
        .transpose()
        .map_err(StoreError::from)
}

/// The user's most recently updated conversation, if any.
pub async fn get_latest_by_user(
    pool: &PgPool,
    user_id: i32,
) -> Result<Option<Conversation>, StoreError> {
    let row = sqlx::query_as::<_, ConversationRow>(&format!(
        "SELECT {CONVERSATION_COLUMNS} FROM conversations \
         WHERE user_id = $1 ORDER BY updated_at DESC LIMIT 1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.map(Conversation::try_from)
        .transpose()
        .map_err(StoreError::from)
}

pub async fn create(
    pool: &PgPool,
    user_id: i32,
    token: Uuid,
    history: &ChatHistory,
) -> Result<Conversation, StoreError> {
    let history_json = history.to_value()?;

    let result = sqlx::query_as::<_, ConversationRow>(&format!(
        "INSERT INTO conversations (user_id, conversation_id, chat_history) \
         VALUES ($1, $2, $3) RETURNING {CONVERSATION_COLUMNS}"
    ))
    .bind(user_id)
    .bind(token)
    .bind(history_json)
    .fetch_one(pool)
    .await;

    let row = match result {
        Ok(row) => row,
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            return Err(StoreError::Conflict("conversation_id"))
        }
        Err(e) => return Err(StoreError::Database(e)),
    };

    Conversation::try_from(row).map_err(StoreError::from)
}

/// Overwrite the history for the conversation with the given token and bump
/// updated_at. Updates are keyed by token, the stable external identity.
pub async fn update(pool: &PgPool, token: Uuid, history: &ChatHistory) -> Result<(), StoreError> {
    let history_json = history.to_value()?;

    let result = sqlx::query(
        "UPDATE conversations SET chat_history = $1, updated_at = now() \
         WHERE conversation_id = $2",
    )
    .bind(history_json)
    .bind(token)
    .execute(pool)
    .await?;

    // The caller resolved the token earlier in the same request; a zero-row
    // update means the row disappeared underneath us.
    if result.rows_affected() == 0 {
        return Err(StoreError::Database(sqlx::Error::RowNotFound));
    }
    Ok(())
}
