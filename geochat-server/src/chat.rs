//! Chat turn processor.
//!
//! One pipeline per request, operating on a local copy of the history:
//! resolve identity → resolve conversation → append the user turn → call
//! the completion API → append the assistant turn → persist. There is no
//! shared history buffer; cross-request state lives only in the store.
//!
//! Persistence happens in a single create-or-update at the end, so a
//! completion or validation failure never leaves a partial row behind.

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use geochat_core::completion::{CompletionClient, CompletionError, ReplyContent};
use geochat_core::error::StoreError;
use geochat_core::models::{ChatHistory, Turn};
use geochat_core::store;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("content is required")]
    EmptyContent,

    #[error("invalid user_id: user does not exist")]
    UnknownUser,

    #[error("conversation not found")]
    ConversationNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Completion(#[from] CompletionError),
}

/// The assistant's answer for one processed turn. `conversation_id` is
/// `None` for anonymous (unpersisted) exchanges.
#[derive(Debug)]
pub struct ChatReply {
    pub conversation_id: Option<Uuid>,
    pub reply: ReplyContent,
}

/// Where the updated history goes at the end of the pipeline.
enum Target {
    /// Fresh thread for this user; row is created at persist time.
    Create { user_id: i32, token: Uuid },
    /// Existing thread, keyed by its token.
    Update { token: Uuid },
    /// No identity supplied; the exchange is not persisted.
    Ephemeral,
}

pub async fn process_turn(
    pool: &PgPool,
    completion: &CompletionClient,
    user_id: Option<i32>,
    token: Option<Uuid>,
    content: &str,
) -> Result<ChatReply, ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::EmptyContent);
    }

    // Identity is optional but validated when present.
    if let Some(id) = user_id {
        store::user::get_by_id(pool, id)
            .await?
            .ok_or(ChatError::UnknownUser)?;
    }

    let (mut history, target) = match (user_id, token) {
        (Some(user_id), Some(token)) => {
            let conversation = store::conversation::get_by_token(pool, token)
                .await?
                .filter(|c| c.user_id == user_id)
                .ok_or(ChatError::ConversationNotFound)?;
            (conversation.chat_history, Target::Update { token })
        }
        (Some(user_id), None) => {
            let token = Uuid::new_v4();
            (ChatHistory::new(), Target::Create { user_id, token })
        }
        // Ownership cannot be verified without an identity.
        (None, Some(_)) => return Err(ChatError::ConversationNotFound),
        (None, None) => (ChatHistory::new(), Target::Ephemeral),
    };

    history.push(Turn::user(content));

    let assistant = completion.complete(&history).await?;
    let reply = ReplyContent::parse(&assistant.content);
    history.push(assistant);

    let conversation_id = match target {
        Target::Create { user_id, token } => {
            store::conversation::create(pool, user_id, token, &history).await?;
            Some(token)
        }
        Target::Update { token } => {
            store::conversation::update(pool, token, &history).await?;
            Some(token)
        }
        Target::Ephemeral => None,
    };

    Ok(ChatReply { conversation_id, reply })
}
