//! GeoChat HTTP REST API
//!
//! Axum-based HTTP server exposing user and conversation CRUD plus the chat
//! endpoint that proxies the external completion API.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a
//! pure inner function returning `(StatusCode, serde_json::Value)`. The inner
//! functions are directly testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET  /health        — health check with DB status
//! - GET  /users[?id=]   — list users, or fetch one by id
//! - POST /users         — create a user
//! - GET  /conversations?user_id= — list a user's conversations
//! - POST /conversations — create a conversation
//! - POST /chat?user_id=&uuid=    — process one chat turn
//!
//! Response envelope: `{"status": "success", "data": ...}` on success,
//! `{"status": "failed", "message": ...}` on error. Internal error text is
//! logged, never returned to the client.

use std::sync::Arc;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use geochat_core::completion::CompletionClient;
use geochat_core::config::GeochatConfig;
use geochat_core::error::StoreError;
use geochat_core::models::{ChatHistory, NewUser, Role};
use geochat_core::{db, password, store};

use crate::chat::{self, ChatError};

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub completion: CompletionClient,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/users", get(get_users_handler).post(create_user_handler))
        .route(
            "/conversations",
            get(get_conversations_handler).post(create_conversation_handler),
        )
        .route("/chat", post(chat_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    pool: PgPool,
    config: &GeochatConfig,
    completion: CompletionClient,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState { pool, completion });

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("GeoChat HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UsersQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatQuery {
    pub user_id: Option<String>,
    pub uuid: Option<String>,
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub user_id: i32,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    #[serde(default)]
    pub chat_history: Option<ChatHistory>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — queries DB and returns (status_code, json_body).
pub async fn health_inner(pool: &PgPool) -> (StatusCode, serde_json::Value) {
    match db::health_check(pool).await {
        Ok(version) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner users lookup — all users, or one by id when the param is present.
pub async fn get_users_inner(
    pool: &PgPool,
    query: UsersQuery,
) -> (StatusCode, serde_json::Value) {
    if let Some(raw) = query.id {
        let id = match raw.parse::<i32>() {
            Ok(id) => id,
            Err(_) => return (StatusCode::BAD_REQUEST, failure("Invalid id format")),
        };

        return match store::user::get_by_id(pool, id).await {
            Ok(Some(user)) => respond(StatusCode::OK, &user),
            Ok(None) => (StatusCode::NOT_FOUND, failure("User not found")),
            Err(e) => store_failure("Failed to fetch user", &e),
        };
    }

    match store::user::list_all(pool).await {
        Ok(users) => respond(StatusCode::OK, &users),
        Err(e) => store_failure("Failed to fetch users", &e),
    }
}

/// Inner user creation — hashes the password, then inserts.
pub async fn create_user_inner(pool: &PgPool, req: NewUser) -> (StatusCode, serde_json::Value) {
    if req.username.trim().is_empty() || req.email.trim().is_empty() || req.password.is_empty() {
        return (StatusCode::BAD_REQUEST, failure("Invalid request data"));
    }

    let password_hash = match password::hash(&req.password).await {
        Ok(hash) => hash,
        Err(e) => {
            tracing::error!(error = %e, "password hashing failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure("Failed to create user"),
            );
        }
    };

    match store::user::create(pool, &req.username, &req.email, &password_hash).await {
        Ok(user) => respond(StatusCode::CREATED, &user),
        Err(StoreError::Conflict(_)) => (StatusCode::CONFLICT, failure("Email already exists")),
        Err(e) => store_failure("Failed to create user", &e),
    }
}

/// Inner conversations lookup — requires the user_id param.
pub async fn get_conversations_inner(
    pool: &PgPool,
    query: ConversationsQuery,
) -> (StatusCode, serde_json::Value) {
    let raw = match query.user_id {
        Some(raw) => raw,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                failure("user_id query parameter is required"),
            )
        }
    };

    let user_id = match raw.parse::<i32>() {
        Ok(id) => id,
        Err(_) => return (StatusCode::BAD_REQUEST, failure("Invalid user_id format")),
    };

    match store::conversation::list_by_user(pool, user_id).await {
        Ok(conversations) if conversations.is_empty() => {
            (StatusCode::NOT_FOUND, failure("No conversations found"))
        }
        Ok(conversations) => respond(StatusCode::OK, &conversations),
        Err(e) => store_failure("Failed to fetch conversations", &e),
    }
}

/// Inner conversation creation — mints a token and seeds the history when
/// the body omits them. A supplied history must already start with the
/// system directive; every persisted conversation keeps that first turn.
pub async fn create_conversation_inner(
    pool: &PgPool,
    req: CreateConversationRequest,
) -> (StatusCode, serde_json::Value) {
    if let Some(history) = &req.chat_history {
        if history.turns().first().map(|t| t.role) != Some(Role::System) {
            return (
                StatusCode::BAD_REQUEST,
                failure("chat_history must begin with a system turn"),
            );
        }
    }

    let token = req.conversation_id.unwrap_or_else(Uuid::new_v4);
    let history = req.chat_history.unwrap_or_default();

    match store::conversation::create(pool, req.user_id, token, &history).await {
        Ok(conversation) => respond(StatusCode::CREATED, &conversation),
        Err(StoreError::Conflict(_)) => (
            StatusCode::CONFLICT,
            failure("Conversation already exists"),
        ),
        Err(e) => store_failure("Failed to create conversation", &e),
    }
}

/// Inner chat — parses the query identity, then runs the turn pipeline.
pub async fn chat_inner(
    state: &AppState,
    query: ChatQuery,
    body: ChatBody,
) -> (StatusCode, serde_json::Value) {
    let user_id = match query.user_id.as_deref() {
        Some(raw) => match raw.parse::<i32>() {
            Ok(id) => Some(id),
            Err(_) => return (StatusCode::BAD_REQUEST, failure("Invalid user_id format")),
        },
        None => None,
    };

    let token = match query.uuid.as_deref() {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(token) => Some(token),
            Err(_) => return (StatusCode::BAD_REQUEST, failure("Invalid uuid format")),
        },
        None => None,
    };

    match chat::process_turn(&state.pool, &state.completion, user_id, token, &body.content).await
    {
        Ok(reply) => (
            StatusCode::OK,
            json!({
                "status": "success",
                "data": {
                    "conversation_id": reply.conversation_id,
                    "response": {
                        "role": "assistant",
                        "locations": reply.reply.locations(),
                        "messages": reply.reply.messages(),
                    },
                },
            }),
        ),
        Err(e) => chat_failure(e),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state.pool).await;
    (status, Json(body))
}

pub async fn get_users_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UsersQuery>,
) -> impl IntoResponse {
    let (status, body) = get_users_inner(&state.pool, query).await;
    (status, Json(body))
}

pub async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<NewUser>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(failure("Invalid request data"))),
    };
    let (status, body) = create_user_inner(&state.pool, req).await;
    (status, Json(body))
}

pub async fn get_conversations_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationsQuery>,
) -> impl IntoResponse {
    let (status, body) = get_conversations_inner(&state.pool, query).await;
    (status, Json(body))
}

pub async fn create_conversation_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(failure("Invalid request data"))),
    };
    let (status, body) = create_conversation_inner(&state.pool, req).await;
    (status, Json(body))
}

pub async fn chat_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> impl IntoResponse {
    let Json(req) = match body {
        Ok(req) => req,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(failure("Invalid request data"))),
    };
    let (status, body) = chat_inner(&state, query, req).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Standard failure envelope.
fn failure(message: &str) -> serde_json::Value {
    json!({ "status": "failed", "message": message })
}

/// Serialize `data` into the success envelope with the given status.
fn respond<T: Serialize>(status: StatusCode, data: &T) -> (StatusCode, serde_json::Value) {
    match serde_json::to_value(data) {
        Ok(value) => (status, json!({ "status": "success", "data": value })),
        Err(e) => {
            tracing::error!(error = %e, "response serialization failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure("Failed to serialize response"),
            )
        }
    }
}

/// Log a store failure and map it to the client-facing envelope. `message`
/// is the short client text; the underlying error only goes to the log.
fn store_failure(message: &str, e: &StoreError) -> (StatusCode, serde_json::Value) {
    tracing::error!(error = %e, "{}", message);
    match e {
        StoreError::Conflict(field) => {
            (StatusCode::CONFLICT, failure(&format!("{field} already exists")))
        }
        _ => (StatusCode::INTERNAL_SERVER_ERROR, failure(message)),
    }
}

/// Map a chat pipeline error onto a status: bad input → 400,
/// absence → 404, conflict → 409, store/completion failure → 500.
fn chat_failure(e: ChatError) -> (StatusCode, serde_json::Value) {
    match e {
        ChatError::EmptyContent => (StatusCode::BAD_REQUEST, failure("content is required")),
        ChatError::UnknownUser => (
            StatusCode::BAD_REQUEST,
            failure("Invalid user_id: user does not exist"),
        ),
        ChatError::ConversationNotFound => {
            (StatusCode::NOT_FOUND, failure("Conversation not found"))
        }
        ChatError::Store(e) => store_failure("Failed to save conversation", &e),
        ChatError::Completion(e) => {
            tracing::error!(error = %e, "completion API call failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                failure("Failed to fetch response from completion API"),
            )
        }
    }
}

// ============================================================================
// Unit Tests — pure helpers; everything touching the DB lives in
// tests/http_integration.rs
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use geochat_core::completion::CompletionError;

    #[test]
    fn test_failure_envelope_shape() {
        let body = failure("nope");
        assert_eq!(body["status"], "failed");
        assert_eq!(body["message"], "nope");
    }

    #[test]
    fn test_respond_wraps_data_in_success_envelope() {
        let (status, body) = respond(StatusCode::CREATED, &json!({"id": 7}));
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "success");
        assert_eq!(body["data"]["id"], 7);
    }

    #[test]
    fn test_store_failure_maps_conflict_to_409() {
        let (status, body) = store_failure("Failed to create user", &StoreError::Conflict("email"));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["message"], "email already exists");
    }

    #[test]
    fn test_store_failure_maps_database_error_to_500() {
        let (status, body) =
            store_failure("Failed to fetch users", &StoreError::Database(sqlx::Error::RowNotFound));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to fetch users");
    }

    #[test]
    fn test_chat_failure_taxonomy() {
        let (status, _) = chat_failure(ChatError::EmptyContent);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = chat_failure(ChatError::UnknownUser);
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = chat_failure(ChatError::ConversationNotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = chat_failure(ChatError::Completion(CompletionError::EmptyChoices));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "Failed to fetch response from completion API");
    }
}
