use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Directive seeded as the first turn of every conversation. It instructs
/// the model to answer in the `{locations, messages}` envelope that the
/// chat endpoint parses leniently on the way back out.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant named GeoAI. \
Respond concisely to the user's queries in the following format:\n\
{\n\
\"locations\": \"comma-separated list of key locations\",\n\
\"messages\": \"detailed response to the user's query\"\n\
}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message within a conversation's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ordered, append-only sequence of turns. Persisted as a JSONB column;
/// encoding and decoding are explicit so malformed data fails at the
/// store boundary instead of flowing through as a dynamic map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatHistory(Vec<Turn>);

impl ChatHistory {
    /// A fresh history, seeded with the system directive as turn zero.
    pub fn new() -> Self {
        Self(vec![Turn::system(SYSTEM_PROMPT)])
    }

    pub fn push(&mut self, turn: Turn) {
        self.0.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted chat thread. `conversation_id` is the stable external token
/// clients use across requests; `id` is the store-assigned row id.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i32,
    pub user_id: i32,
    pub conversation_id: Uuid,
    pub chat_history: ChatHistory,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_history_starts_with_system_directive() {
        let history = ChatHistory::new();
        assert_eq!(history.len(), 1);
        assert_eq!(history.turns()[0].role, Role::System);
        assert_eq!(history.turns()[0].content, SYSTEM_PROMPT);
    }

    #[test]
    fn turns_serialize_as_role_content_objects() {
        let turn = Turn::user("where is Paris?");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value, serde_json::json!({"role": "user", "content": "where is Paris?"}));
    }

    #[test]
    fn history_round_trips_through_json() {
        let mut history = ChatHistory::new();
        history.push(Turn::user("hi"));
        history.push(Turn::assistant("hello"));

        let value = history.to_value().unwrap();
        let restored = ChatHistory::from_value(value).unwrap();
        assert_eq!(restored, history);
        assert_eq!(restored.len(), 3);
    }

    #[test]
    fn malformed_history_fails_to_decode() {
        let value = serde_json::json!([{"role": "narrator", "content": "once upon a time"}]);
        assert!(ChatHistory::from_value(value).is_err());

        let value = serde_json::json!({"not": "a list"});
        assert!(ChatHistory::from_value(value).is_err());
    }
}
