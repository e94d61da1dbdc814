//! Completion API client — forwards an ordered chat history to the external
//! LLM completion endpoint (OpenAI-compatible `/chat/completions`) and
//! extracts the first choice's assistant message.
//!
//! One synchronous call per chat turn: no retries, no fallback. A non-2xx
//! status or a body missing `choices[0].message` fails the request. The
//! assistant's *content*, by contrast, is parsed leniently into
//! [`ReplyContent`] and never fails.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompletionConfig;
use crate::models::{ChatHistory, Role, Turn};

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("completion API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("no choices returned in completion response")]
    EmptyChoices,

    #[error("missing API key")]
    MissingApiKey,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Turn,
}

/// Client for the external completion API, bearer-token authenticated.
#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, CompletionError> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("GROQ_API_KEY").ok())
            .unwrap_or_default();

        if api_key.is_empty() {
            return Err(CompletionError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: &CompletionConfig,
        base_url: String,
    ) -> Result<Self, CompletionError> {
        let mut client = Self::new(config)?;
        client.base_url = base_url;
        Ok(client)
    }

    /// Send the full ordered history and return the assistant turn.
    pub async fn complete(&self, history: &ChatHistory) -> Result<Turn, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = CompletionRequest {
            model: &self.model,
            messages: history.turns(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(code = status.as_u16(), body = %body, "completion API error");
            return Err(CompletionError::Api {
                code: status.as_u16(),
                message: body,
            });
        }

        let completion: CompletionResponse = response.json().await?;
        let choice = completion
            .choices
            .into_iter()
            .next()
            .ok_or(CompletionError::EmptyChoices)?;

        Ok(Turn {
            role: Role::Assistant,
            content: choice.message.content,
        })
    }
}

// ============================================================================
// Reply content envelope
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReplyEnvelope {
    locations: String,
    messages: String,
}

/// Outcome of leniently parsing the assistant's content. The system prompt
/// asks for a `{locations, messages}` JSON object, but the model is not
/// guaranteed to comply; non-conforming content degrades to `Raw` instead
/// of failing the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContent {
    Structured { locations: String, messages: String },
    Raw(String),
}

impl ReplyContent {
    pub fn parse(content: &str) -> Self {
        match serde_json::from_str::<ReplyEnvelope>(content) {
            Ok(envelope) => ReplyContent::Structured {
                locations: envelope.locations,
                messages: envelope.messages,
            },
            Err(_) => ReplyContent::Raw(content.to_string()),
        }
    }

    pub fn locations(&self) -> &str {
        match self {
            ReplyContent::Structured { locations, .. } => locations,
            ReplyContent::Raw(_) => "",
        }
    }

    pub fn messages(&self) -> &str {
        match self {
            ReplyContent::Structured { messages, .. } => messages,
            ReplyContent::Raw(content) => content,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> CompletionConfig {
        CompletionConfig {
            api_key: Some(api_key.to_string()),
            timeout_seconds: 5,
            ..Default::default()
        }
    }

    fn mock_completion_response(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    #[tokio::test]
    async fn test_complete_sends_history_and_returns_assistant_turn() {
        let mock_server = MockServer::start().await;
        let client = CompletionClient::with_base_url(&test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        let mut history = ChatHistory::new();
        history.push(Turn::user("where is the Eiffel Tower?"));

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "model": "llama-3.3-70b-versatile",
                "messages": [
                    { "role": "system", "content": crate::models::SYSTEM_PROMPT },
                    { "role": "user", "content": "where is the Eiffel Tower?" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_completion_response(
                "{\"locations\":\"Paris\",\"messages\":\"It is in Paris.\"}",
            )))
            .mount(&mock_server)
            .await;

        let turn = client.complete(&history).await.expect("completion failed");
        assert_eq!(turn.role, Role::Assistant);
        assert!(turn.content.contains("Paris"));
    }

    #[tokio::test]
    async fn test_complete_fails_on_api_500() {
        let mock_server = MockServer::start().await;
        let client = CompletionClient::with_base_url(&test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&mock_server)
            .await;

        let result = client.complete(&ChatHistory::new()).await;
        match result {
            Err(CompletionError::Api { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_fails_on_empty_choices() {
        let mock_server = MockServer::start().await;
        let client = CompletionClient::with_base_url(&test_config("test-key"), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&mock_server)
            .await;

        let result = client.complete(&ChatHistory::new()).await;
        assert!(matches!(result, Err(CompletionError::EmptyChoices)));
    }

    #[tokio::test]
    async fn test_client_requires_api_key() {
        // An explicitly empty key never falls through to the environment.
        let config = CompletionConfig {
            api_key: Some(String::new()),
            ..Default::default()
        };
        let result = CompletionClient::new(&config);
        assert!(matches!(result, Err(CompletionError::MissingApiKey)));
    }

    #[test]
    fn test_reply_content_parses_structured_envelope() {
        let parsed = ReplyContent::parse("{\"locations\":\"Paris\",\"messages\":\"Hi\"}");
        assert_eq!(
            parsed,
            ReplyContent::Structured {
                locations: "Paris".to_string(),
                messages: "Hi".to_string()
            }
        );
        assert_eq!(parsed.locations(), "Paris");
        assert_eq!(parsed.messages(), "Hi");
    }

    #[test]
    fn test_reply_content_falls_back_to_raw() {
        let parsed = ReplyContent::parse("hello");
        assert_eq!(parsed, ReplyContent::Raw("hello".to_string()));
        assert_eq!(parsed.locations(), "");
        assert_eq!(parsed.messages(), "hello");
    }

    #[test]
    fn test_reply_content_tolerates_partial_envelope() {
        let parsed = ReplyContent::parse("{\"messages\":\"no locations here\"}");
        assert_eq!(parsed.locations(), "");
        assert_eq!(parsed.messages(), "no locations here");
    }
}
