use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use surveyengine_core::config::OracleConfig;
use surveyengine_core::domain::{Message, MessageRole};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oracle api error: {status} {message}")]
    Api { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
}

/// The LLM abstraction: `invoke(messages) -> text`. The client itself is
/// treated as an external collaborator — this trait is the entire surface
/// the graph executor and condition evaluator depend on.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn invoke(&self, messages: &[Message]) -> Result<String, OracleError>;
}

/// Scripted/echo oracle for tests and the `local`/`test` environments.
pub struct MockOracle {
    scripted: Mutex<VecDeque<String>>,
    default_reply: String,
}

impl MockOracle {
    pub fn new(scripted: Vec<String>) -> Self {
        Self { scripted: Mutex::new(scripted.into()), default_reply: "ok".to_string() }
    }

    pub fn with_default(default_reply: impl Into<String>) -> Self {
        Self { scripted: Mutex::new(VecDeque::new()), default_reply: default_reply.into() }
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn invoke(&self, _messages: &[Message]) -> Result<String, OracleError> {
        let mut queue = self.scripted.lock().unwrap();
        Ok(queue.pop_front().unwrap_or_else(|| self.default_reply.clone()))
    }
}

/// Minimal OpenAI-chat-completions-compatible client: no tool calls, no
/// streaming, no multi-provider dispatch — the engine only ever needs one
/// blocking text reply per `invoke` call.
pub struct HttpOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpOracle {
    pub fn new(config: &OracleConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .expect("failed to build oracle http client");
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

fn to_wire_role(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::Human => "user",
        MessageRole::Assistant => "assistant",
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn invoke(&self, messages: &[Message]) -> Result<String, OracleError> {
        let body = ChatRequestBody {
            model: &self.model,
            messages: messages
                .iter()
                .map(|m| ChatMessage { role: to_wire_role(m.role), content: m.content.clone() })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(OracleError::Api { status: status.as_u16(), message });
        }

        let parsed: ChatResponseBody = response.json().await.map_err(|e| OracleError::Parse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::Parse("empty choices array".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_oracle_plays_back_scripted_replies_then_falls_back_to_default() {
        let oracle = MockOracle::new(vec!["first".to_string(), "second".to_string()]);
        assert_eq!(oracle.invoke(&[]).await.unwrap(), "first");
        assert_eq!(oracle.invoke(&[]).await.unwrap(), "second");
        assert_eq!(oracle.invoke(&[]).await.unwrap(), "ok");
    }
}
