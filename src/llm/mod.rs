//! Chat completion adapter
//!
//! Thin boundary over the OpenAI-style chat completions endpoint. The
//! controller hands it the full dialogue snapshot each turn; the reply is
//! the first choice's content, whitespace-trimmed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Default chat model
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Role of a dialogue message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One dialogue entry; role and content are immutable once appended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

/// Generates an assistant reply from the dialogue history
#[async_trait]
pub trait Respond: Send + Sync {
    /// Produce the assistant reply for `messages`.
    ///
    /// Returns [`Error::Cancelled`] promptly when `cancel` fires.
    async fn reply(&self, messages: &[Message], cancel: &CancellationToken) -> Result<String>;
}

/// Chat completion client
pub struct ChatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(api_key: String, model: String, temperature: f32, max_tokens: u32) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for chat".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .map_err(|e| Error::Responder(e.to_string()))?,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key,
            model,
            temperature,
            max_tokens,
        })
    }

    async fn request(&self, messages: &[Message]) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Responder(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ApiErrorResponse>(&body)
                .map_or(body, |e| e.error.message);
            return Err(Error::Responder(format!("chat API error {status}: {detail}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::Responder(format!("failed to parse chat response: {e}")))?;

        let reply = result
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| Error::Responder("chat response contained no choices".to_string()))?;

        Ok(reply)
    }
}

#[async_trait]
impl Respond for ChatClient {
    async fn reply(&self, messages: &[Message], cancel: &CancellationToken) -> Result<String> {
        tracing::debug!(messages = messages.len(), model = %self.model, "requesting chat completion");

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            result = self.request(messages) => result,
        }
    }
}
