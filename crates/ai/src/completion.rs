use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AiError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider-neutral completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,
    /// Model that produced the text, when the provider reports it.
    pub model: Option<String>,
}

/// Text-completion capability.
///
/// Implementations must not retry internally; callers decide what a failure means.
#[async_trait]
pub trait TextCompletion: Send + Sync + 'static {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AiError>;
}

/// Deterministic completion: replies with a fixed text (or a fixed failure) and records requests.
///
/// Used for local development without a provider and in tests.
#[derive(Debug, Default)]
pub struct FixedCompletion {
    reply: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl FixedCompletion {
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            reply: Some(text.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with a transport error.
    pub fn failing() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextCompletion for FixedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AiError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match &self.reply {
            Some(text) => Ok(CompletionResponse {
                text: text.clone(),
                model: Some("fixed".to_string()),
            }),
            None => Err(AiError::Transport("inference provider unavailable".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_completion_records_requests() {
        let ai = FixedCompletion::replying("ok");
        let res = ai
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap();
        assert_eq!(res.text, "ok");
        assert_eq!(ai.requests().len(), 1);
        assert_eq!(ai.requests()[0].messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn failing_completion_errors() {
        let ai = FixedCompletion::failing();
        let err = ai
            .complete(CompletionRequest::new(vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::Transport(_)));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_value(ChatMessage::system("x")).unwrap();
        assert_eq!(json["role"], "system");
    }
}
