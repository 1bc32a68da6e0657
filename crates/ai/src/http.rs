//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::completion::{CompletionRequest, CompletionResponse, TextCompletion};
use crate::error::AiError;

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct HttpCompletionConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Whole-request ceiling, connect through body.
    pub timeout: Duration,
}

impl HttpCompletionConfig {
    /// `AI_API_URL`, `AI_API_KEY`, `AI_MODEL`, `AI_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self, AiError> {
        let timeout = match std::env::var("AI_TIMEOUT_SECS") {
            Ok(raw) if !raw.trim().is_empty() => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(AiError::NotConfigured(format!(
                        "AI_TIMEOUT_SECS must be a positive integer, got {raw:?}"
                    )));
                }
            },
            _ => DEFAULT_TIMEOUT,
        };
        Ok(Self {
            api_url: std::env::var("AI_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            api_key: std::env::var("AI_API_KEY").ok().filter(|k| !k.trim().is_empty()),
            model: std::env::var("AI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            timeout,
        })
    }
}

#[derive(Clone)]
pub struct HttpCompletionClient {
    config: HttpCompletionConfig,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: HttpCompletionConfig) -> Result<Self, AiError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> Result<Self, AiError> {
        Self::new(HttpCompletionConfig::from_env()?)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct ApiResponse {
    model: Option<String>,
    choices: Vec<Choice>,
}

#[async_trait]
impl TextCompletion for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, AiError> {
        // Missing key fails the call, not start-up; jobs needing AI are retried.
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AiError::NotConfigured("AI_API_KEY is not set".to_string()))?;

        let mut body = json!({
            "model": &self.config.model,
            "messages": request.messages,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::Provider { status, body });
        }

        let text = response.text().await?;
        tracing::debug!(model = %self.config.model, bytes = text.len(), "ai completion received");
        parse_response(&text)
    }
}

fn parse_response(raw: &str) -> Result<CompletionResponse, AiError> {
    let api: ApiResponse =
        serde_json::from_str(raw).map_err(|e| AiError::InvalidResponse(e.to_string()))?;
    let text = api
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| AiError::InvalidResponse("no choices in response".to_string()))?;
    Ok(CompletionResponse { text, model: api.model })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::ChatMessage;

    #[test]
    fn parses_first_choice() {
        let raw = r#"{"model":"m","choices":[{"message":{"role":"assistant","content":"hello"}}]}"#;
        let res = parse_response(raw).unwrap();
        assert_eq!(res.text, "hello");
        assert_eq!(res.model.as_deref(), Some("m"));
    }

    #[test]
    fn empty_choices_is_an_error() {
        let err = parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, AiError::InvalidResponse(_)));
    }

    fn config(api_url: String, api_key: Option<&str>, timeout: Duration) -> HttpCompletionConfig {
        HttpCompletionConfig {
            api_url,
            api_key: api_key.map(str::to_string),
            model: "m".to_string(),
            timeout,
        }
    }

    #[tokio::test]
    async fn missing_key_fails_without_network() {
        let client =
            HttpCompletionClient::new(config("http://127.0.0.1:9/unused".to_string(), None, DEFAULT_TIMEOUT)).unwrap();
        let err = client
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AiError::NotConfigured(_)));
    }

    #[tokio::test]
    async fn unresponsive_provider_times_out() {
        // Accepts connections and never writes a byte.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (socket, _) = listener.accept().await.unwrap();
                held.push(socket);
            }
        });

        let client = HttpCompletionClient::new(config(
            format!("http://{addr}/v1/chat/completions"),
            Some("key"),
            Duration::from_millis(200),
        ))
        .unwrap();
        let started = std::time::Instant::now();
        let err = client
            .complete(CompletionRequest::new(vec![ChatMessage::user("x")]))
            .await
            .unwrap_err();

        assert!(matches!(err, AiError::Timeout(_)), "unexpected error: {err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));
        server.abort();
    }
}
