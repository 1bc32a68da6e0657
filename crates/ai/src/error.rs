use thiserror::Error;

/// Failure talking to the inference collaborator.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI collaborator is not configured: {0}")]
    NotConfigured(String),

    #[error("AI request failed: {0}")]
    Transport(String),

    #[error("AI request timed out: {0}")]
    Timeout(String),

    #[error("AI provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("AI response could not be parsed: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for AiError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            AiError::Timeout(value.to_string())
        } else {
            AiError::Transport(value.to_string())
        }
    }
}
