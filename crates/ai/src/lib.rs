//! `safework-ai`
//!
//! **Responsibility:** AI collaborator boundary.
//!
//! - Consumed as a black-box text-completion capability.
//! - Owns prompt templates (narrative report + risk/trends/anomalies/insights analysis).
//! - Never mutates survey data; results are persisted by callers (infra job handlers).

pub mod completion;
pub mod error;
pub mod http;
pub mod prompt;

pub use completion::{ChatMessage, CompletionRequest, CompletionResponse, FixedCompletion, Role, TextCompletion};
pub use error::AiError;
pub use http::{HttpCompletionClient, HttpCompletionConfig};
pub use prompt::{AnalysisType, analysis_request, report_request};
