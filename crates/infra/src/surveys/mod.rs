//! Survey persistence and the submission service.

pub mod audit;
pub mod repository;
pub mod service;

pub use audit::{AuditEntry, AuditLog, actions};
pub use repository::{SurveyFilter, SurveyRepository};
pub use service::{RequestMeta, SubmissionError, SubmissionOutcome, SubmissionService};
