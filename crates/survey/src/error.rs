use thiserror::Error;

use safework_core::DomainError;

/// Rejection of a submission payload.
///
/// Always a client-side problem; retrying the same payload cannot succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload must be a JSON object")]
    NotAnObject,

    #[error("form_type is required")]
    MissingFormType,

    #[error("unknown form type: {0}")]
    UnknownFormType(String),

    #[error("required field `{0}` is missing")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid integer: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("field `{0}` cannot be changed after submission")]
    Immutable(&'static str),
}

impl From<ValidationError> for DomainError {
    fn from(value: ValidationError) -> Self {
        DomainError::validation(value.to_string())
    }
}
