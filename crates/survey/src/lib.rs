//! Survey domain module.
//!
//! This crate contains the occupational-health survey model and the normalizer
//! that turns heterogeneous, version-tagged form payloads into canonical records.
//! Pure, deterministic logic (no IO, no HTTP, no storage).

pub mod error;
pub mod form;
pub mod normalizer;
pub mod record;

pub use error::ValidationError;
pub use form::{FormSpec, FormType, ScalarField};
pub use normalizer::{NormalizedSubmission, Payload, merge_changes, normalize};
pub use record::{ScalarFields, SurveyRecord, SurveyStatus};
