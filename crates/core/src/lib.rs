//! `safework-core` - shared building blocks.
//!
//! This crate contains **pure** primitives (no infrastructure concerns):
//! error model, identifiers and the clock abstraction used for TTL/retention math.

pub mod clock;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, SubmissionId};
