//! Process-wide tracing setup shared by the service binaries.

pub mod tracing;

pub use self::tracing::{init, init_with_default};
