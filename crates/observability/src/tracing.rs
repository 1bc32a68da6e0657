//! JSON logs on stdout, filtered by `RUST_LOG`.
//!
//! Span fields such as `submission_id`, `job_type` and `message_id` are
//! flattened into each event through the current-span context.

use tracing_subscriber::EnvFilter;

/// Initialize with the `info` default.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default("info");
}

/// Initialize with `default_directive` used when `RUST_LOG` is unset or invalid.
/// Returns `false` when a global subscriber was already installed.
pub fn init_with_default(default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(false)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init();
        assert!(!init_with_default("debug"));
    }
}
