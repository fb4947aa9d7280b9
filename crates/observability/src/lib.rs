//! Tracing and logging (shared setup for every binary in the workspace).

/// Initialize process-wide observability (tracing/logging).
///
/// The output format comes from `LOG_FORMAT` (`json` by default, `pretty` for
/// local development). This is safe to call multiple times; subsequent calls
/// become no-ops.
pub fn init() {
    let format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    tracing::init(format);
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use crate::tracing::LogFormat;
