//! Process-wide tracing setup shared by the binaries.

/// Install the global subscriber (JSON unless `LOG_FORMAT=text`).
///
/// Later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;
