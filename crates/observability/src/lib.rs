//! Tracing/logging setup shared by binaries and tests.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::LogOptions;
