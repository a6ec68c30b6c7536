//! Well-known metadata keys.

/// Identifies the end-to-end flow an event belongs to.
pub const CORRELATION_ID: &str = "correlation_id";

/// Identifies the message that directly caused an event.
pub const CAUSATION_ID: &str = "causation_id";
