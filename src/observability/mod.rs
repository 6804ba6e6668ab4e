//! Observability for the bridge
//!
//! Structured logging setup and span macros, plus a process-wide metrics
//! collector exposed over HTTP.

pub mod logging;
pub mod metrics;

// Re-export for convenience
pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsCollector, MetricsSnapshot};

// Span macros for structured logging
pub use logging::{mqtt_span, request_span};
