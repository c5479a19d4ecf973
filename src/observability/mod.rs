//! Observability for the tickerlink client
//!
//! Structured logging through `tracing`, plus the span macros used by the
//! service and connection tasks.

pub mod logging;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use logging::{service_span, stomp_span};
