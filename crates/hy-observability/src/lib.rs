//! # hy-observability
//!
//! Logging and metrics infrastructure for Hydra.
//!
//! Structured logging is built on `tracing`; sync outcome counters and run
//! durations are recorded through the `metrics` facade.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, init_logging_with_config, LoggingConfig};
pub use metrics::describe_metrics;
