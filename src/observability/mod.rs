//! # Observability
//!
//! Structured logging and lifecycle metrics.

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, log_config_info};
pub use metrics::{init_metrics, CertificateMetrics, CompensationOutcome};
