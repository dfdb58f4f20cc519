//! # Metrics
//!
//! Counters for the certificate lifecycle, recorded through the `metrics` facade
//! and exposed by the Prometheus exporter when a metrics port is configured.
//! Without an installed recorder every call is a no-op.

use crate::config::ObservabilityConfig;
use crate::errors::{CertsError, Result};
use metrics::{counter, describe_counter, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Outcome label for `certs_compensations_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    Revoked,
    Failed,
}

impl CompensationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationOutcome::Revoked => "revoked",
            CompensationOutcome::Failed => "failed",
        }
    }
}

/// Records certificate lifecycle counters
#[derive(Debug, Clone, Copy, Default)]
pub struct CertificateMetrics;

impl CertificateMetrics {
    pub fn record_issued(&self, backend: &str) {
        counter!("certs_issued_total", "backend" => backend.to_string()).increment(1);
    }

    pub fn record_revoked(&self, backend: &str) {
        counter!("certs_revoked_total", "backend" => backend.to_string()).increment(1);
    }

    pub fn record_compensation(&self, backend: &str, outcome: CompensationOutcome) {
        counter!(
            "certs_compensations_total",
            "backend" => backend.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// A credential exists at the authority with no record and no revocation
    pub fn record_orphaned(&self, backend: &str) {
        counter!("certs_orphaned_credentials_total", "backend" => backend.to_string())
            .increment(1);
    }

    fn describe(&self) {
        describe_counter!("certs_issued_total", Unit::Count, "Certificates issued and recorded");
        describe_counter!("certs_revoked_total", Unit::Count, "Certificates revoked");
        describe_counter!(
            "certs_compensations_total",
            Unit::Count,
            "Compensating revocations after a failed save"
        );
        describe_counter!(
            "certs_orphaned_credentials_total",
            Unit::Count,
            "Issued certificates that were neither recorded nor revoked"
        );
    }
}

/// Install the Prometheus exporter if a metrics port is configured.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no metrics port configured");
            return Ok(());
        }
    };

    let socket_addr: SocketAddr = metrics_addr.parse().map_err(|e| {
        CertsError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", "thingcerts")
        .install()
        .map_err(|e| CertsError::config(format!("Failed to initialize metrics exporter: {}", e)))?;

    CertificateMetrics.describe();

    info!(metrics_addr = %metrics_addr, "Metrics collection initialized");
    Ok(())
}
