//! Business logic services

pub mod certificate_service;
pub mod context;

pub use certificate_service::{CertificateService, HealthStatus, IssuancePolicy};
pub use context::RequestContext;
