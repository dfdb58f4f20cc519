//! Request and response bodies for the certificate API.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{CertificatePage, CertificateRecord, RevocationOutcome, RevocationSummary};
use crate::services::HealthStatus;

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct IssueCertificateRequest {
    #[validate(length(min = 1, max = 256, message = "thing_id must be 1-256 characters"))]
    pub thing_id: String,

    /// Validity as a duration string such as `24h` or `30d`
    #[serde(default)]
    pub ttl: Option<String>,

    #[serde(default)]
    pub key_type: Option<String>,

    #[serde(default)]
    pub key_bits: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListCertificatesQuery {
    pub thing_id: Option<String>,
    pub offset: Option<u32>,
    pub limit: Option<u32>,
}

// ============================================================================
// Responses
// ============================================================================

/// A stored certificate. Never carries the private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateResponse {
    pub serial: String,
    pub thing_id: String,
    pub owner_id: String,
    pub certificate: String,
    pub ca_chain: Option<String>,
    pub key_type: String,
    pub not_before: String,
    pub not_after: String,
    pub revoked: bool,
    pub revoked_at: Option<String>,
    pub backend: String,
}

impl From<&CertificateRecord> for CertificateResponse {
    fn from(record: &CertificateRecord) -> Self {
        Self {
            serial: record.serial.clone(),
            thing_id: record.thing_id.to_string(),
            owner_id: record.owner_id.to_string(),
            certificate: record.certificate_pem.clone(),
            ca_chain: record.ca_chain_pem.clone(),
            key_type: record.key_type.clone(),
            not_before: record.not_before.to_rfc3339(),
            not_after: record.not_after.to_rfc3339(),
            revoked: record.revoked,
            revoked_at: record.revoked_at.map(|dt| dt.to_rfc3339()),
            backend: record.backend.to_string(),
        }
    }
}

/// Response to a successful issuance: the only time the private key leaves
/// the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCertificateResponse {
    #[serde(flatten)]
    pub certificate: CertificateResponse,
    pub private_key: Option<String>,
}

impl From<&CertificateRecord> for IssuedCertificateResponse {
    fn from(record: &CertificateRecord) -> Self {
        Self {
            certificate: CertificateResponse::from(record),
            private_key: record.private_key_pem.as_ref().map(|k| k.expose_secret().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificatePageResponse {
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
    pub certificates: Vec<CertificateResponse>,
}

impl From<&CertificatePage> for CertificatePageResponse {
    fn from(page: &CertificatePage) -> Self {
        Self {
            total: page.total,
            offset: page.offset,
            limit: page.limit,
            certificates: page.certificates.iter().map(CertificateResponse::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeCertificateResponse {
    pub serial: String,
    pub revoked: bool,
    pub already_revoked: bool,
}

impl RevokeCertificateResponse {
    pub fn new(serial: String, outcome: RevocationOutcome) -> Self {
        Self { serial, revoked: true, already_revoked: outcome.is_already_revoked() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeThingCertificatesResponse {
    pub thing_id: String,
    pub revoked: Vec<String>,
    pub already_revoked: Vec<String>,
}

impl RevokeThingCertificatesResponse {
    pub fn new(thing_id: String, summary: RevocationSummary) -> Self {
        Self { thing_id, revoked: summary.revoked, already_revoked: summary.already_revoked }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub backend: String,
    pub database: String,
    pub signing_backend: String,
}

impl From<HealthStatus> for HealthResponse {
    fn from(health: HealthStatus) -> Self {
        let state = |ok: bool| if ok { "ok" } else { "unavailable" }.to_string();
        Self {
            status: if health.is_healthy() { "ok" } else { "degraded" }.to_string(),
            backend: health.backend.to_string(),
            database: state(health.database_ok),
            signing_backend: state(health.backend_ok),
        }
    }
}
