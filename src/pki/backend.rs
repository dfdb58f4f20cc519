//! Signing backend trait definition.

use crate::domain::{BackendKind, IssuedCertificate, RevocationOutcome, SigningRequest};
use crate::errors::Result;
use async_trait::async_trait;

/// Capability to issue and revoke client certificates.
///
/// Exactly one implementation is active per deployment. Implementations must be
/// safe to call concurrently from many requests and must not retry internally;
/// transient failures surface as `CertsError::BackendTransient` so the caller
/// decides.
#[async_trait]
pub trait SigningBackend: Send + Sync + std::fmt::Debug {
    /// Issue a certificate whose common name is `request.common_name`.
    ///
    /// # Errors
    ///
    /// - `Validation` if the request violates a backend constraint
    /// - `BackendTransient` if the authority is unreachable or overloaded
    /// - `BackendPermanent` if the authority refuses the request
    async fn issue(&self, request: &SigningRequest) -> Result<IssuedCertificate>;

    /// Revoke a previously issued certificate. Revoking twice is not an error.
    async fn revoke(&self, serial: &str) -> Result<RevocationOutcome>;

    fn kind(&self) -> BackendKind;

    /// Verify the backend is reachable without issuing anything.
    async fn health_check(&self) -> Result<()>;
}
