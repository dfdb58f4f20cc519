//! Certificate lifecycle business logic
//!
//! Orchestrates the token issuer, the thing directory, the signing backend and
//! the certificate store. The one cross-system invariant lives here: a
//! certificate issued by the backend is either recorded or (best effort)
//! revoked again before the caller hears about it.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::runtime::Handle;
use tracing::{error, info, instrument, warn};

use super::context::RequestContext;
use crate::clients::{AuthorizationClient, ThingDirectoryClient};
use crate::config::AppConfig;
use crate::domain::{
    normalize_serial, BackendKind, CertificatePage, CertificateRecord, KeySpec, OwnerId,
    PageRequest, RevocationOutcome, RevocationSummary, SigningRequest, ThingId,
};
use crate::errors::{CertsError, Result};
use crate::observability::{CertificateMetrics, CompensationOutcome};
use crate::pki::SigningBackend;
use crate::storage::CertificateRepository;

/// Defaults applied to issue requests that leave validity or key spec open.
#[derive(Debug, Clone)]
pub struct IssuancePolicy {
    pub default_validity: Duration,
    pub default_key_spec: KeySpec,
    pub min_rsa_bits: u32,
    /// Budget for the compensating revoke, independent of the request deadline
    pub compensation_timeout: StdDuration,
}

impl IssuancePolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_validity: config.signing.default_validity,
            default_key_spec: KeySpec::Rsa { bits: config.signing.min_rsa_bits },
            min_rsa_bits: config.signing.min_rsa_bits,
            compensation_timeout: config.server.compensation_timeout(),
        }
    }
}

impl Default for IssuancePolicy {
    fn default() -> Self {
        Self {
            default_validity: Duration::hours(2048),
            default_key_spec: KeySpec::Rsa { bits: 2048 },
            min_rsa_bits: 2048,
            compensation_timeout: StdDuration::from_secs(10),
        }
    }
}

/// Liveness of the service's own dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub backend: BackendKind,
    pub database_ok: bool,
    pub backend_ok: bool,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        self.database_ok && self.backend_ok
    }
}

pub struct CertificateService {
    auth: Arc<dyn AuthorizationClient>,
    things: Arc<dyn ThingDirectoryClient>,
    backend: Arc<dyn SigningBackend>,
    repository: Arc<dyn CertificateRepository>,
    policy: IssuancePolicy,
    metrics: CertificateMetrics,
}

impl CertificateService {
    pub fn new(
        auth: Arc<dyn AuthorizationClient>,
        things: Arc<dyn ThingDirectoryClient>,
        backend: Arc<dyn SigningBackend>,
        repository: Arc<dyn CertificateRepository>,
        policy: IssuancePolicy,
    ) -> Self {
        Self { auth, things, backend, repository, policy, metrics: CertificateMetrics }
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Resolve the caller's token to an owner id.
    pub async fn identify(&self, ctx: &RequestContext) -> Result<OwnerId> {
        ctx.within("identify", self.auth.identify(ctx.token())).await
    }

    /// Issue and record a client certificate for one of the caller's things.
    #[instrument(skip(self, ctx, validity, key_spec), fields(thing_id = %thing_id, backend = %self.backend.kind()), name = "issue_certificate")]
    pub async fn issue_certificate(
        &self,
        ctx: &RequestContext,
        thing_id: &ThingId,
        validity: Option<Duration>,
        key_spec: Option<KeySpec>,
    ) -> Result<CertificateRecord> {
        let owner = self.identify(ctx).await?;
        let thing = ctx.within("resolve_thing", self.things.resolve(thing_id, &owner)).await?;
        let request = self.signing_request(&thing.thing_id, &thing.external_key, validity, key_spec)?;

        let issued = ctx
            .within("backend_issue", self.backend.issue(&request))
            .await
            .map_err(|e| match e {
                CertsError::Timeout { .. } => {
                    // No serial to revoke; the authority may still have signed.
                    error!(
                        thing_id = %thing.thing_id,
                        common_name = %request.common_name,
                        possible_orphan = true,
                        error = %e,
                        "Issuance timed out after dispatch"
                    );
                    e.with_unknown_outcome()
                }
                other => other,
            })?;

        // From here on the credential exists at the authority. Until the record
        // is stored, dropping this future revokes it again.
        let mut guard = CompensationGuard::arm(
            Arc::clone(&self.backend),
            issued.serial.clone(),
            self.policy.compensation_timeout,
            self.metrics,
        );

        let serial = issued.serial.clone();
        let saved = match CertificateRecord::from_issued(issued, &thing, self.backend.kind(), Utc::now())
        {
            Ok(record) => self.repository.save(&record).await.map(|_| record),
            Err(e) => Err(e),
        };

        match saved {
            Ok(record) => {
                guard.disarm();
                self.metrics.record_issued(self.backend.kind().as_str());
                info!(
                    serial = %record.serial,
                    owner_id = %record.owner_id,
                    key_type = %record.key_type,
                    not_after = %record.not_after,
                    "Certificate issued"
                );
                Ok(record)
            }
            Err(e) => {
                warn!(serial = %serial, error = %e, "Issued certificate could not be recorded");
                let compensated = compensate(
                    self.backend.as_ref(),
                    &serial,
                    self.policy.compensation_timeout,
                    self.metrics,
                )
                .await;
                guard.disarm();
                Err(CertsError::consistency(serial, e.to_string(), compensated))
            }
        }
    }

    /// Revoke one certificate owned by the caller.
    #[instrument(skip(self, ctx), fields(backend = %self.backend.kind()), name = "revoke_certificate")]
    pub async fn revoke_certificate(
        &self,
        ctx: &RequestContext,
        serial: &str,
    ) -> Result<RevocationOutcome> {
        let owner = self.identify(ctx).await?;
        let serial = normalize_serial(serial);
        let record = self.repository.find_by_serial(&serial).await?;

        if record.owner_id != owner {
            return Err(CertsError::forbidden(format!(
                "Certificate '{}' belongs to another owner",
                serial
            )));
        }

        self.revoke_record(ctx, &record).await
    }

    /// Revoke every active certificate of one of the caller's things.
    ///
    /// Stops at the first failure. Revocations completed before it stay
    /// committed and are not rolled back.
    #[instrument(skip(self, ctx), fields(thing_id = %thing_id), name = "revoke_thing_certificates")]
    pub async fn revoke_thing_certificates(
        &self,
        ctx: &RequestContext,
        thing_id: &ThingId,
    ) -> Result<RevocationSummary> {
        let owner = self.identify(ctx).await?;

        let known = self.repository.find_by_thing(&owner, thing_id, PageRequest::new(0, 1)?).await?;
        if known.total == 0 {
            return Err(CertsError::not_found("Thing", thing_id.as_str()));
        }

        let active = self.repository.find_active_by_thing(&owner, thing_id).await?;
        let mut summary = RevocationSummary::default();

        for record in &active {
            match self.revoke_record(ctx, record).await {
                Ok(RevocationOutcome::Revoked) => summary.revoked.push(record.serial.clone()),
                Ok(RevocationOutcome::AlreadyRevoked) => {
                    summary.already_revoked.push(record.serial.clone())
                }
                Err(e) => {
                    warn!(
                        serial = %record.serial,
                        revoked_so_far = summary.revoked.len(),
                        remaining = active.len() - summary.revoked.len() - summary.already_revoked.len(),
                        error = %e,
                        "Stopped revoking thing certificates"
                    );
                    return Err(e);
                }
            }
        }

        info!(revoked = summary.revoked.len(), "Thing certificates revoked");
        Ok(summary)
    }

    /// Page through the caller's certificates, optionally for one thing.
    pub async fn list_certificates(
        &self,
        ctx: &RequestContext,
        thing_id: Option<&ThingId>,
        page: PageRequest,
    ) -> Result<CertificatePage> {
        let owner = self.identify(ctx).await?;
        match thing_id {
            Some(thing_id) => self.repository.find_by_thing(&owner, thing_id, page).await,
            None => self.repository.find_by_owner(&owner, page).await,
        }
    }

    /// Fetch one of the caller's certificates. Other owners' serials read as
    /// not found.
    pub async fn get_certificate(
        &self,
        ctx: &RequestContext,
        serial: &str,
    ) -> Result<CertificateRecord> {
        let owner = self.identify(ctx).await?;
        let serial = normalize_serial(serial);
        let record = self.repository.find_by_serial(&serial).await?;
        if record.owner_id != owner {
            return Err(CertsError::not_found("Certificate", serial));
        }
        Ok(record)
    }

    pub async fn health(&self) -> HealthStatus {
        let database_ok = match self.repository.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Certificate store health check failed");
                false
            }
        };
        let backend_ok = match self.backend.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, backend = %self.backend.kind(), "Signing backend health check failed");
                false
            }
        };
        HealthStatus { backend: self.backend.kind(), database_ok, backend_ok }
    }

    fn signing_request(
        &self,
        thing_id: &ThingId,
        common_name: &str,
        validity: Option<Duration>,
        key_spec: Option<KeySpec>,
    ) -> Result<SigningRequest> {
        let validity = validity.unwrap_or(self.policy.default_validity);
        // Certificates carry whole seconds; drop any fraction up front so the
        // stored window equals the requested one.
        let validity = Duration::seconds(validity.num_seconds());
        if validity <= Duration::zero() {
            return Err(CertsError::validation_field("validity must be positive", "ttl"));
        }

        let key_spec = key_spec.unwrap_or(self.policy.default_key_spec);
        key_spec.validate_strength(self.policy.min_rsa_bits)?;

        Ok(SigningRequest {
            thing_id: thing_id.clone(),
            common_name: common_name.to_string(),
            validity,
            key_spec,
        })
    }

    async fn revoke_record(
        &self,
        ctx: &RequestContext,
        record: &CertificateRecord,
    ) -> Result<RevocationOutcome> {
        if record.revoked {
            return Ok(RevocationOutcome::AlreadyRevoked);
        }

        let active = self.backend.kind();
        if record.backend == active {
            ctx.within("backend_revoke", self.backend.revoke(&record.serial)).await?;
        } else if record.backend == BackendKind::LocalCa {
            // Local CA revocation has no remote side; only the record changes.
            info!(serial = %record.serial, "Revoking local CA certificate under a different backend");
        } else {
            return Err(CertsError::backend_permanent(
                active.as_str(),
                format!(
                    "certificate {} was issued by the {} backend, which is not active",
                    record.serial, record.backend
                ),
            ));
        }

        let outcome = self.repository.mark_revoked(&record.serial, Utc::now()).await?;
        if outcome == RevocationOutcome::Revoked {
            self.metrics.record_revoked(record.backend.as_str());
            info!(serial = %record.serial, owner_id = %record.owner_id, "Certificate revoked");
        }
        Ok(outcome)
    }
}

/// Revoke `serial` on the backend after it could not be recorded.
///
/// Returns whether the revocation went through. A failure leaves an orphaned
/// credential at the authority: logged at ERROR and counted.
async fn compensate(
    backend: &dyn SigningBackend,
    serial: &str,
    timeout: StdDuration,
    metrics: CertificateMetrics,
) -> bool {
    let kind = backend.kind();
    let failure = match tokio::time::timeout(timeout, backend.revoke(serial)).await {
        Ok(Ok(_)) => {
            warn!(serial = %serial, backend = %kind, "Compensating revoke succeeded");
            metrics.record_compensation(kind.as_str(), CompensationOutcome::Revoked);
            return true;
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => format!("revoke timed out after {}ms", timeout.as_millis()),
    };

    error!(
        orphaned_serial = %serial,
        backend = %kind,
        error = %failure,
        "Compensating revoke failed; certificate is valid but unrecorded"
    );
    metrics.record_compensation(kind.as_str(), CompensationOutcome::Failed);
    metrics.record_orphaned(kind.as_str());
    false
}

/// Revokes an issued-but-unrecorded certificate if the issuing future is
/// dropped before [`CompensationGuard::disarm`] is called.
struct CompensationGuard {
    backend: Arc<dyn SigningBackend>,
    serial: Option<String>,
    timeout: StdDuration,
    metrics: CertificateMetrics,
}

impl CompensationGuard {
    fn arm(
        backend: Arc<dyn SigningBackend>,
        serial: String,
        timeout: StdDuration,
        metrics: CertificateMetrics,
    ) -> Self {
        Self { backend, serial: Some(serial), timeout, metrics }
    }

    fn disarm(&mut self) {
        self.serial = None;
    }
}

impl Drop for CompensationGuard {
    fn drop(&mut self) {
        let Some(serial) = self.serial.take() else {
            return;
        };

        warn!(serial = %serial, "Issue request cancelled before the certificate was recorded");
        match Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                let timeout = self.timeout;
                let metrics = self.metrics;
                handle.spawn(async move {
                    compensate(backend.as_ref(), &serial, timeout, metrics).await;
                });
            }
            Err(_) => {
                error!(
                    orphaned_serial = %serial,
                    backend = %self.backend.kind(),
                    "No runtime available for compensating revoke"
                );
                self.metrics.record_orphaned(self.backend.kind().as_str());
            }
        }
    }
}
