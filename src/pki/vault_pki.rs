//! Vault PKI signing backend.
//!
//! Delegates issuance and revocation to HashiCorp Vault's PKI secrets engine
//! (`POST /v1/{mount}/issue/{role}` and `POST /v1/{mount}/revoke`). Key type and
//! size are governed by the Vault role, so the request's key spec is not sent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};
use vaultrs::api::pki::requests::GenerateCertificateRequestBuilder;
use vaultrs::client::{VaultClient, VaultClientSettingsBuilder};
use vaultrs::error::ClientError;
use x509_parser::pem::parse_x509_pem;

use super::backend::SigningBackend;
use crate::config::VaultPkiConfig;
use crate::domain::{
    normalize_serial, BackendKind, IssuedCertificate, RevocationOutcome, SecretString,
    SigningRequest,
};
use crate::errors::{CertsError, Result};

const BACKEND: &str = "vault_pki";

pub struct VaultPkiBackend {
    client: VaultClient,
    mount_path: String,
    role: String,
}

impl std::fmt::Debug for VaultPkiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultPkiBackend")
            .field("pki_mount", &self.mount_path)
            .field("pki_role", &self.role)
            .finish()
    }
}

impl VaultPkiBackend {
    /// Build the client. No network traffic happens here.
    pub fn new(config: &VaultPkiConfig) -> Result<Self> {
        let mut settings_builder = VaultClientSettingsBuilder::default();
        settings_builder.address(&config.host).token(config.token.expose_secret());

        if let Some(namespace) = &config.namespace {
            settings_builder.namespace(Some(namespace.clone()));
        }

        let settings = settings_builder
            .build()
            .map_err(|e| CertsError::config(format!("Invalid Vault configuration: {}", e)))?;

        let client = VaultClient::new(settings)
            .map_err(|e| CertsError::config(format!("Failed to create Vault client: {}", e)))?;

        info!(
            vault_addr = %config.host,
            pki_mount = %config.mount_path,
            pki_role = %config.role,
            "Vault PKI signing backend initialized"
        );

        Ok(Self {
            client,
            mount_path: config.mount_path.trim_matches('/').to_string(),
            role: config.role.clone(),
        })
    }
}

/// Fragments of vaultrs/reqwest error text that mean "try again later".
const TRANSIENT_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection closed",
    "timed out",
    "timeout",
    "too many requests",
    "429",
    "500",
    "502",
    "503",
    "504",
];

fn is_retryable_vault_error(error: &str) -> bool {
    let error = error.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|marker| error.contains(marker))
}

fn is_already_revoked(errors: &[String]) -> bool {
    errors.iter().any(|e| e.to_lowercase().contains("already revoked"))
}

/// Map a Vault client error onto the transient/permanent split.
fn classify_vault_error(operation: &str, error: &ClientError) -> CertsError {
    match error {
        ClientError::APIError { code, errors } => {
            let detail = if errors.is_empty() { error.to_string() } else { errors.join("; ") };
            let message = format!("{} failed with status {}: {}", operation, code, detail);
            if *code == 429 || *code >= 500 {
                CertsError::backend_transient(BACKEND, message)
            } else {
                CertsError::backend_permanent(BACKEND, message)
            }
        }
        ClientError::RestClientError { .. } => {
            CertsError::backend_transient(BACKEND, format!("{} failed: {}", operation, error))
        }
        other => {
            let message = format!("{} failed: {}", operation, other);
            if is_retryable_vault_error(&message) {
                CertsError::backend_transient(BACKEND, message)
            } else {
                CertsError::backend_permanent(BACKEND, message)
            }
        }
    }
}

/// Validity window and key algorithm read back from an issued certificate.
struct CertificateFacts {
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    key_type: String,
}

fn inspect_certificate(certificate_pem: &str) -> Result<CertificateFacts> {
    let invalid = |detail: String| {
        CertsError::backend_permanent(BACKEND, format!("returned an unreadable certificate: {}", detail))
    };
    let (_, pem) = parse_x509_pem(certificate_pem.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let x509 = pem.parse_x509().map_err(|e| invalid(e.to_string()))?;
    let validity = x509.validity();

    let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| invalid("not_before out of range".to_string()))?;
    let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| invalid("not_after out of range".to_string()))?;

    let key_type = match x509.public_key().algorithm.algorithm.to_id_string().as_str() {
        "1.2.840.113549.1.1.1" => "rsa",
        "1.2.840.10045.2.1" => "ecdsa",
        "1.3.101.112" => "ed25519",
        _ => "unknown",
    }
    .to_string();

    Ok(CertificateFacts { not_before, not_after, key_type })
}

/// Vault backdates `not_before` and caps `ttl` at the role's `max_ttl` without
/// reporting either. Returns true when the issued window is shorter than asked.
fn report_window(requested: chrono::Duration, facts: &CertificateFacts) -> bool {
    let issued = facts.not_after - facts.not_before;
    if issued < requested {
        warn!(
            requested_seconds = requested.num_seconds(),
            issued_seconds = issued.num_seconds(),
            not_after = %facts.not_after,
            "Vault issued a shorter validity than requested; check the role's max_ttl"
        );
        true
    } else {
        if issued > requested {
            debug!(
                requested_seconds = requested.num_seconds(),
                issued_seconds = issued.num_seconds(),
                "Vault widened the validity window"
            );
        }
        false
    }
}

#[async_trait]
impl SigningBackend for VaultPkiBackend {
    #[instrument(skip(self, request), fields(thing_id = %request.thing_id, pki_role = %self.role), name = "vault_pki_issue")]
    async fn issue(&self, request: &SigningRequest) -> Result<IssuedCertificate> {
        use vaultrs::pki::cert;

        let ttl = format!("{}s", request.validity.num_seconds());
        let mut opts = GenerateCertificateRequestBuilder::default();
        opts.common_name(request.common_name.as_str()).ttl(&ttl);

        let response = cert::generate(&self.client, &self.mount_path, &self.role, Some(&mut opts))
            .await
            .map_err(|e| {
                let classified = classify_vault_error("certificate issuance", &e);
                error!(error = %e, retryable = classified.is_retryable(), "Vault PKI issuance failed");
                classified
            })?;

        let facts = inspect_certificate(&response.certificate)?;
        report_window(request.validity, &facts);

        let ca_chain_pem = match response.ca_chain {
            Some(chain) if !chain.is_empty() => Some(chain.join("\n")),
            _ if !response.issuing_ca.is_empty() => Some(response.issuing_ca.clone()),
            _ => None,
        };
        let private_key_pem = if response.private_key.is_empty() {
            None
        } else {
            Some(SecretString::new(response.private_key))
        };
        let serial = normalize_serial(&response.serial_number);
        debug!(serial = %serial, not_after = %facts.not_after, "Vault PKI issued certificate");

        Ok(IssuedCertificate {
            certificate_pem: response.certificate,
            private_key_pem,
            ca_chain_pem,
            serial,
            key_type: facts.key_type,
            not_before: facts.not_before,
            not_after: facts.not_after,
        })
    }

    #[instrument(skip(self), name = "vault_pki_revoke")]
    async fn revoke(&self, serial: &str) -> Result<RevocationOutcome> {
        use vaultrs::pki::cert;

        match cert::revoke(&self.client, &self.mount_path, serial).await {
            Ok(_) => Ok(RevocationOutcome::Revoked),
            Err(ClientError::APIError { errors, .. }) if is_already_revoked(&errors) => {
                warn!(serial = %serial, "Vault reports certificate already revoked");
                Ok(RevocationOutcome::AlreadyRevoked)
            }
            Err(e) => {
                let classified = classify_vault_error("certificate revocation", &e);
                error!(error = %e, serial = %serial, "Vault PKI revocation failed");
                Err(classified)
            }
        }
    }

    fn kind(&self) -> BackendKind {
        BackendKind::VaultPki
    }

    async fn health_check(&self) -> Result<()> {
        match vaultrs::sys::health(&self.client).await {
            Ok(_) => {
                debug!("Vault reachable");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Vault health check failed");
                Err(classify_vault_error("health check", &e))
            }
        }
    }
}
