//! Local certificate authority backend.
//!
//! Loads a CA certificate and key from disk once at startup and signs client
//! certificates in-process with rcgen. The CA material is immutable after load
//! and shared by every request.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use rand::RngCore;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SerialNumber,
};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use x509_parser::pem::parse_x509_pem;

use super::backend::SigningBackend;
use super::keys::{generate_key_pair, load_ca_key};
use crate::config::LocalCaConfig;
use crate::domain::{
    format_serial, BackendKind, IssuedCertificate, KeySpec, RevocationOutcome, SecretString,
    SigningRequest,
};
use crate::errors::{CertsError, Result};

const BACKEND: &str = "local_ca";
const SERIAL_BYTES: usize = 16;

/// CA certificate and key, validated against each other.
pub struct CaMaterial {
    issuer: rcgen::Certificate,
    key: KeyPair,
    certificate_pem: String,
    subject: String,
    not_after: DateTime<Utc>,
}

impl fmt::Debug for CaMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaMaterial")
            .field("subject", &self.subject)
            .field("not_after", &self.not_after)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl CaMaterial {
    /// Read and validate the CA files.
    ///
    /// # Errors
    ///
    /// `Config` when either file is missing, the certificate is not a usable CA,
    /// the key cannot be decoded or has an unsupported type, or the key does not
    /// belong to the certificate.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let certificate_pem = read_pem_file(cert_path, "CA certificate")?;
        let key_pem = SecretString::new(read_pem_file(key_path, "CA private key")?);
        Self::from_pem(&certificate_pem, key_pem.expose_secret())
    }

    pub fn from_pem(certificate_pem: &str, key_pem: &str) -> Result<Self> {
        let (_, pem) = parse_x509_pem(certificate_pem.as_bytes()).map_err(|e| {
            CertsError::config(format!("CA certificate could not be decoded: {}", e))
        })?;
        let x509 = pem.parse_x509().map_err(|e| {
            CertsError::config(format!("CA certificate could not be parsed: {}", e))
        })?;

        let is_ca = x509
            .basic_constraints()
            .map_err(|e| CertsError::config(format!("CA basic constraints unreadable: {}", e)))?
            .map(|ext| ext.value.ca)
            .unwrap_or(false);
        if !is_ca {
            return Err(CertsError::config("CA certificate is not marked as a CA"));
        }

        let not_after = DateTime::from_timestamp(x509.validity().not_after.timestamp(), 0)
            .ok_or_else(|| CertsError::config("CA certificate has an invalid expiry"))?;
        if not_after <= Utc::now() {
            return Err(CertsError::config(format!("CA certificate expired at {}", not_after)));
        }

        let key = load_ca_key(key_pem)?;
        if key.public_key_raw() != x509.public_key().subject_public_key.data.as_ref() {
            return Err(CertsError::config("CA private key does not match the CA certificate"));
        }

        let subject = x509.subject().to_string();
        let issuer = CertificateParams::from_ca_cert_pem(certificate_pem)
            .and_then(|params| params.self_signed(&key))
            .map_err(|e| CertsError::config(format!("CA certificate cannot be used for signing: {}", e)))?;

        Ok(Self { issuer, key, certificate_pem: certificate_pem.to_string(), subject, not_after })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    fn sign(&self, request: &SigningRequest, now: DateTime<Utc>) -> Result<IssuedCertificate> {
        let not_before = now.trunc_subsecs(0);
        let not_after = not_before + request.validity;
        if not_after > self.not_after {
            return Err(CertsError::validation_field(
                format!("requested validity ends after the CA expires ({})", self.not_after),
                "ttl",
            ));
        }

        let leaf_key = generate_key_pair(&request.key_spec)?;
        let (serial_bytes, serial) = random_serial();

        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(DnType::CommonName, request.common_name.clone());
        distinguished_name
            .push(DnType::OrganizationalUnitName, request.thing_id.as_str().to_string());

        let mut params = CertificateParams::default();
        params.distinguished_name = distinguished_name;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = match request.key_spec {
            KeySpec::Rsa { .. } => {
                vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment]
            }
            _ => vec![KeyUsagePurpose::DigitalSignature],
        };
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        params.serial_number = Some(SerialNumber::from_slice(&serial_bytes));
        params.not_before = to_offset(not_before)?;
        params.not_after = to_offset(not_after)?;
        params.use_authority_key_identifier_extension = true;

        let certificate = params.signed_by(&leaf_key, &self.issuer, &self.key).map_err(|e| {
            CertsError::backend_permanent(BACKEND, format!("failed to sign certificate: {}", e))
        })?;

        Ok(IssuedCertificate {
            certificate_pem: certificate.pem(),
            private_key_pem: Some(SecretString::new(leaf_key.serialize_pem())),
            ca_chain_pem: Some(self.certificate_pem.clone()),
            serial,
            key_type: request.key_spec.label(),
            not_before,
            not_after,
        })
    }
}

fn read_pem_file(path: &Path, what: &str) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        CertsError::config_with_source(format!("{} not readable at {}", what, path.display()), Box::new(e))
    })
}

/// 128 random bits, high bit cleared so the DER integer stays positive and the
/// first byte non-zero so the encoding keeps all 16 bytes.
fn random_serial() -> ([u8; SERIAL_BYTES], String) {
    let mut bytes = [0u8; SERIAL_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] & 0x7f).max(1);
    let rendered = format_serial(&bytes);
    (bytes, rendered)
}

fn to_offset(instant: DateTime<Utc>) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(instant.timestamp())
        .map_err(|e| CertsError::validation(format!("validity bound out of range: {}", e)))
}

/// Signs client certificates with a CA loaded from disk.
#[derive(Debug, Clone)]
pub struct LocalCaBackend {
    ca: Arc<CaMaterial>,
}

impl LocalCaBackend {
    pub fn new(ca: CaMaterial) -> Self {
        Self { ca: Arc::new(ca) }
    }

    pub fn from_config(config: &LocalCaConfig) -> Result<Self> {
        let ca = CaMaterial::load(&config.cert_path, &config.key_path)?;
        info!(
            ca_subject = %ca.subject(),
            ca_not_after = %ca.not_after(),
            cert_path = %config.cert_path.display(),
            "Local CA signing backend initialized"
        );
        Ok(Self::new(ca))
    }

    pub fn ca(&self) -> &CaMaterial {
        &self.ca
    }
}

#[async_trait]
impl SigningBackend for LocalCaBackend {
    #[instrument(skip(self, request), fields(thing_id = %request.thing_id, key_spec = %request.key_spec), name = "local_ca_issue")]
    async fn issue(&self, request: &SigningRequest) -> Result<IssuedCertificate> {
        let ca = Arc::clone(&self.ca);
        let request = request.clone();

        let issued = tokio::task::spawn_blocking(move || ca.sign(&request, Utc::now()))
            .await
            .map_err(|e| {
                CertsError::backend_permanent(BACKEND, format!("signing task failed: {}", e))
            })??;

        debug!(serial = %issued.serial, not_after = %issued.not_after, "Signed client certificate");
        Ok(issued)
    }

    async fn revoke(&self, serial: &str) -> Result<RevocationOutcome> {
        // Revocation state lives in the certificate store only.
        debug!(serial = %serial, "Local CA revocation has no remote effect");
        Ok(RevocationOutcome::Revoked)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::LocalCa
    }

    async fn health_check(&self) -> Result<()> {
        if self.ca.not_after() <= Utc::now() {
            return Err(CertsError::backend_permanent(BACKEND, "CA certificate has expired"));
        }
        Ok(())
    }
}
