//! Certificate lifecycle types: signing requests, issued credentials and the
//! persisted [`CertificateRecord`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::id::{OwnerId, ThingId};
use super::secret::SecretString;
use crate::errors::{CertsError, Result};

/// RSA keys below this size are never issued, whatever the configuration says.
pub const RSA_BITS_FLOOR: u32 = 2048;
/// Upper bound on requested RSA sizes; generation time grows steeply beyond it.
pub const RSA_BITS_CEILING: u32 = 8192;

/// Which signing backend produced a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    LocalCa,
    VaultPki,
    Mock,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::LocalCa => "local_ca",
            BackendKind::VaultPki => "vault_pki",
            BackendKind::Mock => "mock",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = CertsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local_ca" | "local" => Ok(BackendKind::LocalCa),
            "vault_pki" | "vault" => Ok(BackendKind::VaultPki),
            "mock" => Ok(BackendKind::Mock),
            other => Err(CertsError::validation(format!("unknown signing backend '{}'", other))),
        }
    }
}

/// Key algorithm and size for a generated client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Rsa { bits: u32 },
    EcdsaP256,
    EcdsaP384,
    Ed25519,
}

impl KeySpec {
    /// Build a key spec from the `key_type`/`key_bits` pair accepted by the API.
    pub fn from_parts(key_type: &str, bits: Option<u32>) -> Result<Self> {
        match key_type.trim().to_ascii_lowercase().as_str() {
            "rsa" => Ok(KeySpec::Rsa { bits: bits.unwrap_or(RSA_BITS_FLOOR) }),
            "ecdsa" | "ec" => match bits {
                None | Some(256) => Ok(KeySpec::EcdsaP256),
                Some(384) => Ok(KeySpec::EcdsaP384),
                Some(other) => Err(CertsError::validation_field(
                    format!("unsupported ECDSA curve size {}", other),
                    "key_bits",
                )),
            },
            "ed25519" => match bits {
                None | Some(256) => Ok(KeySpec::Ed25519),
                Some(other) => Err(CertsError::validation_field(
                    format!("ed25519 keys have a fixed size, got {} bits", other),
                    "key_bits",
                )),
            },
            other => Err(CertsError::validation_field(
                format!("unsupported key type '{}'", other),
                "key_type",
            )),
        }
    }

    /// Reject keys weaker than the deployment floor.
    ///
    /// EC and Ed25519 keys are at least as strong as RSA-2048 and always pass.
    pub fn validate_strength(&self, min_rsa_bits: u32) -> Result<()> {
        let floor = min_rsa_bits.max(RSA_BITS_FLOOR);
        if let KeySpec::Rsa { bits } = self {
            if *bits < floor {
                return Err(CertsError::validation_field(
                    format!("RSA key size {} is below the minimum of {}", bits, floor),
                    "key_bits",
                ));
            }
            if *bits > RSA_BITS_CEILING {
                return Err(CertsError::validation_field(
                    format!("RSA key size {} exceeds the maximum of {}", bits, RSA_BITS_CEILING),
                    "key_bits",
                ));
            }
        }
        Ok(())
    }

    pub fn label(&self) -> String {
        match self {
            KeySpec::Rsa { bits } => format!("rsa-{}", bits),
            KeySpec::EcdsaP256 => "ecdsa-p256".to_string(),
            KeySpec::EcdsaP384 => "ecdsa-p384".to_string(),
            KeySpec::Ed25519 => "ed25519".to_string(),
        }
    }
}

impl fmt::Display for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Parse a validity string such as `24h`, `90m`, `3600s`, `30d` or `1h30m`.
pub fn parse_validity(input: &str) -> Result<Duration> {
    let invalid = || {
        CertsError::validation_field(format!("invalid validity duration '{}'", input), "ttl")
    };

    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(invalid());
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for ch in trimmed.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        let multiplier: i64 = match ch {
            's' => 1,
            'm' => 60,
            'h' => 3_600,
            'd' => 86_400,
            _ => return Err(invalid()),
        };
        if digits.is_empty() {
            return Err(invalid());
        }
        let value: i64 = digits.parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(multiplier)
            .and_then(|seconds| total.checked_add(seconds))
            .ok_or_else(invalid)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(invalid());
    }
    if total <= 0 {
        return Err(CertsError::validation_field("validity must be positive", "ttl"));
    }
    Duration::try_seconds(total).ok_or_else(invalid)
}

/// Render serial bytes as lowercase colon-separated hex (`3a:9f:...`).
pub fn format_serial(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join(":")
}

/// Canonical form of a serial supplied by a caller or a remote backend.
///
/// Accepts colon- or dash-separated hex (`3A-9F-00`) and the bare hex that
/// `openssl x509 -serial` prints (`3A9F00`).
pub fn normalize_serial(serial: &str) -> String {
    let serial = serial.trim().to_ascii_lowercase().replace('-', ":");
    if serial.contains(':') || serial.len() <= 2 || !serial.bytes().all(|b| b.is_ascii_hexdigit()) {
        return serial;
    }

    let padded = if serial.len() % 2 == 1 { format!("0{}", serial) } else { serial };
    padded
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// A device as resolved by the thing directory, valid for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThingIdentity {
    pub thing_id: ThingId,
    pub owner_id: OwnerId,
    /// The credential the device presents; used as the certificate common name.
    pub external_key: String,
}

#[derive(Debug, Clone)]
pub struct SigningRequest {
    pub thing_id: ThingId,
    pub common_name: String,
    pub validity: Duration,
    pub key_spec: KeySpec,
}

/// What a signing backend hands back after a successful issuance.
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub certificate_pem: String,
    pub private_key_pem: Option<SecretString>,
    pub ca_chain_pem: Option<String>,
    pub serial: String,
    pub key_type: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

/// Persisted certificate. Only `revoked` and `revoked_at` ever change after insert.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRecord {
    pub serial: String,
    pub thing_id: ThingId,
    pub owner_id: OwnerId,
    pub certificate_pem: String,
    pub private_key_pem: Option<SecretString>,
    pub ca_chain_pem: Option<String>,
    pub key_type: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub backend: BackendKind,
    pub created_at: DateTime<Utc>,
}

impl CertificateRecord {
    /// Build the record for a freshly issued certificate.
    ///
    /// `created_at` is clamped into the validity window so that minor clock skew
    /// between this process and a remote authority cannot break
    /// `not_before <= created_at <= not_after`.
    pub fn from_issued(
        issued: IssuedCertificate,
        thing: &ThingIdentity,
        backend: BackendKind,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if issued.not_after <= issued.not_before {
            return Err(CertsError::validation(format!(
                "certificate {} has an empty validity window",
                issued.serial
            )));
        }
        if issued.serial.is_empty() {
            return Err(CertsError::validation("issued certificate has no serial number"));
        }

        Ok(Self {
            serial: issued.serial,
            thing_id: thing.thing_id.clone(),
            owner_id: thing.owner_id.clone(),
            certificate_pem: issued.certificate_pem,
            private_key_pem: issued.private_key_pem,
            ca_chain_pem: issued.ca_chain_pem,
            key_type: issued.key_type,
            not_before: issued.not_before,
            not_after: issued.not_after,
            revoked: false,
            revoked_at: None,
            backend,
            created_at: now.clamp(issued.not_before, issued.not_after),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationOutcome {
    Revoked,
    AlreadyRevoked,
}

impl RevocationOutcome {
    pub fn is_already_revoked(&self) -> bool {
        matches!(self, RevocationOutcome::AlreadyRevoked)
    }
}

/// Offset/limit window for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(offset: u32, limit: u32) -> Result<Self> {
        if limit == 0 || limit > Self::MAX_LIMIT {
            return Err(CertsError::validation_field(
                format!("limit must be between 1 and {}", Self::MAX_LIMIT),
                "limit",
            ));
        }
        Ok(Self { offset, limit })
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self { offset: 0, limit: Self::DEFAULT_LIMIT }
    }
}

#[derive(Debug, Clone)]
pub struct CertificatePage {
    pub total: u64,
    pub offset: u32,
    pub limit: u32,
    pub certificates: Vec<CertificateRecord>,
}

/// Result of revoking every certificate of one thing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationSummary {
    pub revoked: Vec<String>,
    pub already_revoked: Vec<String>,
}
