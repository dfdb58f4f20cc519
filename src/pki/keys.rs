//! Key generation and CA key import.
//!
//! rcgen's ring backend signs with RSA keys but cannot generate or read PKCS#1
//! ones, so RSA material goes through the `rsa` crate and is handed to rcgen as
//! PKCS#8.

use rcgen::{KeyPair, PKCS_ECDSA_P256_SHA256, PKCS_ECDSA_P384_SHA384, PKCS_ED25519};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls::pki_types::{pem::PemObject, PrivateKeyDer};

use crate::domain::KeySpec;
use crate::errors::{CertsError, Result};

const BACKEND: &str = "local_ca";

/// Generate a fresh key pair for a client certificate.
///
/// RSA generation is CPU-heavy; call this from a blocking context.
pub fn generate_key_pair(spec: &KeySpec) -> Result<KeyPair> {
    let generated = match spec {
        KeySpec::Rsa { bits } => return generate_rsa(*bits),
        KeySpec::EcdsaP256 => KeyPair::generate_for(&PKCS_ECDSA_P256_SHA256),
        KeySpec::EcdsaP384 => KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384),
        KeySpec::Ed25519 => KeyPair::generate_for(&PKCS_ED25519),
    };
    generated.map_err(|e| {
        CertsError::backend_permanent(BACKEND, format!("failed to generate {} key: {}", spec, e))
    })
}

fn generate_rsa(bits: u32) -> Result<KeyPair> {
    let mut rng = rand::rngs::OsRng;
    let key = RsaPrivateKey::new(&mut rng, bits as usize).map_err(|e| {
        CertsError::backend_permanent(BACKEND, format!("failed to generate rsa-{} key: {}", bits, e))
    })?;
    rsa_key_pair(&key).map_err(|message| CertsError::backend_permanent(BACKEND, message))
}

fn rsa_key_pair(key: &RsaPrivateKey) -> std::result::Result<KeyPair, String> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| format!("failed to encode RSA key as PKCS#8: {}", e))?;
    KeyPair::from_pem(pem.as_str()).map_err(|e| format!("RSA key rejected by signer: {}", e))
}

/// Parse the CA private key. PKCS#8 (RSA, ECDSA, Ed25519) and PKCS#1 RSA are
/// accepted; anything else is an unsupported-key configuration error.
pub fn load_ca_key(pem: &str) -> Result<KeyPair> {
    let der = PrivateKeyDer::from_pem_slice(pem.as_bytes()).map_err(|e| {
        CertsError::config_with_source("CA private key could not be decoded", Box::new(e))
    })?;

    match der {
        PrivateKeyDer::Pkcs8(_) => KeyPair::from_pem(pem).map_err(|e| {
            CertsError::config(format!("CA private key has an unsupported type: {}", e))
        }),
        PrivateKeyDer::Pkcs1(pkcs1) => {
            let key = RsaPrivateKey::from_pkcs1_der(pkcs1.secret_pkcs1_der()).map_err(|e| {
                CertsError::config(format!("CA RSA private key could not be decoded: {}", e))
            })?;
            rsa_key_pair(&key).map_err(CertsError::config)
        }
        PrivateKeyDer::Sec1(_) => Err(CertsError::config(
            "CA private key has an unsupported type: SEC1 EC keys must be converted to PKCS#8",
        )),
        _ => Err(CertsError::config("CA private key has an unsupported type")),
    }
}
