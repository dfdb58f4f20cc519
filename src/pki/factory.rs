//! Startup selection of the single active signing backend.

use std::sync::Arc;

use tracing::{info, warn};

use super::backend::SigningBackend;
use super::local_ca::LocalCaBackend;
use super::vault_pki::VaultPkiBackend;
use crate::config::{SigningBackendConfig, SigningConfig};
use crate::errors::Result;

/// Build the backend named by the configuration.
///
/// Local CA problems (missing files, bad PEM, mismatched or unsupported key) are
/// fatal `Config` errors. An unreachable Vault is only logged: the first request
/// will surface it as a transient backend error.
pub async fn build_signing_backend(config: &SigningConfig) -> Result<Arc<dyn SigningBackend>> {
    let backend: Arc<dyn SigningBackend> = match &config.backend {
        SigningBackendConfig::LocalCa(local) => Arc::new(LocalCaBackend::from_config(local)?),
        SigningBackendConfig::VaultPki(vault) => {
            let backend = VaultPkiBackend::new(vault)?;
            if let Err(e) = backend.health_check().await {
                warn!(error = %e, vault_addr = %vault.host, "Vault not reachable at startup");
            }
            Arc::new(backend)
        }
    };

    info!(backend = %backend.kind(), "Signing backend selected");
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalCaConfig;
    use crate::domain::BackendKind;
    use crate::errors::CertsError;

    #[tokio::test]
    async fn test_missing_ca_files_abort_startup() {
        let dir = tempfile::tempdir().unwrap();
        let config = SigningConfig {
            backend: SigningBackendConfig::LocalCa(LocalCaConfig {
                cert_path: dir.path().join("missing.crt"),
                key_path: dir.path().join("missing.key"),
            }),
            default_validity: chrono::Duration::hours(1),
            min_rsa_bits: 2048,
        };

        let err = build_signing_backend(&config).await.unwrap_err();
        assert!(matches!(err, CertsError::Config { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_vault_is_not_fatal() {
        let config = SigningConfig {
            backend: SigningBackendConfig::VaultPki(crate::config::VaultPkiConfig {
                host: "http://127.0.0.1:1".to_string(),
                token: "s.token".into(),
                mount_path: "pki_int".to_string(),
                role: "things".to_string(),
                namespace: None,
            }),
            default_validity: chrono::Duration::hours(1),
            min_rsa_bits: 2048,
        };

        let backend = build_signing_backend(&config).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::VaultPki);
    }
}
