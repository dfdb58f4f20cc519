//! # Configuration Settings
//!
//! Defines the configuration structure for the certificate service. Every value
//! comes from the environment; a value that is present but unparsable is a
//! configuration error rather than a silent fallback to the default.

use crate::domain::{parse_validity, BackendKind, SecretString, RSA_BITS_CEILING, RSA_BITS_FLOOR};
use crate::errors::{CertsError, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub database: DatabaseConfig,

    pub signing: SigningConfig,

    pub auth: AuthConfig,

    #[validate(nested)]
    pub things: ThingsConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup (used by tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };

        let config = Self {
            server: ServerConfig {
                host: env.string("CERTS_HTTP_HOST", "0.0.0.0"),
                port: env.parse("CERTS_HTTP_PORT", 8204)?,
                request_timeout_seconds: env.parse("CERTS_REQUEST_TIMEOUT_SECONDS", 5)?,
                compensation_timeout_seconds: env.parse("CERTS_COMPENSATION_TIMEOUT_SECONDS", 10)?,
            },
            database: DatabaseConfig {
                url: env.string("DATABASE_URL", "sqlite://./data/certs.db"),
                max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: env.parse("DATABASE_MIN_CONNECTIONS", 0)?,
                connect_timeout_seconds: env.parse("DATABASE_CONNECT_TIMEOUT_SECONDS", 10)?,
                idle_timeout_seconds: env.parse("DATABASE_IDLE_TIMEOUT_SECONDS", 600)?,
                auto_migrate: env.flag("DATABASE_AUTO_MIGRATE", true),
            },
            signing: SigningConfig::from_reader(&env)?,
            auth: AuthConfig {
                jwt_secret: SecretString::new(env.required("CERTS_JWT_SECRET")?),
                issuer: env.optional("CERTS_JWT_ISSUER"),
                audience: env.optional("CERTS_JWT_AUDIENCE"),
            },
            things: ThingsConfig {
                url: env.string("CERTS_THINGS_URL", "http://localhost:8182"),
                service_token: env.optional("CERTS_THINGS_TOKEN").map(SecretString::new),
                timeout_seconds: env.parse("CERTS_THINGS_TIMEOUT_SECONDS", 5)?,
            },
            observability: ObservabilityConfig {
                log_level: env.string("CERTS_LOG_LEVEL", "info"),
                json_logging: env.flag("CERTS_LOG_JSON", false),
                metrics_port: env.parse("CERTS_METRICS_PORT", 0)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| CertsError::config(CertsError::from(e).to_string()))?;

        self.validate_custom()
    }

    /// Checks that span fields or need more than the derive can express
    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(CertsError::config("Database URL must start with 'sqlite:'"));
        }

        if self.auth.jwt_secret.expose_secret().len() < 32 {
            return Err(CertsError::config("JWT secret must be at least 32 characters long"));
        }

        if self.observability.metrics_port != 0 && self.observability.metrics_port == self.server.port
        {
            return Err(CertsError::config("Metrics and HTTP ports cannot be the same"));
        }

        self.things.base_url()?;
        self.signing.validate()
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.optional(key).ok_or_else(|| CertsError::config(format!("{} must be set", key)))
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.optional(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|e| CertsError::config(format!("Invalid {} '{}': {}", key, raw, e))),
            None => Ok(default),
        }
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.optional(key).map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(default)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    #[validate(range(min = 1, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Default per-request deadline
    #[validate(range(min = 1, max = 300, message = "Timeout must be between 1 and 300 seconds"))]
    pub request_timeout_seconds: u64,

    /// Budget for the compensating revoke after a failed save
    #[validate(range(
        min = 1,
        max = 300,
        message = "Compensation timeout must be between 1 and 300 seconds"
    ))]
    pub compensation_timeout_seconds: u64,
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn compensation_timeout(&self) -> Duration {
        Duration::from_secs(self.compensation_timeout_seconds)
    }
}

/// Database configuration
#[derive(Debug, Clone, Validate)]
pub struct DatabaseConfig {
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    #[validate(range(max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/certs.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    pub fn is_memory(&self) -> bool {
        self.url.contains(":memory:")
    }
}

/// Signing backend selection plus issuance defaults
#[derive(Debug, Clone)]
pub struct SigningConfig {
    pub backend: SigningBackendConfig,
    /// Validity used when a request does not specify one
    pub default_validity: chrono::Duration,
    /// Smallest RSA modulus accepted; also the size of the default key
    pub min_rsa_bits: u32,
}

#[derive(Debug, Clone)]
pub enum SigningBackendConfig {
    LocalCa(LocalCaConfig),
    VaultPki(VaultPkiConfig),
}

impl SigningBackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            SigningBackendConfig::LocalCa(_) => BackendKind::LocalCa,
            SigningBackendConfig::VaultPki(_) => BackendKind::VaultPki,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocalCaConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Vault PKI secrets engine connection. The token is redacted in Debug output.
#[derive(Debug, Clone)]
pub struct VaultPkiConfig {
    pub host: String,
    pub token: SecretString,
    pub mount_path: String,
    pub role: String,
    pub namespace: Option<String>,
}

impl SigningConfig {
    fn from_reader<F: Fn(&str) -> Option<String>>(env: &EnvReader<'_, F>) -> Result<Self> {
        let kind: BackendKind = env
            .string("CERTS_SIGNING_BACKEND", "local_ca")
            .parse()
            .map_err(|e: CertsError| CertsError::config(e.to_string()))?;

        let backend = match kind {
            BackendKind::LocalCa => SigningBackendConfig::LocalCa(LocalCaConfig {
                cert_path: PathBuf::from(env.string("CERTS_SIGN_CA_PATH", "ca.crt")),
                key_path: PathBuf::from(env.string("CERTS_SIGN_CA_KEY_PATH", "ca.key")),
            }),
            BackendKind::VaultPki => SigningBackendConfig::VaultPki(VaultPkiConfig {
                host: env.required("CERTS_VAULT_HOST")?,
                token: SecretString::new(env.required("CERTS_VAULT_TOKEN")?),
                mount_path: env.string("CERTS_VAULT_PKI_PATH", "pki_int"),
                role: env.string("CERTS_VAULT_ROLE", "things"),
                namespace: env.optional("CERTS_VAULT_NAMESPACE"),
            }),
            BackendKind::Mock => {
                return Err(CertsError::config(
                    "CERTS_SIGNING_BACKEND=mock is only available to tests",
                ))
            }
        };

        let raw_validity = env.string("CERTS_SIGN_HOURS_VALID", "2048h");
        let default_validity = parse_validity(&raw_validity).map_err(|_| {
            CertsError::config(format!("Invalid CERTS_SIGN_HOURS_VALID '{}'", raw_validity))
        })?;

        Ok(Self { backend, default_validity, min_rsa_bits: env.parse("CERTS_SIGN_RSA_BITS", 2048)? })
    }

    pub fn validate(&self) -> Result<()> {
        if !(RSA_BITS_FLOOR..=RSA_BITS_CEILING).contains(&self.min_rsa_bits) {
            return Err(CertsError::config(format!(
                "CERTS_SIGN_RSA_BITS must be between {} and {}",
                RSA_BITS_FLOOR, RSA_BITS_CEILING
            )));
        }

        if let SigningBackendConfig::VaultPki(vault) = &self.backend {
            Url::parse(&vault.host).map_err(|e| {
                CertsError::config_with_source(
                    format!("Invalid CERTS_VAULT_HOST '{}'", vault.host),
                    Box::new(e),
                )
            })?;
            if vault.mount_path.trim_matches('/').is_empty() || vault.role.is_empty() {
                return Err(CertsError::config("Vault PKI mount path and role cannot be empty"));
            }
        }
        Ok(())
    }
}

/// Bearer token verification settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

/// Thing directory client settings
#[derive(Debug, Clone, Validate)]
pub struct ThingsConfig {
    #[validate(length(min = 1, message = "Things URL cannot be empty"))]
    pub url: String,

    pub service_token: Option<SecretString>,

    #[validate(range(min = 1, max = 60, message = "Things timeout must be between 1 and 60 seconds"))]
    pub timeout_seconds: u64,
}

impl ThingsConfig {
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| {
            CertsError::config_with_source(format!("Invalid CERTS_THINGS_URL '{}'", self.url), Box::new(e))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, Validate)]
pub struct ObservabilityConfig {
    /// Log level or EnvFilter directive
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    pub json_logging: bool,

    /// Prometheus exporter port (0 = disabled)
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false, metrics_port: 0 }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }
}
