//! # Error Types
//!
//! Error type for the certificate lifecycle engine. Every failure coming out of a
//! collaborator (signing backend, repository, thing directory, token issuer) is
//! wrapped into exactly one [`CertsError`] variant. Callers branch on [`ErrorKind`];
//! the raw diagnostics stay in the message/source for logs.

use std::fmt;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, CertsError>;

/// Main error type for certificate operations
#[derive(thiserror::Error, Debug)]
pub enum CertsError {
    /// Startup configuration errors (missing or unreadable CA material, bad env values)
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Token rejected or caller not allowed to touch the resource
    #[error("Authorization error: {message}")]
    Authorization { message: String, error_type: AuthErrorType },

    /// Resource not found errors
    #[error("Resource not found: {resource_type} with ID '{id}'")]
    NotFound { resource_type: String, id: String },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// Signing backend unreachable or overloaded; the same request may be retried
    #[error("Signing backend '{backend}' unavailable: {message}")]
    BackendTransient { backend: String, message: String },

    /// Signing backend refused the request (policy, role, quota)
    #[error("Signing backend '{backend}' rejected the request: {message}")]
    BackendPermanent { backend: String, message: String },

    /// Certificate store failures
    #[error("Persistence error: {context}")]
    Persistence {
        context: String,
        #[source]
        source: Option<sqlx::Error>,
    },

    /// Resource conflict errors (duplicate serial)
    #[error("Resource conflict: {message}")]
    Conflict { message: String, resource_type: String },

    /// A credential was issued but could not be recorded
    #[error("Certificate {serial} was issued but not recorded: {reason}")]
    Consistency { serial: String, reason: String, compensated: bool },

    /// Timeout errors. `outcome_unknown` is set when the deadline expired after a
    /// non-idempotent request had already been sent, so the remote side may have
    /// acted on it.
    #[error("Operation timed out: {operation} after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64, outcome_unknown: bool },

    /// A non-signing dependency (thing directory) could not be reached
    #[error("Dependency '{service}' unavailable: {message}")]
    DependencyUnavailable { service: String, message: String },
}

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Config,
    Authorization,
    NotFound,
    Validation,
    BackendTransient,
    BackendPermanent,
    Persistence,
    Conflict,
    Consistency,
    Timeout,
    DependencyUnavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::BackendTransient => "backend_transient",
            ErrorKind::BackendPermanent => "backend_permanent",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Consistency => "consistency",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authorization error subtypes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorType {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    Forbidden,
}

impl fmt::Display for AuthErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthErrorType::InvalidToken => write!(f, "invalid_token"),
            AuthErrorType::ExpiredToken => write!(f, "expired_token"),
            AuthErrorType::MissingToken => write!(f, "missing_token"),
            AuthErrorType::Forbidden => write!(f, "forbidden"),
        }
    }
}

impl CertsError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into(), source: None }
    }

    /// Create a configuration error with source
    pub fn config_with_source<S: Into<String>>(
        message: S,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        Self::Config { message: message.into(), source: Some(source) }
    }

    pub fn authorization<S: Into<String>>(message: S, error_type: AuthErrorType) -> Self {
        Self::Authorization { message: message.into(), error_type }
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::authorization(message, AuthErrorType::Forbidden)
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    pub fn backend_transient<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        Self::BackendTransient { backend: backend.into(), message: message.into() }
    }

    pub fn backend_permanent<B: Into<String>, S: Into<String>>(backend: B, message: S) -> Self {
        Self::BackendPermanent { backend: backend.into(), message: message.into() }
    }

    /// Create a persistence error wrapping a database failure
    pub fn persistence<S: Into<String>>(context: S, source: sqlx::Error) -> Self {
        Self::Persistence { context: context.into(), source: Some(source) }
    }

    /// Persistence error without an underlying driver error (row decoding, etc.)
    pub fn persistence_message<S: Into<String>>(context: S) -> Self {
        Self::Persistence { context: context.into(), source: None }
    }

    /// Create a conflict error
    pub fn conflict<M: Into<String>, R: Into<String>>(message: M, resource_type: R) -> Self {
        Self::Conflict { message: message.into(), resource_type: resource_type.into() }
    }

    pub fn consistency<S: Into<String>, R: Into<String>>(
        serial: S,
        reason: R,
        compensated: bool,
    ) -> Self {
        Self::Consistency { serial: serial.into(), reason: reason.into(), compensated }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_ms: u64) -> Self {
        Self::Timeout { operation: operation.into(), duration_ms, outcome_unknown: false }
    }

    /// Mark a timeout as having an unknown remote outcome. Other errors pass through.
    pub fn with_unknown_outcome(self) -> Self {
        match self {
            Self::Timeout { operation, duration_ms, .. } => {
                Self::Timeout { operation, duration_ms, outcome_unknown: true }
            }
            other => other,
        }
    }

    pub fn dependency_unavailable<D: Into<String>, S: Into<String>>(service: D, message: S) -> Self {
        Self::DependencyUnavailable { service: service.into(), message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CertsError::Config { .. } => ErrorKind::Config,
            CertsError::Authorization { .. } => ErrorKind::Authorization,
            CertsError::NotFound { .. } => ErrorKind::NotFound,
            CertsError::Validation { .. } => ErrorKind::Validation,
            CertsError::BackendTransient { .. } => ErrorKind::BackendTransient,
            CertsError::BackendPermanent { .. } => ErrorKind::BackendPermanent,
            CertsError::Persistence { .. } => ErrorKind::Persistence,
            CertsError::Conflict { .. } => ErrorKind::Conflict,
            CertsError::Consistency { .. } => ErrorKind::Consistency,
            CertsError::Timeout { .. } => ErrorKind::Timeout,
            CertsError::DependencyUnavailable { .. } => ErrorKind::DependencyUnavailable,
        }
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CertsError::Config { .. } => 500,
            CertsError::Authorization { error_type: AuthErrorType::Forbidden, .. } => 403,
            CertsError::Authorization { .. } => 401,
            CertsError::NotFound { .. } => 404,
            CertsError::Validation { .. } => 400,
            CertsError::BackendTransient { .. } => 502,
            CertsError::BackendPermanent { .. } => 500,
            CertsError::Persistence { .. } => 500,
            CertsError::Conflict { .. } => 409,
            CertsError::Consistency { .. } => 500,
            CertsError::Timeout { .. } => 504,
            CertsError::DependencyUnavailable { .. } => 503,
        }
    }

    /// Check if the same request may be retried.
    ///
    /// A timeout whose remote outcome is unknown is not: the authority may
    /// already hold a live credential for the first attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CertsError::BackendTransient { .. }
                | CertsError::Timeout { outcome_unknown: false, .. }
                | CertsError::DependencyUnavailable { .. }
                | CertsError::Persistence { .. }
        )
    }

    /// Message that is safe to hand to API clients.
    ///
    /// Backend, persistence, consistency and configuration failures collapse to a
    /// generic sentence; their details are only ever logged.
    pub fn public_message(&self) -> String {
        match self {
            CertsError::Config { .. } => "Service misconfigured".to_string(),
            CertsError::BackendTransient { .. } => {
                "Certificate authority temporarily unavailable".to_string()
            }
            CertsError::BackendPermanent { .. } => {
                "Certificate authority rejected the request".to_string()
            }
            CertsError::Persistence { .. } => "Certificate store failure".to_string(),
            CertsError::Consistency { compensated: true, .. } => {
                "Certificate could not be recorded and was revoked; please retry".to_string()
            }
            CertsError::Consistency { compensated: false, serial, .. } => format!(
                "Certificate {} was issued but could not be recorded or revoked; contact an operator before retrying",
                serial
            ),
            CertsError::Timeout { outcome_unknown: true, operation, .. } => format!(
                "Operation {} timed out after the certificate authority was contacted; the outcome is unknown",
                operation
            ),
            CertsError::DependencyUnavailable { service, .. } => {
                format!("Dependency '{}' unavailable", service)
            }
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for CertsError {
    fn from(error: sqlx::Error) -> Self {
        Self::persistence("Database operation failed", error)
    }
}

impl From<validator::ValidationErrors> for CertsError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .iter()
            .map(|(field, field_errors)| {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string()))
                    .collect();
                format!("{}: {}", field, error_messages.join(", "))
            })
            .collect::<Vec<_>>()
            .join("; ");

        Self::validation(format!("Validation failed: {}", message))
    }
}
