//! # thingcerts
//!
//! Lifecycle engine for the client certificates that IoT things present for
//! mutual-TLS authentication: issuance through a pluggable signing backend,
//! persistence, ownership-scoped listing and revocation.
//!
//! ## Architecture
//!
//! ```text
//! REST API → CertificateService → SigningBackend (local CA | Vault PKI)
//!                 ↓        ↓
//!     Token verifier    Certificate store (SQLite)
//!     Thing directory
//! ```
//!
//! Exactly one signing backend is active per deployment. A certificate the
//! backend issued but the store failed to record is revoked again as a
//! compensating action.

pub mod api;
pub mod clients;
pub mod config;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod pki;
pub mod services;
pub mod storage;

pub use config::AppConfig;
pub use errors::{CertsError, ErrorKind, Result};
pub use services::{CertificateService, RequestContext};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
