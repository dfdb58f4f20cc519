//! # Signing backends
//!
//! The [`SigningBackend`] capability and its implementations:
//!
//! - [`LocalCaBackend`]: signs in-process with a CA loaded from disk
//! - [`VaultPkiBackend`]: delegates to a Vault PKI secrets engine
//! - [`MockSigningBackend`]: in-memory stand-in for tests

pub mod backend;
pub mod factory;
pub mod keys;
pub mod local_ca;
pub mod mock;
pub mod vault_pki;

pub use backend::SigningBackend;
pub use factory::build_signing_backend;
pub use local_ca::{CaMaterial, LocalCaBackend};
pub use mock::MockSigningBackend;
pub use vault_pki::VaultPkiBackend;
