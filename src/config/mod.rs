//! # Configuration Management
//!
//! A single immutable [`AppConfig`] is loaded from the environment at startup
//! (after `dotenvy` has pulled in any `.env` file) and handed to every component.

pub mod settings;

pub use settings::{
    AppConfig, AuthConfig, DatabaseConfig, LocalCaConfig, ObservabilityConfig, ServerConfig,
    SigningBackendConfig, SigningConfig, ThingsConfig, VaultPkiConfig,
};
