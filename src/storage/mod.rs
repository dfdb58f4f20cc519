//! # Storage and Persistence
//!
//! SQLite connectivity and the certificate repository.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool};
pub use repositories::{CertificateRepository, SqlxCertificateRepository};
