//! # HTTP API
//!
//! Thin axum surface over [`crate::services::CertificateService`].

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;

pub use error::ApiError;
pub use routes::{build_router, ApiState};
pub use server::start_api_server;
