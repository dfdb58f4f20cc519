//! # Error Handling
//!
//! Error types shared by every layer of the certificate engine.

pub mod types;

pub use types::{AuthErrorType, CertsError, ErrorKind, Result};
