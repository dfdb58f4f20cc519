//! Domain types for the certificate lifecycle.

pub mod certificate;
pub mod id;
pub mod secret;

pub use certificate::{
    format_serial, normalize_serial, parse_validity, BackendKind, CertificatePage,
    CertificateRecord, IssuedCertificate, KeySpec, PageRequest, RevocationOutcome,
    RevocationSummary, SigningRequest, ThingIdentity, RSA_BITS_CEILING, RSA_BITS_FLOOR,
};
pub use id::{OwnerId, ThingId};
pub use secret::SecretString;
