//! Identifier newtypes.
//!
//! Thing and owner identifiers are assigned by external systems (the thing
//! directory and the token issuer), so these wrappers carry opaque strings
//! rather than generating UUIDs. The only rule enforced is "not blank".

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{CertsError, Result};

/// Macro to generate NewType ID wrappers with all required traits
macro_rules! domain_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Parse an externally supplied identifier, rejecting blank values
            pub fn parse(s: &str) -> Result<Self> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err(CertsError::validation_field(
                        concat!($label, " must not be empty"),
                        $label,
                    ));
                }
                Ok(Self(trimmed.to_string()))
            }

            /// Wrap a value read back from storage
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Convert to inner string value
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

domain_id!(
    /// Identifier of a registered device
    ThingId,
    "thing_id"
);

domain_id!(
    /// Identifier of the account that owns things and their certificates
    OwnerId,
    "owner_id"
);
