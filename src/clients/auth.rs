//! Bearer token verification.
//!
//! Tokens are HS256 JWTs minted by the platform's identity service. The
//! `sub` claim is the owner id; nothing else in the token is trusted.

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, EncodingKey,
    Header, Validation,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AuthConfig;
use crate::domain::OwnerId;
use crate::errors::{AuthErrorType, CertsError, Result};

/// Resolves a bearer token to the owner it was issued for.
#[async_trait]
pub trait AuthorizationClient: Send + Sync {
    async fn identify(&self, token: &str) -> Result<OwnerId>;
}

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
}

pub struct JwtAuthorizationClient {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: Option<String>,
    audience: Option<String>,
}

impl std::fmt::Debug for JwtAuthorizationClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtAuthorizationClient")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl JwtAuthorizationClient {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Mint a token for `owner` valid for `ttl`, carrying the configured
    /// issuer and audience. Used by operators and tests to obtain credentials.
    pub fn mint(&self, owner: &OwnerId, ttl: chrono::Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: owner.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| CertsError::config(format!("Failed to sign token: {}", e)))
    }
}

#[async_trait]
impl AuthorizationClient for JwtAuthorizationClient {
    async fn identify(&self, token: &str) -> Result<OwnerId> {
        let token = token.trim();
        if token.is_empty() {
            return Err(CertsError::authorization(
                "Missing bearer token",
                AuthErrorType::MissingToken,
            ));
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            debug!(error = %e, "Token rejected");
            match e.kind() {
                JwtErrorKind::ExpiredSignature => {
                    CertsError::authorization("Token expired", AuthErrorType::ExpiredToken)
                }
                _ => CertsError::authorization("Invalid token", AuthErrorType::InvalidToken),
            }
        })?;

        OwnerId::parse(&data.claims.sub).map_err(|_| {
            CertsError::authorization("Token has no subject", AuthErrorType::InvalidToken)
        })
    }
}
