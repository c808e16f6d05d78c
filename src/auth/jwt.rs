//! JWT authentication
//!
//! HMAC-signed tokens with a subject and role claim.

use super::{AuthContext, AuthError, Role};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_ISSUER: &str = "volunteer-checkin";
pub const DEFAULT_AUDIENCE: &str = "volunteer-checkin-api";

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (identity id)
    pub sub: String,

    /// `volunteer`, `admin` or `ngo_admin`
    pub role: String,

    pub iss: String,

    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID
    pub jti: String,
}

/// JWT validator and issuer
pub struct JwtValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtValidator {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Validator with the default issuer and audience.
    pub fn with_secret(secret: &[u8]) -> Self {
        Self::new(secret, DEFAULT_ISSUER, DEFAULT_AUDIENCE)
    }

    /// Issue a new token. Only the admin CLI and tests mint tokens.
    pub fn issue(&self, subject_id: &str, role: Role, ttl: Duration) -> Result<String, AuthError> {
        if subject_id.trim().is_empty() {
            return Err(AuthError::InvalidJwt("empty subject".to_string()));
        }
        let now = Utc::now();
        let exp = now + ttl;

        let claims = Claims {
            sub: subject_id.to_string(),
            role: role.as_str().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: exp.timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidJwt(e.to_string()))
    }

    /// Validate a token and return the auth context
    pub fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidJwt(e.to_string()),
            }
        })?;

        let claims = token_data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidJwt("empty subject".to_string()));
        }
        let role: Role = claims.role.parse()?;

        Ok(AuthContext::new(claims.sub, role))
    }
}
