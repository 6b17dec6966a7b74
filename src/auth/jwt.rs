//! JWT principal resolution
//!
//! The auth service issues HMAC-signed bearer tokens carrying the user id
//! and platform roles. The gateway validates them locally; it never issues
//! end-user tokens itself (test helpers aside).

use super::{AuthError, Principal, Role};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Claims carried by auth-service tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,

    /// Issuer
    pub iss: String,

    /// Audience
    pub aud: String,

    /// Expiration time (Unix timestamp)
    pub exp: i64,

    /// Issued at (Unix timestamp)
    pub iat: i64,

    /// Not before (Unix timestamp)
    pub nbf: i64,

    /// JWT ID
    pub jti: String,

    /// Platform roles
    #[serde(default)]
    pub roles: Vec<Role>,
}

/// Validates (and, for tests and bootstrap tooling, issues) bearer tokens.
pub struct JwtResolver {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtResolver {
    pub fn new(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
        }
    }

    /// Issue a token for the given user. Used by tests and the admin CLI;
    /// production tokens come from the auth service.
    pub fn issue(
        &self,
        user_id: &str,
        roles: &[Role],
        ttl: Duration,
    ) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            roles: roles.to_vec(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|_| AuthError::InvalidCredential)
    }

    /// Validate a token and resolve the principal it carries.
    pub fn resolve(&self, token: &str) -> Result<Principal, AuthError> {
        let mut validation = Validation::default();
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);

        let token_data =
            decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidCredential,
            })?;

        let claims = token_data.claims;
        Ok(Principal {
            id: claims.sub,
            roles: claims.roles,
            api_key_id: None,
            scopes: Vec::new(),
            metadata: HashMap::new(),
        })
    }
}
