//! Access token issuance and validation (HS256 JWT).
//!
//! The issuer is stateless: validation checks the signature, the pinned algorithm,
//! issuer/audience and the time window. Whether a token was revoked is answered by
//! the token store, consulted by the middleware after validation succeeds.

use chrono::Utc;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use uuid::Uuid;

pub const DEFAULT_ISSUER: &str = "warden";
pub const DEFAULT_AUDIENCE: &str = "warden-api";
pub const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(5 * 60);

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signing configuration, built once at startup and moved into the issuer.
#[derive(Clone)]
pub struct TokenConfig {
    secret: SecretString,
    issuer: String,
    audience: String,
    access_ttl: Duration,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            access_ttl: DEFAULT_ACCESS_TTL,
        }
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    #[must_use]
    pub fn with_access_ttl(mut self, access_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self
    }

    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl", &self.access_ttl)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    pub jti: String,
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl Claims {
    /// Seconds until expiry as seen at `now`; zero or negative once expired.
    #[must_use]
    pub fn remaining_seconds(&self, now: i64) -> i64 {
        self.exp - now
    }
}

/// Why a token was rejected. Logged server side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Malformed,
    Signature,
    Algorithm,
    Issuer,
    Audience,
    Expired,
    NotYetValid,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TokenError {
    /// Every validation failure renders the same message.
    #[error("invalid or expired token")]
    Invalid(Rejection),
    #[error("failed to sign token")]
    Signing,
}

pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_ttl_seconds: i64,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .finish_non_exhaustive()
    }
}

#[must_use]
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: &TokenConfig) -> Self {
        let secret = config.secret.expose_secret().as_bytes();

        // Time checks run in `validate_at` against an explicit clock.
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl_seconds: i64::try_from(config.access_ttl.as_secs()).unwrap_or(i64::MAX),
        }
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    /// # Errors
    /// Returns [`TokenError::Signing`] if the token cannot be encoded.
    pub fn issue_access_token(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
    ) -> Result<String, TokenError> {
        self.issue_access_token_at(user_id, email, username, now_unix())
    }

    /// Issue a token as if the current time were `now` (unix seconds).
    ///
    /// # Errors
    /// Returns [`TokenError::Signing`] if the token cannot be encoded.
    pub fn issue_access_token_at(
        &self,
        user_id: Uuid,
        email: &str,
        username: &str,
        now: i64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            user_id,
            username: username.to_string(),
            email: email.to_string(),
            jti: Uuid::new_v4().to_string(),
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            nbf: now,
            exp: now + self.access_ttl_seconds,
        };

        encode(&Header::new(ALGORITHM), &claims, &self.encoding).map_err(|_| TokenError::Signing)
    }

    /// # Errors
    /// Returns [`TokenError::Invalid`] for any malformed, forged or expired token.
    pub fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate_at(token, now_unix())
    }

    /// Validate `token` against the clock value `now` (unix seconds).
    ///
    /// # Errors
    /// Returns [`TokenError::Invalid`] for any malformed, forged or expired token.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Claims, TokenError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|err| {
            let rejection = match err.kind() {
                ErrorKind::InvalidSignature => Rejection::Signature,
                ErrorKind::InvalidAlgorithm => Rejection::Algorithm,
                ErrorKind::InvalidIssuer => Rejection::Issuer,
                ErrorKind::InvalidAudience => Rejection::Audience,
                ErrorKind::ExpiredSignature => Rejection::Expired,
                ErrorKind::ImmatureSignature => Rejection::NotYetValid,
                _ => Rejection::Malformed,
            };
            TokenError::Invalid(rejection)
        })?;

        let claims = data.claims;
        if now >= claims.exp {
            return Err(TokenError::Invalid(Rejection::Expired));
        }
        if now < claims.nbf {
            return Err(TokenError::Invalid(Rejection::NotYetValid));
        }
        if claims.sub != claims.user_id.to_string() {
            return Err(TokenError::Invalid(Rejection::Malformed));
        }

        Ok(claims)
    }
}
