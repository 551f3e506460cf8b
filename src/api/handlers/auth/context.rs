//! Request-scoped authentication context.
//!
//! The middleware stores what it resolved in a private extension type; handlers
//! read it back only through the [`CurrentAuth`] and [`Authenticated`] extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Extensions},
};
use std::convert::Infallible;
use uuid::Uuid;

use super::{error::ApiError, issuer::Claims, types::User};

/// Who made the request, by the mechanism that proved it.
#[derive(Clone, Debug)]
pub enum Identity {
    SessionUser(User),
    TokenClaims(Claims),
}

impl Identity {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        match self {
            Self::SessionUser(user) => user.id,
            Self::TokenClaims(claims) => claims.user_id,
        }
    }

    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::SessionUser(user) => &user.email,
            Self::TokenClaims(claims) => &claims.email,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::SessionUser(user) => &user.username,
            Self::TokenClaims(claims) => &claims.username,
        }
    }

    /// Bearer requests carry their own proof of possession and skip CSRF checks.
    #[must_use]
    pub fn is_bearer(&self) -> bool {
        matches!(self, Self::TokenClaims(_))
    }
}

#[derive(Clone, Debug, Default)]
pub struct RequestAuth {
    identity: Option<Identity>,
    flash: Option<String>,
    session_token: Option<String>,
}

impl RequestAuth {
    pub(crate) fn session(user: User, token: String, flash: Option<String>) -> Self {
        Self {
            identity: Some(Identity::SessionUser(user)),
            flash,
            session_token: Some(token),
        }
    }

    pub(crate) fn bearer(claims: Claims) -> Self {
        Self {
            identity: Some(Identity::TokenClaims(claims)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    #[must_use]
    pub fn flash(&self) -> Option<&str> {
        self.flash.as_deref()
    }

    /// Raw cookie value of the resolved session, used by logout.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    #[must_use]
    pub fn into_identity(self) -> Option<Identity> {
        self.identity
    }
}

#[derive(Clone)]
struct AuthSlot(RequestAuth);

pub(crate) fn attach(extensions: &mut Extensions, auth: RequestAuth) {
    extensions.insert(AuthSlot(auth));
}

pub(crate) fn lookup(extensions: &Extensions) -> Option<&RequestAuth> {
    extensions.get::<AuthSlot>().map(|slot| &slot.0)
}

/// Whatever the auth middleware resolved, including nobody.
#[derive(Clone, Debug, Default)]
pub struct CurrentAuth(pub RequestAuth);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentAuth
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(lookup(&parts.extensions).cloned().unwrap_or_default()))
    }
}

/// A resolved identity, or a 401 when the request is anonymous.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Identity);

#[async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        lookup(&parts.extensions)
            .and_then(RequestAuth::identity)
            .cloned()
            .map(Self)
            .ok_or_else(ApiError::invalid_token)
    }
}
