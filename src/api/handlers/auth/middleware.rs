//! Identity resolution for incoming requests.
//!
//! Flow Overview:
//! 1) A bearer token is taken from `Authorization: Bearer ...`, or from `?token=` for
//!    streaming clients that cannot set headers. When one is present the session
//!    cookie is not consulted.
//! 2) Otherwise the `session_token` cookie is resolved against the sessions table.
//!    Page-facing entry points also take any pending flash message; API routes
//!    leave it for the next page render.
//! 3) The result is attached to the request for the `CurrentAuth` / `Authenticated`
//!    extractors.
//!
//! The three entry points differ only in what happens when nobody is resolved:
//! `optional_auth` continues, `require_api_auth` answers 401 JSON and
//! `require_page_auth` redirects to the login page. A blacklist lookup that cannot
//! reach the cache is always a 503.

use axum::{
    extract::{Extension, Request},
    http::{header::AUTHORIZATION, HeaderMap, Uri},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    context::{attach, RequestAuth},
    cookies::{cookie_value, SESSION_COOKIE_NAME},
    error::ApiError,
    session::SessionManager,
    state::AuthState,
};

pub const LOGIN_PATH: &str = "/login";

const TOKEN_QUERY_PARAM: &str = "token";

#[derive(Debug, PartialEq, Eq)]
enum BearerCredential {
    Absent,
    Malformed,
    Token(String),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flash {
    Take,
    Keep,
}

enum Resolved {
    Anonymous,
    Rejected,
    Found(RequestAuth),
}

/// Strip the `Bearer ` scheme from an `Authorization` header value.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn query_token(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == TOKEN_QUERY_PARAM)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn bearer_credential(headers: &HeaderMap, uri: &Uri) -> BearerCredential {
    if headers.contains_key(AUTHORIZATION) {
        return extract_bearer_token(headers)
            .map_or(BearerCredential::Malformed, BearerCredential::Token);
    }
    query_token(uri).map_or(BearerCredential::Absent, BearerCredential::Token)
}

async fn resolve_bearer(state: &AuthState, token: &str) -> Result<Resolved, ApiError> {
    let claims = match state.issuer().validate(token) {
        Ok(claims) => claims,
        Err(err) => {
            debug!("Rejected access token: {err:?}");
            return Ok(Resolved::Rejected);
        }
    };

    if state.tokens().is_revoked(&claims.jti).await? {
        warn!(user_id = %claims.user_id, "Revoked access token presented");
        return Ok(Resolved::Rejected);
    }

    Ok(Resolved::Found(RequestAuth::bearer(claims)))
}

async fn resolve(
    pool: &PgPool,
    state: &AuthState,
    headers: &HeaderMap,
    uri: &Uri,
    flash: Flash,
) -> Result<Resolved, ApiError> {
    match bearer_credential(headers, uri) {
        BearerCredential::Token(token) => return resolve_bearer(state, &token).await,
        BearerCredential::Malformed => {
            debug!("Authorization header without Bearer scheme");
            return Ok(Resolved::Rejected);
        }
        BearerCredential::Absent => {}
    }

    let Some(token) = cookie_value(headers, SESSION_COOKIE_NAME) else {
        return Ok(Resolved::Anonymous);
    };

    let sessions = SessionManager::new(pool.clone(), state.config().session_ttl());
    match sessions.resolve(&token).await? {
        Some(user) => {
            let message = match flash {
                Flash::Take => sessions.take_flash(&token).await?,
                Flash::Keep => None,
            };
            Ok(Resolved::Found(RequestAuth::session(user, token, message)))
        }
        None => {
            debug!("Session cookie did not resolve");
            Ok(Resolved::Rejected)
        }
    }
}

/// Attach whatever identity the request carries and always continue.
pub async fn optional_auth(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let auth = match resolve(&pool, &state, request.headers(), request.uri(), Flash::Take).await {
        Ok(Resolved::Found(auth)) => auth,
        Ok(Resolved::Anonymous | Resolved::Rejected) => RequestAuth::default(),
        Err(err) => return err.into_response(),
    };
    attach(request.extensions_mut(), auth);
    next.run(request).await
}

/// API routes: anonymous or rejected requests get a uniform 401 JSON body.
/// A pending flash message stays on the session.
pub async fn require_api_auth(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(&pool, &state, request.headers(), request.uri(), Flash::Keep).await {
        Ok(Resolved::Found(auth)) => {
            attach(request.extensions_mut(), auth);
            next.run(request).await
        }
        Ok(Resolved::Anonymous | Resolved::Rejected) => ApiError::invalid_token().into_response(),
        Err(err) => err.into_response(),
    }
}

/// Cookie-flow routes: anonymous or rejected requests are sent to the login page.
pub async fn require_page_auth(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match resolve(&pool, &state, request.headers(), request.uri(), Flash::Take).await {
        Ok(Resolved::Found(auth)) => {
            attach(request.extensions_mut(), auth);
            next.run(request).await
        }
        Ok(Resolved::Anonymous | Resolved::Rejected) => Redirect::to(LOGIN_PATH).into_response(),
        Err(err) => err.into_response(),
    }
}
