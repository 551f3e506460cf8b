//! Double-submit CSRF protection for cookie-authenticated form posts.
//!
//! A token is minted on every form render and sent both as the readable
//! `csrf_token` cookie and in the page body. Mutating requests must echo it back
//! in the `X-CSRF-Token` header or the `csrf_token` form field. Requests resolved
//! by a bearer token are exempt.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header::CONTENT_TYPE, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{
    context::{lookup, Identity, RequestAuth},
    cookies::{cookie_value, CSRF_COOKIE_NAME},
    error::ApiError,
    utils::generate_token,
};

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FIELD: &str = "csrf_token";

const MAX_FORM_BYTES: usize = 64 * 1024;

/// Fresh token for one rendered page.
///
/// # Errors
/// Returns an error if the OS random source fails.
pub fn mint_csrf_token() -> anyhow::Result<String> {
    generate_token()
}

/// Both values present, equal length, equal bytes.
#[must_use]
pub fn tokens_match(expected: &str, submitted: &str) -> bool {
    !expected.is_empty()
        && expected.len() == submitted.len()
        && bool::from(expected.as_bytes().ct_eq(submitted.as_bytes()))
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn header_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CSRF_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Read the form field, then put the buffered body back for the handler.
async fn form_token(request: Request) -> Result<(Option<String>, Request), ApiError> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_FORM_BYTES)
        .await
        .map_err(|_| ApiError::Validation("Request body too large".to_string()))?;
    let token = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == CSRF_FIELD)
        .map(|(_, value)| value.into_owned());
    Ok((token, Request::from_parts(parts, Body::from(bytes))))
}

pub async fn csrf_guard(request: Request, next: Next) -> Response {
    if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return next.run(request).await;
    }

    let bearer = lookup(request.extensions())
        .and_then(RequestAuth::identity)
        .is_some_and(Identity::is_bearer);
    if bearer {
        return next.run(request).await;
    }

    let Some(expected) = cookie_value(request.headers(), CSRF_COOKIE_NAME) else {
        warn!("CSRF cookie missing on {}", request.uri().path());
        return ApiError::Forbidden.into_response();
    };

    let (submitted, request) = match header_token(request.headers()) {
        Some(token) => (Some(token), request),
        None if is_form(request.headers()) => match form_token(request).await {
            Ok(found) => found,
            Err(err) => return err.into_response(),
        },
        None => (None, request),
    };

    match submitted {
        Some(submitted) if tokens_match(&expected, &submitted) => next.run(request).await,
        _ => {
            warn!("CSRF token mismatch on {}", request.uri().path());
            ApiError::Forbidden.into_response()
        }
    }
}
