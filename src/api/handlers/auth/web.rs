//! Cookie session endpoints for the browser flow.
//!
//! `GET /session` is what a page calls on render: it reports the current user and
//! pending flash message, and mints a fresh CSRF token and form render stamp.
//! The form posts answer with `303 See Other` redirects; failures land back on the
//! form with an `error` query parameter.

use axum::{
    extract::{Extension, Form},
    http::header::SET_COOKIE,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{
    bearer::{check_credentials, create_account, NewAccount},
    context::{CurrentAuth, Identity},
    cookies::CookiePolicy,
    csrf::mint_csrf_token,
    error::ApiError,
    issuer::now_unix,
    middleware::LOGIN_PATH,
    session::SessionManager,
    state::AuthState,
    storage::find_user_by_id,
    types::{ErrorBody, SessionLoginForm, SessionRegisterForm, SessionView},
};

pub const HOME_PATH: &str = "/";
pub const REGISTER_PATH: &str = "/register";

fn header_error(err: axum::http::header::InvalidHeaderValue) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("invalid cookie header: {err}"))
}

fn back_to(path: &str, message: &str) -> Response {
    let encoded: String = url::form_urlencoded::byte_serialize(message.as_bytes()).collect();
    Redirect::to(&format!("{path}?error={encoded}")).into_response()
}

fn sessions(pool: &PgPool, state: &AuthState) -> SessionManager {
    SessionManager::new(pool.clone(), state.config().session_ttl())
}

/// Create a session, park `flash` on it and redirect home with the cookie set.
async fn start_session(
    pool: &PgPool,
    state: &AuthState,
    user_id: uuid::Uuid,
    flash: &str,
) -> Result<Response, ApiError> {
    let sessions = sessions(pool, state);
    let token = sessions.create(user_id).await?;
    sessions.set_flash(&token, flash).await?;
    let cookie = CookiePolicy::new(state.config().production())
        .session(&token, sessions.ttl())
        .map_err(header_error)?;
    Ok(([(SET_COOKIE, cookie)], Redirect::to(HOME_PATH)).into_response())
}

#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Current session state with a fresh CSRF token and render stamp.", body = SessionView),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    tag = "session"
)]
pub async fn session_view(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    CurrentAuth(auth): CurrentAuth,
) -> Result<Response, ApiError> {
    let user = match auth.identity() {
        Some(Identity::SessionUser(user)) => Some(user.clone()),
        Some(Identity::TokenClaims(claims)) => find_user_by_id(&pool, claims.user_id).await?,
        None => None,
    };

    let csrf_token = mint_csrf_token()?;
    let cookie = CookiePolicy::new(state.config().production())
        .csrf(&csrf_token, state.config().session_ttl())
        .map_err(header_error)?;

    let view = SessionView {
        authenticated: user.is_some(),
        user,
        flash: auth.flash().map(str::to_string),
        csrf_token,
        render_stamp: state.stamper().mint_at(now_unix()),
    };
    Ok(([(SET_COOKIE, cookie)], Json(view)).into_response())
}

#[utoipa::path(
    post,
    path = "/session/register",
    request_body(content = SessionRegisterForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Registered; redirect home with the session cookie, or back to the form with an error."),
        (status = 403, description = "CSRF token missing or mismatched.", body = ErrorBody),
    ),
    tag = "session"
)]
pub async fn register_form(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Form(form): Form<SessionRegisterForm>,
) -> Result<Response, ApiError> {
    let account = match NewAccount::parse(&form.email, form.password, form.username.as_deref()) {
        Ok(account) => account,
        Err(err) => return Ok(back_to(REGISTER_PATH, &err.public_message())),
    };
    let user = match create_account(&pool, account).await {
        Ok(user) => user,
        Err(err @ ApiError::Conflict(_)) => return Ok(back_to(REGISTER_PATH, &err.public_message())),
        Err(err) => return Err(err),
    };

    start_session(&pool, &state, user.id, &format!("Welcome, {}!", user.username)).await
}

#[utoipa::path(
    post,
    path = "/session/login",
    request_body(content = SessionLoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Logged in; redirect home with the session cookie, or back to the form with an error."),
        (status = 403, description = "CSRF token missing or mismatched.", body = ErrorBody),
    ),
    tag = "session"
)]
pub async fn login_form(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Form(form): Form<SessionLoginForm>,
) -> Result<Response, ApiError> {
    let user = match check_credentials(&pool, &form.email, form.password).await {
        Ok(user) => user,
        Err(err @ ApiError::Unauthorized(_)) => return Ok(back_to(LOGIN_PATH, &err.public_message())),
        Err(err) => return Err(err),
    };

    info!(user_id = %user.id, "Session login");
    start_session(&pool, &state, user.id, &format!("Welcome back, {}!", user.username)).await
}

#[utoipa::path(
    post,
    path = "/session/logout",
    responses(
        (status = 303, description = "Session deleted and cookie cleared; redirect to the login page."),
        (status = 403, description = "CSRF token missing or mismatched.", body = ErrorBody),
    ),
    tag = "session"
)]
pub async fn logout_form(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    CurrentAuth(auth): CurrentAuth,
) -> Result<Response, ApiError> {
    if let Some(token) = auth.session_token() {
        sessions(&pool, &state).destroy(token).await?;
    }
    let cookie = CookiePolicy::new(state.config().production())
        .clear_session()
        .map_err(header_error)?;
    Ok(([(SET_COOKIE, cookie)], Redirect::to(LOGIN_PATH)).into_response())
}
