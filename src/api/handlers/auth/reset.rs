//! Password reset: request, token check and consumption.
//!
//! Flow Overview:
//! 1) `forgot_password` screens the submission (honeypot field, signed render stamp),
//!    applies the per-email and per-IP attempt limits, and, when the account exists,
//!    stores a one-hour reset token. The email goes out from a detached task.
//! 2) Every outcome that could reveal whether an account exists returns the same
//!    message after at least the configured response floor. Only a stale form (older
//!    than the stamp window) and the rate limit answer differently.
//! 3) `reset_password` marks the token used and replaces the password hash in one
//!    transaction, which also drops the user's cookie sessions. Refresh tokens are
//!    revoked afterwards, best effort.

use anyhow::Context;
use axum::{
    extract::{ConnectInfo, Extension, Form, Query},
    http::HeaderMap,
    Json,
};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::time::{sleep_until, Instant};
use tracing::{error, info, warn, Instrument, Span};
use uuid::Uuid;

use super::{
    error::ApiError,
    issuer::now_unix,
    password::{hash_blocking, PasswordHash},
    rate_limit::{check_and_record, RateLimitDecision, UNKNOWN_IP},
    render_stamp::StampCheck,
    session::delete_user_sessions,
    state::AuthState,
    storage::find_user_by_email,
    types::{
        ErrorBody, ForgotPasswordForm, MessageBody, ResetPasswordForm, ResetTokenQuery,
        ResetTokenStatus,
    },
    utils::{
        build_reset_url, extract_client_ip, generate_token, hash_token, normalize_email,
        valid_email, validate_password,
    },
};
use crate::api::email::EmailMessage;

pub const MSG_RESET_REQUESTED: &str =
    "If an account with that email exists, you will receive a password reset link shortly.";
pub const MSG_FORM_EXPIRED: &str = "Form expired. Please refresh the page and try again.";
pub const MSG_INVALID_RESET: &str = "Invalid or expired reset token";
pub const MSG_PASSWORD_MISMATCH: &str = "Passwords do not match";
pub const MSG_RESET_DONE: &str = "Your password has been reset. You can now log in.";

fn generic_response() -> Json<MessageBody> {
    Json(MessageBody {
        message: MSG_RESET_REQUESTED.to_string(),
    })
}

/// Store a reset token for `user_id` and return the raw value for the link.
///
/// # Errors
/// Returns an error if token generation or the insert fails.
pub async fn create_reset_token(pool: &PgPool, user_id: Uuid, ttl: Duration) -> anyhow::Result<String> {
    let token = generate_token()?;
    let query = "INSERT INTO password_resets (token_hash, user_id, expires_at) VALUES ($1, $2, NOW() + $3::interval)";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(format!("{} seconds", ttl.as_secs()))
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to store reset token")?;
    Ok(token)
}

/// Whether `token` names an unused, unexpired reset.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn reset_token_is_valid(pool: &PgPool, token: &str) -> anyhow::Result<bool> {
    let query = "SELECT 1 FROM password_resets WHERE token_hash = $1 AND used = FALSE AND expires_at > NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(token))
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("Failed to look up reset token")?;
    Ok(row.is_some())
}

/// Mark the reset used in one statement; `None` when it is unknown, used or expired.
async fn claim_reset_token(
    tx: &mut Transaction<'_, Postgres>,
    token: &str,
) -> anyhow::Result<Option<Uuid>> {
    let query = "UPDATE password_resets SET used = TRUE WHERE token_hash = $1 AND used = FALSE AND expires_at > NOW() RETURNING user_id";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(hash_token(token))
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to claim reset token")?;
    Ok(row.map(|row| row.get("user_id")))
}

async fn set_password(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    credentials: &PasswordHash,
) -> anyhow::Result<()> {
    let query = "UPDATE users SET password_hash = $2, password_salt = $3, updated_at = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&credentials.digest)
        .bind(&credentials.salt)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("Failed to update password")?;
    Ok(())
}

/// Consume `token` and apply the new password. Both writes commit together.
///
/// # Errors
/// Returns an error if any statement or the commit fails.
pub async fn consume_reset_token(
    pool: &PgPool,
    token: &str,
    credentials: &PasswordHash,
) -> anyhow::Result<Option<Uuid>> {
    let mut tx = pool.begin().await.context("Failed to begin transaction")?;

    let Some(user_id) = claim_reset_token(&mut tx, token).await? else {
        tx.rollback().await.context("Failed to roll back transaction")?;
        return Ok(None);
    };

    set_password(&mut tx, user_id, credentials).await?;
    let dropped = delete_user_sessions(&mut tx, user_id).await?;

    tx.commit().await.context("Failed to commit password reset")?;
    info!(%user_id, sessions = dropped, "Password reset applied");
    Ok(Some(user_id))
}

/// Remove expired or consumed reset tokens. Returns the number of rows removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub async fn prune_reset_tokens(pool: &PgPool) -> anyhow::Result<u64> {
    let query = "DELETE FROM password_resets WHERE used = TRUE OR expires_at <= NOW()";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .execute(pool)
        .instrument(span)
        .await
        .context("Failed to prune reset tokens")?;
    Ok(result.rows_affected())
}

/// Store a reset token and hand the email to a background task, so a slow mail
/// provider never shows up in the response time. Errors are logged; the caller's
/// answer is the same.
async fn issue_reset(pool: &PgPool, state: &AuthState, email: &str) {
    let user = match find_user_by_email(pool, email).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            info!("Password reset requested for unknown account");
            return;
        }
        Err(err) => {
            error!("Password reset lookup failed: {err:#}");
            return;
        }
    };

    let ttl = state.config().reset_token_ttl();
    let token = match create_reset_token(pool, user.id, ttl).await {
        Ok(token) => token,
        Err(err) => {
            error!(user_id = %user.id, "Failed to issue reset token: {err:#}");
            return;
        }
    };

    let url = build_reset_url(state.config().frontend_base_url(), &token);
    let message = EmailMessage::password_reset(&user.email, &url, ttl.as_secs() / 60);
    let sender = Arc::clone(state.email());
    let user_id = user.id;
    tokio::spawn(
        async move {
            if let Err(err) = sender.send(&message).await {
                error!(%user_id, "Failed to send reset email: {err:#}");
            } else {
                info!(%user_id, "Password reset email sent");
            }
        }
        .instrument(Span::current()),
    );
}

#[utoipa::path(
    post,
    path = "/password/forgot",
    request_body(content = ForgotPasswordForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Generic acknowledgement, whether or not the account exists.", body = MessageBody),
        (status = 400, description = "The form was rendered too long ago.", body = ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched.", body = ErrorBody),
        (status = 429, description = "Too many reset requests for this email or address.", body = ErrorBody),
    ),
    tag = "password"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Form(form): Form<ForgotPasswordForm>,
) -> Result<Json<MessageBody>, ApiError> {
    let config = state.config();
    let deadline = Instant::now() + config.reset_response_floor();

    if form.website.as_deref().is_some_and(|value| !value.trim().is_empty()) {
        warn!("Password reset honeypot triggered");
        tokio::time::sleep(config.honeypot_delay()).await;
        return Ok(generic_response());
    }

    match state.stamper().check_at(form.render_stamp.as_deref(), now_unix()) {
        StampCheck::Fresh => {}
        StampCheck::Stale => return Err(ApiError::Validation(MSG_FORM_EXPIRED.to_string())),
        check @ (StampCheck::TooFast | StampCheck::Invalid) => {
            warn!(?check, "Password reset render stamp rejected");
            tokio::time::sleep(config.honeypot_delay()).await;
            return Ok(generic_response());
        }
    }

    let email = normalize_email(&form.email);
    let peer = peer.map(|ConnectInfo(addr)| addr);
    let ip = extract_client_ip(&headers, peer).unwrap_or_else(|| UNKNOWN_IP.to_string());

    match check_and_record(&pool, config.rate_limit(), &email, &ip).await {
        Ok(RateLimitDecision::Allowed) => {
            if valid_email(&email) {
                issue_reset(&pool, &state, &email).await;
            } else {
                info!("Password reset requested with malformed email");
            }
        }
        Ok(RateLimitDecision::Limited) => return Err(ApiError::RateLimited),
        Err(err) => error!("Password reset rate limit check failed: {err:#}"),
    }

    sleep_until(deadline).await;
    Ok(generic_response())
}

#[utoipa::path(
    get,
    path = "/password/reset",
    params(("token" = String, Query, description = "Reset token from the emailed link")),
    responses(
        (status = 200, description = "The token can be used.", body = ResetTokenStatus),
        (status = 400, description = "Unknown, used or expired token.", body = ErrorBody),
    ),
    tag = "password"
)]
pub async fn check_reset_token(
    Extension(pool): Extension<PgPool>,
    Query(query): Query<ResetTokenQuery>,
) -> Result<Json<ResetTokenStatus>, ApiError> {
    let token = query.token.trim();
    if token.is_empty() || !reset_token_is_valid(&pool, token).await? {
        return Err(ApiError::Validation(MSG_INVALID_RESET.to_string()));
    }
    Ok(Json(ResetTokenStatus { valid: true }))
}

#[utoipa::path(
    post,
    path = "/password/reset",
    request_body(content = ResetPasswordForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Password replaced; existing sessions ended.", body = MessageBody),
        (status = 400, description = "Invalid token, mismatched confirmation or weak password.", body = ErrorBody),
        (status = 403, description = "CSRF token missing or mismatched.", body = ErrorBody),
    ),
    tag = "password"
)]
pub async fn reset_password(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Form(form): Form<ResetPasswordForm>,
) -> Result<Json<MessageBody>, ApiError> {
    let token = form.token.trim();
    if token.is_empty() {
        return Err(ApiError::Validation(MSG_INVALID_RESET.to_string()));
    }
    if form.password != form.confirm_password {
        return Err(ApiError::Validation(MSG_PASSWORD_MISMATCH.to_string()));
    }
    validate_password(&form.password).map_err(|msg| ApiError::Validation(msg.to_string()))?;

    let credentials = hash_blocking(form.password).await?;
    let Some(user_id) = consume_reset_token(&pool, token, &credentials).await? else {
        warn!("Password reset with invalid token");
        return Err(ApiError::Validation(MSG_INVALID_RESET.to_string()));
    };

    if let Err(err) = state.tokens().store().delete_all_refresh(user_id).await {
        warn!(%user_id, "Failed to revoke refresh tokens after reset: {err}");
    }

    Ok(Json(MessageBody {
        message: MSG_RESET_DONE.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        state::{lazy_pool, test_state, AuthConfig},
        token_store::MemoryTokenStore,
    };
    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Method, Request, StatusCode},
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    fn state() -> Arc<AuthState> {
        test_state(
            AuthConfig::new("http://localhost:8080".to_string()),
            Arc::new(MemoryTokenStore::new()),
        )
    }

    fn app(state: Arc<AuthState>) -> Router {
        Router::new()
            .route("/password/forgot", post(forgot_password))
            .route("/password/reset", post(reset_password).get(check_reset_token))
            .layer(Extension(state))
            .layer(Extension(lazy_pool()))
    }

    fn form(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request")
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    fn generic_body() -> String {
        serde_json::json!({ "message": MSG_RESET_REQUESTED }).to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn honeypot_gets_generic_answer_after_delay() {
        let state = state();
        let stamp = state.stamper().mint_at(now_unix() - 10);
        let started = Instant::now();
        let (status, body) = send(
            app(state),
            form(
                "/password/forgot",
                format!("email=a%40b.com&website=http%3A%2F%2Fspam&render_stamp={stamp}"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, generic_body());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fast_or_missing_stamp_gets_generic_answer() {
        let state = state();
        let fresh = state.stamper().mint_at(now_unix());
        for body in [
            format!("email=a%40b.com&render_stamp={fresh}"),
            "email=a%40b.com".to_string(),
            "email=a%40b.com&render_stamp=forged.stamp".to_string(),
        ] {
            let (status, text) = send(app(state.clone()), form("/password/forgot", body)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(text, generic_body());
        }
    }

    #[tokio::test]
    async fn stale_stamp_asks_for_reload() {
        let state = state();
        let stale = state.stamper().mint_at(now_unix() - 31 * 60);
        let (status, body) = send(
            app(state),
            form("/password/forgot", format!("email=a%40b.com&render_stamp={stale}")),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({ "error": MSG_FORM_EXPIRED }).to_string());
    }

    #[tokio::test]
    async fn reset_rejects_mismatch_and_weak_passwords_before_storage() {
        let (status, body) = send(
            app(state()),
            form(
                "/password/reset",
                "token=abc&password=Abcd1234%21&confirm_password=Abcd1234%3F".to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(MSG_PASSWORD_MISMATCH));

        let (status, _) = send(
            app(state()),
            form(
                "/password/reset",
                "token=abc&password=weak&confirm_password=weak".to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            app(state()),
            form(
                "/password/reset",
                "password=Abcd1234%21&confirm_password=Abcd1234%21".to_string(),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(MSG_INVALID_RESET));
    }

    #[tokio::test]
    async fn check_without_token_is_invalid() {
        let request = Request::builder()
            .uri("/password/reset")
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(app(state()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains(MSG_INVALID_RESET));
    }
}
