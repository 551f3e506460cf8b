//! JSON token endpoints for API clients.
//!
//! Flow Overview:
//! 1) `register` / `login` verify credentials and answer with a 5 minute access token
//!    plus a refresh token kept in the token cache.
//! 2) `refresh` rotates the refresh token: look it up, mint a new access token, delete
//!    the old entry and store a new one.
//! 3) `logout` blacklists the presented access token for its remaining lifetime and
//!    drops every refresh token of the user.
//!
//! None of these endpoints use cookies, so they are not CSRF-guarded.

use axum::{
    extract::Extension,
    http::StatusCode,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    context::{Authenticated, Identity},
    error::{ApiError, MSG_CONFLICT, MSG_INVALID_CREDENTIALS, MSG_INVALID_REFRESH, MSG_INVALID_TOKEN},
    issuer::now_unix,
    password::{burn_verification, hash_blocking, verify_blocking},
    state::AuthState,
    storage::{create_user, find_user_by_email, find_user_by_id, touch_last_login, CreateOutcome},
    types::{AuthResponse, ErrorBody, LoginRequest, RefreshRequest, RegisterRequest, User},
    utils::{normalize_email, resolve_username, valid_email, validate_password},
};

pub const TOKEN_TYPE: &str = "Bearer";

/// Validated registration input shared by the JSON and form flows.
pub(crate) struct NewAccount {
    pub email: String,
    pub username: String,
    pub password: String,
}

impl NewAccount {
    pub(crate) fn parse(
        email: &str,
        password: String,
        username: Option<&str>,
    ) -> Result<Self, ApiError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(ApiError::Validation("Invalid email address".to_string()));
        }
        validate_password(&password).map_err(|msg| ApiError::Validation(msg.to_string()))?;
        let username =
            resolve_username(username, &email).map_err(|msg| ApiError::Validation(msg.to_string()))?;
        Ok(Self {
            email,
            username,
            password,
        })
    }
}

/// Hash the password and insert the account; duplicates become a 409.
pub(crate) async fn create_account(pool: &PgPool, account: NewAccount) -> Result<User, ApiError> {
    let credentials = hash_blocking(account.password).await?;
    match create_user(pool, &account.username, &account.email, &credentials).await? {
        CreateOutcome::Created(user) => {
            info!(user_id = %user.id, "Account created");
            Ok(user)
        }
        CreateOutcome::Conflict => Err(ApiError::Conflict(MSG_CONFLICT)),
    }
}

/// Check credentials. Unknown emails spend the same key-derivation time as known ones.
pub(crate) async fn check_credentials(
    pool: &PgPool,
    email: &str,
    password: String,
) -> Result<User, ApiError> {
    let email = normalize_email(email);
    let Some(user) = find_user_by_email(pool, &email).await? else {
        burn_verification(password).await;
        warn!("Login failed: unknown account");
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS));
    };

    let valid = verify_blocking(password, user.password_hash.clone(), user.password_salt.clone()).await?;
    if !valid {
        warn!(user_id = %user.id, "Login failed: wrong password");
        return Err(ApiError::Unauthorized(MSG_INVALID_CREDENTIALS));
    }

    touch_last_login(pool, user.id).await?;
    Ok(user)
}

fn access_response(state: &AuthState, user: User, refresh_token: String) -> Result<AuthResponse, ApiError> {
    let access_token = state
        .issuer()
        .issue_access_token(user.id, &user.email, &user.username)
        .map_err(|err| ApiError::Internal(err.into()))?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        token_type: TOKEN_TYPE,
        expires_in: state.issuer().access_ttl_seconds(),
        user,
    })
}

async fn issue_tokens(state: &AuthState, user: User) -> Result<AuthResponse, ApiError> {
    let refresh_token = state.tokens().issue_refresh(user.id).await?;
    access_response(state, user, refresh_token)
}

#[utoipa::path(
    post,
    path = "/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created and tokens issued.", body = AuthResponse),
        (status = 400, description = "Invalid email, password or username.", body = ErrorBody),
        (status = 409, description = "Account already exists.", body = ErrorBody),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn register(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    let account = NewAccount::parse(&request.email, request.password, request.username.as_deref())?;
    let user = create_account(&pool, account).await?;
    let response = issue_tokens(&state, user).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Credentials accepted and tokens issued.", body = AuthResponse),
        (status = 401, description = "Invalid email or password.", body = ErrorBody),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn login(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = check_credentials(&pool, &request.email, request.password).await?;
    let response = issue_tokens(&state, user).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Refresh token rotated and a new access token issued.", body = AuthResponse),
        (status = 401, description = "Unknown, expired or already used refresh token.", body = ErrorBody),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    tag = "auth"
)]
pub async fn refresh(
    Extension(pool): Extension<PgPool>,
    Extension(state): Extension<Arc<AuthState>>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let presented = request.refresh_token.trim();
    let Some(user_id) = state.tokens().lookup_refresh(presented).await? else {
        warn!("Refresh with unknown token");
        return Err(ApiError::Unauthorized(MSG_INVALID_REFRESH));
    };

    let Some(user) = find_user_by_id(&pool, user_id).await? else {
        warn!(%user_id, "Refresh token for missing account");
        return Err(ApiError::Unauthorized(MSG_INVALID_REFRESH));
    };

    let refresh_token = state.tokens().rotate(presented, user_id).await?;
    Ok(Json(access_response(&state, user, refresh_token)?))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Access token revoked and refresh tokens deleted."),
        (status = 401, description = "Missing, invalid or revoked bearer token.", body = ErrorBody),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
pub async fn logout(
    Extension(state): Extension<Arc<AuthState>>,
    Authenticated(identity): Authenticated,
) -> Result<StatusCode, ApiError> {
    let Identity::TokenClaims(claims) = identity else {
        return Err(ApiError::Unauthorized(MSG_INVALID_TOKEN));
    };

    state.tokens().revoke(&claims, now_unix()).await?;
    info!(user_id = %claims.user_id, "Logged out, access token revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        middleware::require_api_auth,
        state::{lazy_pool, test_state, AuthConfig},
        token_store::{MemoryTokenStore, UnavailableTokenStore},
    };
    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, header::CONTENT_TYPE, Method, Request},
        middleware::from_fn,
        routing::post,
        Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app(state: Arc<AuthState>) -> Router {
        Router::new()
            .route("/v1/auth/register", post(register))
            .route("/v1/auth/login", post(login))
            .route("/v1/auth/refresh", post(refresh))
            .route(
                "/v1/auth/logout",
                post(logout).route_layer(from_fn(require_api_auth)),
            )
            .layer(Extension(state))
            .layer(Extension(lazy_pool()))
    }

    fn json_post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
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

    fn memory_state() -> Arc<AuthState> {
        test_state(
            AuthConfig::new("http://localhost:8080".to_string()),
            Arc::new(MemoryTokenStore::new()),
        )
    }

    #[test]
    fn new_account_validation() {
        assert!(matches!(
            NewAccount::parse("not-an-email", "Abcd1234!".to_string(), None),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            NewAccount::parse("a@b.com", "short".to_string(), None),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            NewAccount::parse("a@b.com", "Abcd1234!".to_string(), Some("x")),
            Err(ApiError::Validation(_))
        ));
        assert!(matches!(
            NewAccount::parse("a@b.com", "Abcd1234!".to_string(), None),
            Ok(ref a) if a.username == "a"
        ));
        let account = NewAccount::parse(" Alice@Example.com ", "Abcd1234!".to_string(), None);
        assert!(matches!(account, Ok(ref a) if a.email == "alice@example.com" && a.username == "alice"));
    }

    #[tokio::test]
    async fn register_rejects_invalid_input_before_storage() {
        let (status, body) = send(
            app(memory_state()),
            json_post("/v1/auth/register", r#"{"email":"nope","password":"Abcd1234!"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, r#"{"error":"Invalid email address"}"#);
    }

    #[tokio::test]
    async fn refresh_with_unknown_token_is_unauthorized() {
        let (status, body) = send(
            app(memory_state()),
            json_post("/v1/auth/refresh", r#"{"refresh_token":"unknown"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, r#"{"error":"Invalid or expired refresh token"}"#);
    }

    #[tokio::test]
    async fn login_with_store_down_is_unavailable() {
        let (status, body) = send(
            app(memory_state()),
            json_post(
                "/v1/auth/login",
                r#"{"email":"alice@example.com","password":"Abcd1234!"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, r#"{"error":"Authentication service unavailable"}"#);
    }

    #[tokio::test]
    async fn refresh_with_cache_down_is_unavailable() {
        let state = test_state(
            AuthConfig::new("http://localhost:8080".to_string()),
            Arc::new(UnavailableTokenStore),
        );
        let (status, _) = send(
            app(state),
            json_post("/v1/auth/refresh", r#"{"refresh_token":"abc"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn logout_revokes_access_and_refresh_tokens() {
        let state = memory_state();
        let user_id = Uuid::new_v4();
        let access = state
            .issuer()
            .issue_access_token(user_id, "alice@example.com", "alice")
            .expect("token");
        let refresh_token = state.tokens().issue_refresh(user_id).await.expect("refresh");

        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/auth/logout")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .expect("request");
        let (status, body) = send(app(state.clone()), request).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());

        let claims = state.issuer().validate(&access).expect("claims");
        assert_eq!(state.tokens().is_revoked(&claims.jti).await.ok(), Some(true));
        assert_eq!(
            state.tokens().lookup_refresh(&refresh_token).await.ok(),
            Some(None)
        );

        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/auth/logout")
            .header(AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(app(state), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_without_token_is_unauthorized() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/v1/auth/logout")
            .body(Body::empty())
            .expect("request");
        let (status, _) = send(app(memory_state()), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
