//! User listing and self-service profile updates.
//!
//! Any authenticated caller may list accounts; an account may only be modified by
//! its owner.

use axum::{
    extract::{Extension, Path},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{
    list_users as load_users,
    types::{ErrorBody, User},
    update_user as store_update,
    utils::{normalize_email, valid_email, MAX_USERNAME_LEN, MIN_USERNAME_LEN},
    ApiError, Authenticated, UpdateOutcome,
};

pub const MSG_UPDATE_CONFLICT: &str = "Unable to update account";

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

struct ValidUpdate {
    username: Option<String>,
    email: Option<String>,
}

fn validate_update(request: UpdateUserRequest) -> Result<ValidUpdate, ApiError> {
    let username = match request.username.map(|value| value.trim().to_string()) {
        Some(value) => {
            let length = value.chars().count();
            if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&length)
                || value.chars().any(char::is_control)
            {
                return Err(ApiError::Validation(
                    "Username must be between 3 and 50 characters".to_string(),
                ));
            }
            Some(value)
        }
        None => None,
    };

    let email = match request.email {
        Some(value) => {
            let normalized = normalize_email(&value);
            if !valid_email(&normalized) {
                return Err(ApiError::Validation("Invalid email address".to_string()));
            }
            Some(normalized)
        }
        None => None,
    };

    Ok(ValidUpdate { username, email })
}

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "All accounts, without credentials.", body = [User]),
        (status = 401, description = "Missing, invalid or revoked credentials.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    Extension(pool): Extension<PgPool>,
    Authenticated(_identity): Authenticated,
) -> Result<Json<Vec<User>>, ApiError> {
    Ok(Json(load_users(&pool).await?))
}

#[utoipa::path(
    patch,
    path = "/v1/users/{id}",
    params(("id" = Uuid, Path, description = "Account to update; must be the caller")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated account.", body = User),
        (status = 400, description = "Invalid username or email.", body = ErrorBody),
        (status = 401, description = "Missing, invalid or revoked credentials.", body = ErrorBody),
        (status = 403, description = "Caller may not modify this account.", body = ErrorBody),
        (status = 409, description = "Email already in use.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_user(
    Extension(pool): Extension<PgPool>,
    Authenticated(identity): Authenticated,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if identity.user_id() != id {
        warn!(caller = %identity.user_id(), target = %id, "Refused update of another account");
        return Err(ApiError::Forbidden);
    }

    let update = validate_update(request)?;
    match store_update(&pool, id, update.username.as_deref(), update.email.as_deref()).await? {
        UpdateOutcome::Updated(user) => {
            info!(user_id = %user.id, "Account updated");
            Ok(Json(user))
        }
        UpdateOutcome::Conflict => Err(ApiError::Conflict(MSG_UPDATE_CONFLICT)),
        UpdateOutcome::NotFound => Err(ApiError::invalid_token()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::{
        lazy_pool, require_api_auth, test_state, AuthConfig, MemoryTokenStore,
    };
    use axum::{
        body::Body,
        http::{
            header::{AUTHORIZATION, CONTENT_TYPE},
            Method, Request, StatusCode,
        },
        middleware::from_fn,
        routing::patch,
        Router,
    };
    use std::sync::Arc;
    use tower::ServiceExt;

    #[test]
    fn update_validation() {
        assert!(validate_update(UpdateUserRequest {
            username: Some("ab".to_string()),
            email: None,
        })
        .is_err());
        assert!(validate_update(UpdateUserRequest {
            username: None,
            email: Some("nope".to_string()),
        })
        .is_err());
        let update = validate_update(UpdateUserRequest {
            username: Some(" alice ".to_string()),
            email: Some(" Alice@Example.com".to_string()),
        });
        assert!(matches!(
            update,
            Ok(ValidUpdate { username: Some(ref u), email: Some(ref e) })
                if u == "alice" && e == "alice@example.com"
        ));
    }

    #[tokio::test]
    async fn updating_someone_else_is_forbidden() {
        let state = test_state(
            AuthConfig::new("http://localhost:8080".to_string()),
            Arc::new(MemoryTokenStore::new()),
        );
        let token = state
            .issuer()
            .issue_access_token(Uuid::new_v4(), "alice@example.com", "alice")
            .expect("token");
        let app = Router::new()
            .route(
                "/v1/users/:id",
                patch(update_user).route_layer(from_fn(require_api_auth)),
            )
            .layer(Extension(state))
            .layer(Extension(lazy_pool()));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::PATCH)
                    .uri(format!("/v1/users/{}", Uuid::new_v4()))
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"username":"mallory"}"#))
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
