//! The authenticated caller, whichever way it authenticated.

use axum::response::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::{types::ErrorBody, Authenticated};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Return the authenticated user.", body = MeResponse),
        (status = 401, description = "Missing, invalid or revoked credentials.", body = ErrorBody),
        (status = 503, description = "Token cache unavailable.", body = ErrorBody),
    ),
    security(("bearer" = [])),
    tag = "me"
)]
pub async fn get_me(Authenticated(identity): Authenticated) -> Json<MeResponse> {
    Json(MeResponse {
        user_id: identity.user_id(),
        email: identity.email().to_string(),
        username: identity.username().to_string(),
    })
}
