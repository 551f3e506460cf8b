use super::handlers::{
    auth::{self, csrf_guard, optional_auth, require_api_auth, require_page_auth},
    health, me, users,
};
use axum::middleware::from_fn;
use utoipa::openapi::{
    security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    ComponentsBuilder, Contact, InfoBuilder, License, OpenApiBuilder, Tag,
};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Routes are grouped by the middleware they need. Within a group the auth layer
/// is added last so it runs before the CSRF guard and the guard can see whether
/// the request came with a bearer token.
pub(crate) fn api_router() -> OpenApiRouter {
    let public = OpenApiRouter::new()
        .routes(routes!(health::health))
        .routes(routes!(auth::bearer::register))
        .routes(routes!(auth::bearer::login))
        .routes(routes!(auth::bearer::refresh));

    let forms = OpenApiRouter::new()
        .routes(routes!(auth::web::register_form))
        .routes(routes!(auth::web::login_form))
        .routes(routes!(auth::reset::forgot_password))
        .routes(routes!(
            auth::reset::check_reset_token,
            auth::reset::reset_password
        ))
        .route_layer(from_fn(csrf_guard));

    let session_page = OpenApiRouter::new()
        .routes(routes!(auth::web::session_view))
        .route_layer(from_fn(optional_auth));

    let session_required = OpenApiRouter::new()
        .routes(routes!(auth::web::logout_form))
        .route_layer(from_fn(csrf_guard))
        .route_layer(from_fn(require_page_auth));

    let api_required = OpenApiRouter::new()
        .routes(routes!(auth::bearer::logout))
        .routes(routes!(me::get_me))
        .routes(routes!(users::list_users))
        .routes(routes!(users::update_user))
        .route_layer(from_fn(csrf_guard))
        .route_layer(from_fn(require_api_auth));

    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .merge(public)
        .merge(forms)
        .merge(session_page)
        .merge(session_required)
        .merge(api_required);

    let mut openapi = router.to_openapi();
    openapi.tags = Some(vec![
        tag("auth", "Bearer token issuance, rotation and revocation"),
        tag("session", "Cookie sessions for browser clients"),
        tag("password", "Password reset"),
        tag("me", "The authenticated caller"),
        tag("users", "Accounts"),
        tag("health", "Service health"),
    ]);

    OpenApiRouter::with_openapi(openapi).merge(router)
}

fn tag(name: &str, description: &str) -> Tag {
    let mut tag = Tag::new(name);
    tag.description = Some(description.to_string());
    tag
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    let components = ComponentsBuilder::new()
        .security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        )
        .build();

    OpenApiBuilder::new()
        .info(info)
        .components(Some(components))
        .build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    if let Some(start) = author.find('<') {
        let name = author[..start].trim();
        let email = author[start + 1..].trim_end_matches('>').trim();
        let name = if name.is_empty() { None } else { Some(name) };
        let email = if email.is_empty() { None } else { Some(email) };
        (name, email)
    } else {
        let name = author.trim();
        (if name.is_empty() { None } else { Some(name) }, None)
    }
}
