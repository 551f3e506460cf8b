//! End-to-end flows through the full router against a real Postgres.
//!
//! Each test starts a disposable Postgres container (or uses `WARDEN_TEST_DSN`) and
//! skips when no container runtime is available. The token cache is the in-process
//! store.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
        Method, Request, Response, StatusCode,
    },
    extract::connect_info::MockConnectInfo,
    Router,
};
use secrecy::SecretString;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use test_support::postgres::TestPostgres;
use tower::ServiceExt;
use uuid::Uuid;
use warden::api::{
    self,
    email::{EmailMessage, EmailSender},
    handlers::auth::{apply_schema, AuthConfig, AuthState, MemoryTokenStore, TokenConfig},
};

const SECRET: &str = "integration-secret-0123456789abcdef";

/// Records every message, optionally after a delay like a slow mail provider.
#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<EmailMessage>>,
    delay: Duration,
}

impl Outbox {
    fn find(&self, to: &str) -> Result<Option<EmailMessage>> {
        let sent = self.sent.lock().map_err(|_| anyhow!("outbox poisoned"))?;
        Ok(sent.iter().find(|message| message.to == to).cloned())
    }

    /// Delivery runs in the background, so poll for it.
    async fn wait_for(&self, to: &str) -> Result<EmailMessage> {
        for _ in 0..100 {
            if let Some(message) = self.find(to)? {
                return Ok(message);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        Err(anyhow!("no email for {to}"))
    }
}

#[async_trait]
impl EmailSender for Outbox {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.sent
            .lock()
            .map_err(|_| anyhow!("outbox poisoned"))?
            .push(message.clone());
        Ok(())
    }
}

struct TestApp {
    _postgres: TestPostgres,
    router: Router,
    pool: PgPool,
    state: Arc<AuthState>,
    outbox: Arc<Outbox>,
}

async fn test_app() -> Result<Option<TestApp>> {
    test_app_with(Duration::ZERO, Outbox::default()).await
}

async fn test_app_with(reset_floor: Duration, outbox: Outbox) -> Result<Option<TestApp>> {
    let Some(postgres) = TestPostgres::start().await? else {
        return Ok(None);
    };
    let pool = postgres.pool().await?;
    apply_schema(&pool).await.context("apply schema")?;

    let outbox = Arc::new(outbox);
    let token_config = TokenConfig::new(SecretString::from(SECRET));
    let config = AuthConfig::new("http://localhost:8080".to_string())
        .with_reset_response_floor(reset_floor);
    let state = Arc::new(AuthState::new(
        config,
        &token_config,
        Arc::new(MemoryTokenStore::new()),
        outbox.clone(),
    ));
    let router = api::app(pool.clone(), state.clone())?;
    Ok(Some(TestApp {
        _postgres: postgres,
        router,
        pool,
        state,
        outbox,
    }))
}

fn unique_email() -> String {
    format!("e2e-{}@b.com", Uuid::new_v4().simple())
}

async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

fn json_request(method: Method, uri: &str, body: &Value, bearer: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    Ok(builder.body(Body::from(body.to_string()))?)
}

fn get(uri: &str, bearer: Option<&str>, cookies: Option<&str>) -> Result<Request<Body>> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(cookies) = cookies {
        builder = builder.header(COOKIE, cookies);
    }
    Ok(builder.body(Body::empty())?)
}

fn form_post(uri: &str, cookies: &str, body: String) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(COOKIE, cookies)
        .body(Body::from(body))?)
}

fn cookie_pair(response: &Response<Body>, name: &str) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .find(|pair| pair.starts_with(&format!("{name}=")))
        .map(str::to_string)
}

/// Forgot-password attempts are rate limited per client address in the database,
/// so each call claims its own.
fn with_fresh_ip(mut request: Request<Body>) -> Request<Body> {
    let bytes = Uuid::new_v4().into_bytes();
    if let Ok(value) = format!("10.{}.{}.{}", bytes[0], bytes[1], bytes[2]).parse() {
        request.headers_mut().insert("x-forwarded-for", value);
    }
    request
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[tokio::test]
async fn register_me_logout_me() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };

    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({ "email": unique_email(), "password": "Abcd1234!" }),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let auth = body_json(response).await?;
    assert_eq!(auth["token_type"], "Bearer");
    assert_eq!(auth["expires_in"], 300);
    assert!(auth["user"].get("password_hash").is_none());
    let access = auth["access_token"].as_str().unwrap_or_default().to_string();
    let user_id = auth["user"]["id"].clone();

    let response = app.router.clone().oneshot(get("/v1/me", Some(&access), None)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await?["user_id"], user_id);

    let response = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/auth/logout", &Value::Null, Some(&access))?)
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.router.clone().oneshot(get("/v1/me", Some(&access), None)?).await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn duplicate_registration_conflicts() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };
    let body = json!({ "email": unique_email(), "password": "Abcd1234!" });

    let first = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/auth/register", &body, None)?)
        .await?;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .router
        .clone()
        .oneshot(json_request(Method::POST, "/v1/auth/register", &body, None)?)
        .await?;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await?, json!({ "error": "Unable to create account" }));
    Ok(())
}

#[tokio::test]
async fn login_and_refresh_rotation() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };
    let email = unique_email();
    app.router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({ "email": email, "password": "Abcd1234!" }),
            None,
        )?)
        .await?;

    let wrong = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({ "email": email, "password": "Wrong1234!" }),
            None,
        )?)
        .await?;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    let unknown = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({ "email": unique_email(), "password": "Abcd1234!" }),
            None,
        )?)
        .await?;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(wrong).await?, body_json(unknown).await?);

    let login = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({ "email": email.to_uppercase(), "password": "Abcd1234!" }),
            None,
        )?)
        .await?;
    assert_eq!(login.status(), StatusCode::OK);
    let old_refresh = body_json(login).await?["refresh_token"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let refreshed = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/refresh",
            &json!({ "refresh_token": old_refresh }),
            None,
        )?)
        .await?;
    assert_eq!(refreshed.status(), StatusCode::OK);
    let new_refresh = body_json(refreshed).await?["refresh_token"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    assert_ne!(new_refresh, old_refresh);

    let replay = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/refresh",
            &json!({ "refresh_token": old_refresh }),
            None,
        )?)
        .await?;
    assert_eq!(replay.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn cookie_session_flow_with_csrf_and_flash() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };

    let page = app.router.clone().oneshot(get("/session", None, None)?).await?;
    let csrf_cookie = cookie_pair(&page, "csrf_token").ok_or_else(|| anyhow!("no csrf cookie"))?;
    let view = body_json(page).await?;
    let csrf = view["csrf_token"].as_str().unwrap_or_default().to_string();
    let email = unique_email();

    let forged = app
        .router
        .clone()
        .oneshot(form_post(
            "/session/register",
            &csrf_cookie,
            format!("email={}&password=Abcd1234%21&csrf_token=wrong", encode(&email)),
        )?)
        .await?;
    assert_eq!(forged.status(), StatusCode::FORBIDDEN);

    let registered = app
        .router
        .clone()
        .oneshot(form_post(
            "/session/register",
            &csrf_cookie,
            format!("email={}&password=Abcd1234%21&csrf_token={csrf}", encode(&email)),
        )?)
        .await?;
    assert_eq!(registered.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        registered.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some("/")
    );
    let session_cookie =
        cookie_pair(&registered, "session_token").ok_or_else(|| anyhow!("no session cookie"))?;

    let first = body_json(
        app.router
            .clone()
            .oneshot(get("/session", None, Some(&session_cookie))?)
            .await?,
    )
    .await?;
    assert_eq!(first["authenticated"], true);
    assert!(first["flash"].as_str().is_some_and(|flash| flash.starts_with("Welcome")));

    let second = body_json(
        app.router
            .clone()
            .oneshot(get("/session", None, Some(&session_cookie))?)
            .await?,
    )
    .await?;
    assert!(second["flash"].is_null());

    let me = app
        .router
        .clone()
        .oneshot(get("/v1/me", None, Some(&session_cookie))?)
        .await?;
    assert_eq!(me.status(), StatusCode::OK);

    let cookies = format!("{session_cookie}; {csrf_cookie}");
    let logout = app
        .router
        .clone()
        .oneshot(form_post("/session/logout", &cookies, format!("csrf_token={csrf}"))?)
        .await?;
    assert_eq!(logout.status(), StatusCode::SEE_OTHER);
    assert!(cookie_pair(&logout, "session_token").is_some_and(|pair| pair == "session_token="));

    let after = body_json(
        app.router
            .clone()
            .oneshot(get("/session", None, Some(&session_cookie))?)
            .await?,
    )
    .await?;
    assert_eq!(after["authenticated"], false);
    Ok(())
}

#[tokio::test]
async fn password_reset_end_to_end() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };
    let email = unique_email();
    app.router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({ "email": email, "password": "Abcd1234!" }),
            None,
        )?)
        .await?;

    let csrf = "c".repeat(43);
    let csrf_cookie = format!("csrf_token={csrf}");
    let stamp = app
        .state
        .stamper()
        .mint_at(chrono::Utc::now().timestamp() - 10);

    let forgot = app
        .router
        .clone()
        .oneshot(with_fresh_ip(form_post(
            "/password/forgot",
            &csrf_cookie,
            format!("email={}&render_stamp={stamp}&csrf_token={csrf}", encode(&email)),
        )?))
        .await?;
    assert_eq!(forgot.status(), StatusCode::OK);

    let message = app.outbox.wait_for(&email).await?;
    let link = message
        .text
        .lines()
        .find(|line| line.contains("reset-password?token="))
        .map(str::to_string)
        .ok_or_else(|| anyhow!("no link"))?;
    let token = link
        .split("token=")
        .nth(1)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let check = app
        .router
        .clone()
        .oneshot(get(&format!("/password/reset?token={token}"), None, None)?)
        .await?;
    assert_eq!(check.status(), StatusCode::OK);
    assert_eq!(body_json(check).await?, json!({ "valid": true }));

    let body = format!(
        "token={token}&password=Newpass123%21&confirm_password=Newpass123%21&csrf_token={csrf}"
    );
    let reset = app
        .router
        .clone()
        .oneshot(form_post("/password/reset", &csrf_cookie, body.clone())?)
        .await?;
    assert_eq!(reset.status(), StatusCode::OK);

    let reuse = app
        .router
        .clone()
        .oneshot(form_post("/password/reset", &csrf_cookie, body)?)
        .await?;
    assert_eq!(reuse.status(), StatusCode::BAD_REQUEST);

    let login = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/login",
            &json!({ "email": email, "password": "Newpass123!" }),
            None,
        )?)
        .await?;
    assert_eq!(login.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn unknown_email_reset_looks_like_success() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };
    let csrf = "d".repeat(43);
    let stamp = app
        .state
        .stamper()
        .mint_at(chrono::Utc::now().timestamp() - 10);

    let response = app
        .router
        .clone()
        .oneshot(with_fresh_ip(form_post(
            "/password/forgot",
            &format!("csrf_token={csrf}"),
            format!(
                "email={}&render_stamp={stamp}&csrf_token={csrf}",
                encode(&unique_email())
            ),
        )?))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await?["message"],
        "If an account with that email exists, you will receive a password reset link shortly."
    );
    Ok(())
}

#[tokio::test]
async fn slow_mail_provider_does_not_show_in_reset_timing() -> Result<()> {
    let floor = Duration::from_millis(300);
    let outbox = Outbox {
        delay: Duration::from_secs(2),
        ..Outbox::default()
    };
    let Some(app) = test_app_with(floor, outbox).await? else {
        return Ok(());
    };
    let known = unique_email();
    let response = app
        .router
        .clone()
        .oneshot(json_request(
            Method::POST,
            "/v1/auth/register",
            &json!({ "email": known, "password": "Abcd1234!" }),
            None,
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);

    let csrf = "e".repeat(43);
    let mut elapsed = Vec::new();
    for email in [known.clone(), unique_email()] {
        let stamp = app
            .state
            .stamper()
            .mint_at(chrono::Utc::now().timestamp() - 10);
        let started = Instant::now();
        let response = app
            .router
            .clone()
            .oneshot(with_fresh_ip(form_post(
                "/password/forgot",
                &format!("csrf_token={csrf}"),
                format!("email={}&render_stamp={stamp}&csrf_token={csrf}", encode(&email)),
            )?))
            .await?;
        elapsed.push(started.elapsed());
        assert_eq!(response.status(), StatusCode::OK);
    }

    for took in &elapsed {
        assert!(*took >= floor, "answered before the floor: {took:?}");
        assert!(*took < Duration::from_millis(1_500), "waited on delivery: {took:?}");
    }
    // the known account still gets its email once the provider finishes
    app.outbox.wait_for(&known).await?;
    Ok(())
}

#[tokio::test]
async fn reset_limit_uses_peer_address_without_proxy_headers() -> Result<()> {
    let Some(app) = test_app().await? else {
        return Ok(());
    };
    let bytes = Uuid::new_v4().into_bytes();
    let busy: SocketAddr = format!("198.18.{}.{}:40000", bytes[0], bytes[1]).parse()?;
    let quiet: SocketAddr = format!("198.19.{}.{}:40000", bytes[2], bytes[3]).parse()?;
    for _ in 0..10 {
        sqlx::query("INSERT INTO password_reset_attempts (email, ip_address) VALUES ($1, $2)")
            .bind(unique_email())
            .bind(busy.ip().to_string())
            .execute(&app.pool)
            .await
            .context("seed attempt")?;
    }

    let csrf = "f".repeat(43);
    let mut statuses = Vec::new();
    for peer in [busy, quiet] {
        let stamp = app
            .state
            .stamper()
            .mint_at(chrono::Utc::now().timestamp() - 10);
        let response = app
            .router
            .clone()
            .layer(MockConnectInfo(peer))
            .oneshot(form_post(
                "/password/forgot",
                &format!("csrf_token={csrf}"),
                format!(
                    "email={}&render_stamp={stamp}&csrf_token={csrf}",
                    encode(&unique_email())
                ),
            )?)
            .await?;
        statuses.push(response.status());
    }
    assert_eq!(statuses, [StatusCode::TOO_MANY_REQUESTS, StatusCode::OK]);
    Ok(())
}
