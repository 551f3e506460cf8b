use crate::{
    api::{
        self,
        email::{EmailSender, HttpEmailSender, LogEmailSender},
        handlers::auth::{
            AuthConfig, AuthState, MemoryTokenStore, RedisTokenStore, TokenConfig, TokenStore,
        },
    },
    cli::{commands::cache::CacheBackend, telemetry},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub init_schema: bool,
    pub cache_backend: CacheBackend,
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_audience: String,
    pub production: bool,
    pub frontend_base_url: String,
    pub sweep_interval_seconds: u64,
    pub email_api_url: String,
    pub email_api_key: Option<String>,
    pub email_from: String,
}

async fn token_store(backend: &CacheBackend) -> Result<Arc<dyn TokenStore>> {
    match backend {
        CacheBackend::Redis(url) => {
            let store = RedisTokenStore::connect(url)
                .await
                .context("Failed to connect to token cache")?;
            info!("Token cache: redis");
            Ok(Arc::new(store))
        }
        CacheBackend::Memory => {
            warn!("Token cache: in-process memory, revocations are not shared between instances");
            Ok(Arc::new(MemoryTokenStore::new()))
        }
    }
}

fn email_sender(args: &Args) -> Result<Arc<dyn EmailSender>> {
    match &args.email_api_key {
        Some(key) => Ok(Arc::new(HttpEmailSender::new(
            args.email_api_url.clone(),
            SecretString::from(key.clone()),
            args.email_from.clone(),
        )?)),
        None => {
            warn!("No email API key configured, reset links will only be logged");
            Ok(Arc::new(LogEmailSender))
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the token cache or database is unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store = token_store(&args.cache_backend).await?;
    let email = email_sender(&args)?;

    let token_config = TokenConfig::new(args.token_secret)
        .with_issuer(args.token_issuer)
        .with_audience(args.token_audience);

    let auth_config = AuthConfig::new(args.frontend_base_url).with_production(args.production);
    let auth_state = Arc::new(AuthState::new(auth_config, &token_config, store, email));

    let result = api::new(
        args.port,
        args.dsn,
        args.init_schema,
        auth_state,
        Duration::from_secs(args.sweep_interval_seconds),
    )
    .await;

    telemetry::shutdown_tracer();

    result
}
