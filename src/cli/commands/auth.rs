use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_TOKEN_SECRET: &str = "token-secret";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_AUDIENCE: &str = "token-audience";
pub const ARG_PRODUCTION: &str = "production";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

/// Shortest accepted HMAC signing secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug)]
pub struct Options {
    pub token_secret: SecretString,
    pub token_issuer: String,
    pub token_audience: String,
    pub production: bool,
    pub frontend_base_url: String,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// Collect auth options from the parsed matches.
    ///
    /// `TLS_ENABLED=true` in the environment also marks the deployment as production.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or too short.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let token_secret = matches
            .get_one::<String>(ARG_TOKEN_SECRET)
            .cloned()
            .context("missing required argument: --token-secret")?;

        if token_secret.len() < MIN_SECRET_LEN {
            return Err(anyhow!(
                "--{ARG_TOKEN_SECRET} must be at least {MIN_SECRET_LEN} bytes"
            ));
        }

        let tls_enabled = std::env::var("TLS_ENABLED")
            .map(|value| value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(Self {
            token_secret: SecretString::from(token_secret),
            token_issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .unwrap_or_else(|| "warden".to_string()),
            token_audience: matches
                .get_one::<String>(ARG_TOKEN_AUDIENCE)
                .cloned()
                .unwrap_or_else(|| "warden-api".to_string()),
            production: matches.get_flag(ARG_PRODUCTION) || tls_enabled,
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:8080".to_string()),
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(3600),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    with_session_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_TOKEN_SECRET)
                .long(ARG_TOKEN_SECRET)
                .help("HMAC secret used to sign access tokens and form stamps")
                .env("WARDEN_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer claim for access tokens")
                .env("WARDEN_TOKEN_ISSUER")
                .default_value("warden"),
        )
        .arg(
            Arg::new(ARG_TOKEN_AUDIENCE)
                .long(ARG_TOKEN_AUDIENCE)
                .help("Audience claim for access tokens")
                .env("WARDEN_TOKEN_AUDIENCE")
                .default_value("warden-api"),
        )
}

fn with_session_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PRODUCTION)
                .long(ARG_PRODUCTION)
                .help("Production deployment: Secure + SameSite=Strict cookies")
                .env("WARDEN_PRODUCTION")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL used for reset links and CORS")
                .env("WARDEN_FRONTEND_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Interval between prune sweeps of expired auth rows")
                .env("WARDEN_SWEEP_INTERVAL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
