//! Command-line argument dispatch.
//!
//! Maps validated CLI arguments to the action the binary executes.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, cache, email};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let cache_backend = cache::parse(matches)?;
    let email_opts = email::Options::parse(matches);

    Ok(Action::Server(Args {
        port,
        dsn,
        init_schema: matches.get_flag("init-schema"),
        cache_backend,
        token_secret: auth_opts.token_secret,
        token_issuer: auth_opts.token_issuer,
        token_audience: auth_opts.token_audience,
        production: auth_opts.production,
        frontend_base_url: auth_opts.frontend_base_url,
        sweep_interval_seconds: auth_opts.sweep_interval_seconds,
        email_api_url: email_opts.api_url,
        email_api_key: email_opts.api_key,
        email_from: email_opts.from,
    }))
}
