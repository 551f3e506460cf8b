use anyhow::{anyhow, Context, Result};
use clap::{Arg, ArgMatches, Command};

pub const ARG_CACHE_URL: &str = "cache-url";

/// Where refresh tokens and the access-token blacklist live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis(String),
    /// Process-local store, for development only: state is lost on restart and
    /// not shared between replicas.
    Memory,
}

impl CacheBackend {
    /// # Errors
    /// Returns an error if the URL scheme is not `redis`, `rediss` or `memory`.
    pub fn parse(url: &str) -> Result<Self> {
        match url.split_once("://").map(|(scheme, _)| scheme) {
            Some("redis" | "rediss") => Ok(Self::Redis(url.to_string())),
            Some("memory") => Ok(Self::Memory),
            _ => Err(anyhow!("unsupported cache url: {url}")),
        }
    }
}

/// # Errors
/// Returns an error if the cache URL is missing or unsupported.
pub fn parse(matches: &ArgMatches) -> Result<CacheBackend> {
    let url = matches
        .get_one::<String>(ARG_CACHE_URL)
        .context("missing required argument: --cache-url")?;
    CacheBackend::parse(url)
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_CACHE_URL)
            .long(ARG_CACHE_URL)
            .help("Token cache URL, example: redis://:password@localhost:6379/0 or memory://")
            .env("WARDEN_CACHE_URL")
            .hide_env_values(true)
            .default_value("redis://127.0.0.1:6379/0"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_backends() {
        assert!(matches!(
            CacheBackend::parse("redis://localhost:6379/0"),
            Ok(CacheBackend::Redis(_))
        ));
        assert!(matches!(
            CacheBackend::parse("rediss://cache.tld:6380/1"),
            Ok(CacheBackend::Redis(_))
        ));
        assert!(matches!(
            CacheBackend::parse("memory://"),
            Ok(CacheBackend::Memory)
        ));
        assert!(CacheBackend::parse("memcached://localhost").is_err());
        assert!(CacheBackend::parse("localhost:6379").is_err());
    }
}
