use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::warn;

use parley_gateway::identity::TokenConfig;
use parley_gateway::session::{DEFAULT_BUFFER, DEFAULT_POLL_INTERVAL, SessionConfig};

const DEFAULT_SECRET: &str = "dev-secret-change-me";

/// One year.
const MAX_TOKEN_LIFETIME_HOURS: i64 = 8760;

/// Secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &[DEFAULT_SECRET, "changeme", "secret", ""];

/// Server settings read from `PARLEY_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub tokens: TokenConfig,
    pub session: SessionConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading from an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = var("PARLEY_JWT_SECRET", DEFAULT_SECRET);
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            warn!("PARLEY_JWT_SECRET is unset or a placeholder; tokens are forgeable. Set a real secret before deploying.");
        }

        let lifetime_hours: i64 = parse(&lookup, "PARLEY_TOKEN_LIFETIME_HOURS", 24)?;
        let poll_ms: u64 = parse(&lookup, "PARLEY_STREAM_POLL_MS", DEFAULT_POLL_INTERVAL.as_millis() as u64)?;
        let buffer: usize = parse(&lookup, "PARLEY_STREAM_BUFFER", DEFAULT_BUFFER)?;
        if poll_ms == 0 {
            anyhow::bail!("PARLEY_STREAM_POLL_MS must be greater than zero");
        }
        if !(1..=MAX_TOKEN_LIFETIME_HOURS).contains(&lifetime_hours) {
            anyhow::bail!(
                "PARLEY_TOKEN_LIFETIME_HOURS must be between 1 and {}, got {}",
                MAX_TOKEN_LIFETIME_HOURS,
                lifetime_hours
            );
        }
        let lifetime = chrono::TimeDelta::try_hours(lifetime_hours)
            .context("PARLEY_TOKEN_LIFETIME_HOURS is out of range")?;

        Ok(Self {
            host: var("PARLEY_HOST", "0.0.0.0"),
            port: parse(&lookup, "PARLEY_PORT", 50051)?,
            db_path: PathBuf::from(var("PARLEY_DB_PATH", "parley.db")),
            tokens: TokenConfig {
                secret: jwt_secret,
                lifetime,
            },
            session: SessionConfig {
                poll_interval: Duration::from_millis(poll_ms),
                buffer: buffer.max(1),
            },
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", key, raw)),
        None => Ok(default),
    }
}
