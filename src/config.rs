use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::{bail, Context};
use url::Url;

pub const GOOGLE_DISCOVERY_URL: &str = "https://accounts.google.com/.well-known/openid-configuration";

/// Minimum length accepted for the cookie signing secret.
pub const MIN_SESSION_SECRET_LEN: usize = 64;

const SESSION_TTL_RANGE: RangeInclusive<u64> = 1..=60 * 24 * 365;
const CLEANUP_SECS_RANGE: RangeInclusive<u64> = 1..=60 * 60 * 24;
const HTTP_TIMEOUT_RANGE: RangeInclusive<u64> = 1..=120;
const DISCOVERY_TTL_RANGE: RangeInclusive<u64> = 0..=60 * 60 * 24 * 7;

#[derive(Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: String,
    pub discovery_url: Url,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("discovery_url", &self.discovery_url.as_str())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub google: ProviderConfig,
    pub http_timeout: Duration,
    pub discovery_ttl: Duration,
}

#[derive(Clone)]
pub struct SessionConfig {
    pub secret: Vec<u8>,
    pub ttl_minutes: i64,
    pub secure_cookie: bool,
    /// Period of the expired-session sweep.
    pub cleanup_interval: Duration,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("secret", &"<redacted>")
            .field("ttl_minutes", &self.ttl_minutes)
            .field("secure_cookie", &self.secure_cookie)
            .field("cleanup_interval", &self.cleanup_interval)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub public_base_url: Url,
    pub session: SessionConfig,
    pub oauth: OAuthConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Required secrets are checked
    /// here so a misconfigured deployment fails at startup.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> anyhow::Result<String> {
            match lookup(key) {
                Some(v) if !v.trim().is_empty() => Ok(v),
                _ => bail!("{key} must be set"),
            }
        };
        let parsed = |key: &str, default: u64, range: RangeInclusive<u64>| -> anyhow::Result<u64> {
            let value = match lookup(key) {
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer"))?,
                None => default,
            };
            if !range.contains(&value) {
                bail!("{key} must be between {} and {}", range.start(), range.end());
            }
            Ok(value)
        };

        let database_url = required("DATABASE_URL")?;
        if !(database_url.starts_with("postgres://") || database_url.starts_with("postgresql://")) {
            bail!("DATABASE_URL must be a postgres:// or postgresql:// url");
        }

        let secret = required("SESSION_SECRET")?;
        if secret.len() < MIN_SESSION_SECRET_LEN {
            bail!("SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes");
        }

        let google = ProviderConfig {
            client_id: required("GOOGLE_CLIENT_ID")?,
            client_secret: required("GOOGLE_CLIENT_SECRET")?,
            discovery_url: lookup("GOOGLE_DISCOVERY_URL")
                .unwrap_or_else(|| GOOGLE_DISCOVERY_URL.into())
                .parse()
                .context("GOOGLE_DISCOVERY_URL is not a valid url")?,
        };

        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8080".into())
            .parse()
            .context("PUBLIC_BASE_URL is not a valid url")?;

        let secure_cookie = lookup("SESSION_COOKIE_SECURE")
            .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            database_url,
            public_base_url,
            session: SessionConfig {
                secret: secret.into_bytes(),
                ttl_minutes: i64::try_from(parsed("SESSION_TTL_MINUTES", 60 * 24 * 7, SESSION_TTL_RANGE)?)?,
                secure_cookie,
                cleanup_interval: Duration::from_secs(parsed(
                    "SESSION_CLEANUP_INTERVAL_SECS",
                    60,
                    CLEANUP_SECS_RANGE,
                )?),
            },
            oauth: OAuthConfig {
                google,
                http_timeout: Duration::from_secs(parsed(
                    "OAUTH_HTTP_TIMEOUT_SECS",
                    5,
                    HTTP_TIMEOUT_RANGE,
                )?),
                discovery_ttl: Duration::from_secs(parsed(
                    "OAUTH_DISCOVERY_TTL_SECS",
                    3600,
                    DISCOVERY_TTL_RANGE,
                )?),
            },
        })
    }

    /// Absolute callback url registered with the provider.
    pub fn callback_url(&self, provider: &str) -> anyhow::Result<Url> {
        self.public_base_url
            .join(&format!("/oauth/{provider}/callback"))
            .context("build oauth callback url")
    }
}
