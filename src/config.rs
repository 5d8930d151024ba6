use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

/// Longest accepted token lifetime (ten years); keeps expiry arithmetic in range.
pub const MAX_TTL_MINUTES: i64 = 60 * 24 * 365 * 10;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

/// What login does with accounts whose email is not verified yet.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnverifiedPolicy {
    /// Full-scope tokens, same as verified accounts.
    Allow,
    /// Limited-scope tokens; routes that need a verified account refuse them.
    #[default]
    Restricted,
    /// Login is refused.
    Reject,
}

impl FromStr for UnverifiedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "restricted" => Ok(Self::Restricted),
            "reject" => Ok(Self::Reject),
            other => anyhow::bail!("unknown unverified policy: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthPolicy {
    pub unverified: UnverifiedPolicy,
    /// Issue a new refresh token on every refresh call.
    pub rotate_refresh_tokens: bool,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            unverified: UnverifiedPolicy::Restricted,
            rotate_refresh_tokens: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub auth: AuthPolicy,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "teamflow".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "teamflow-users".into()),
            ttl_minutes: ttl_from_env("JWT_TTL_MINUTES", 15)?,
            refresh_ttl_minutes: ttl_from_env("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14)?,
        };
        let auth = AuthPolicy {
            unverified: match std::env::var("AUTH_UNVERIFIED_POLICY") {
                Ok(v) => v.parse()?,
                Err(_) => UnverifiedPolicy::default(),
            },
            rotate_refresh_tokens: std::env::var("AUTH_ROTATE_REFRESH")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };
        let cors_origin = std::env::var("CORS_ORIGIN").ok().filter(|v| !v.is_empty());
        Ok(Self {
            database_url,
            jwt,
            auth,
            cors_origin,
        })
    }
}

fn ttl_from_env(var: &str, default: i64) -> anyhow::Result<i64> {
    let minutes = std::env::var(var)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default);
    check_ttl(var, minutes)
}

fn check_ttl(var: &str, minutes: i64) -> anyhow::Result<i64> {
    if !(1..=MAX_TTL_MINUTES).contains(&minutes) {
        anyhow::bail!("{var} must be between 1 and {MAX_TTL_MINUTES} minutes, got {minutes}");
    }
    Ok(minutes)
}
