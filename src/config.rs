use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Outbound SMTP settings used to deliver confirmation links.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub server: String,
    pub port: u16,
    pub use_secure_transport: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    pub default_sender: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_secs: u64,
    /// Process-wide secret for signing confirmation tokens.
    pub secret_key: String,
    /// Public origin, e.g. `https://board.example.com`.
    pub base_url: String,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| lookup(key).with_context(|| format!("{key} must be set"));

        let secret_key = required("SECRET_KEY")?;
        let jwt = JwtConfig {
            secret: lookup("JWT_SECRET").unwrap_or_else(|| secret_key.clone()),
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "postboard".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "postboard-users".into()),
            ttl_minutes: parse_or(&lookup, "JWT_TTL_MINUTES", 60)?,
        };

        let use_secure_transport = lookup("MAIL_USE_SSL")
            .or_else(|| lookup("MAIL_USE_TLS"))
            .map(|v| is_truthy(&v))
            .unwrap_or(true);
        let mail = MailConfig {
            server: required("MAIL_SERVER")?,
            port: parse_or(&lookup, "MAIL_PORT", 587)?,
            use_secure_transport,
            username: lookup("MAIL_USERNAME").filter(|v| !v.is_empty()),
            password: lookup("MAIL_PASSWORD").filter(|v| !v.is_empty()),
            default_sender: required("MAIL_DEFAULT_SENDER")?,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            db_timeout_secs: parse_or(&lookup, "DB_TIMEOUT", 10)?,
            secret_key,
            base_url: required("BASE_URL")?,
            jwt,
            mail,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> anyhow::Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        None => Ok(default),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}
