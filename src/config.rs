use std::{env, fmt::Display, net::SocketAddr, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Runtime settings read from the environment (and `.env` outside tests).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    /// Origin used to build links in outgoing mail.
    pub public_url: String,
    /// When unset, mail is written to the log instead of being relayed.
    pub mail_webhook_url: Option<String>,
    pub session_idle_minutes: i64,
    pub secure_cookies: bool,
    pub otp_ttl_minutes: i64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database_url: "sqlite://murmur.db?mode=rwc".to_owned(),
            public_url: "http://localhost:8080".to_owned(),
            mail_webhook_url: None,
            session_idle_minutes: 60,
            secure_cookies: false,
            otp_ttl_minutes: 60,
            log_level: "info".to_owned(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenv::dotenv().ok();
        }

        let defaults = Self::default();
        Ok(Self {
            bind_address: parsed("BIND_ADDRESS", defaults.bind_address)?,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            public_url: env::var("PUBLIC_URL")
                .map(|url| url.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.public_url),
            mail_webhook_url: env::var("MAIL_WEBHOOK_URL").ok().filter(|url| !url.is_empty()),
            session_idle_minutes: positive("SESSION_IDLE_MINUTES", defaults.session_idle_minutes)?,
            secure_cookies: parsed("SECURE_COOKIES", defaults.secure_cookies)?,
            otp_ttl_minutes: positive("OTP_TTL_MINUTES", defaults.otp_ttl_minutes)?,
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        })
    }

    /// Where confirmation and magic links land.
    pub fn callback_url(&self) -> String {
        format!("{}/auth/callback", self.public_url)
    }
}

fn parsed<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|err: T::Err| ConfigError::Invalid {
            name,
            reason: err.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn positive(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    let value = parsed(name, default)?;
    if value <= 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("expected a positive number of minutes, got {value}"),
        });
    }
    Ok(value)
}
