use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{anyhow, Context};
use tracing::{info, warn};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct MomoConfig {
    pub api_url: String,
    pub api_key: String,
    pub user_id: String,
    pub api_secret: String,
    pub target_environment: String,
    pub currency: String,
    pub country_code: String,
}

#[derive(Clone, Debug)]
pub struct PaymentTiming {
    /// Cadence the checkout page is told to poll at.
    pub poll_interval: Duration,
    /// How long the checkout page keeps polling before it gives up.
    pub client_timeout: Duration,
    /// Age after which the server resolves a still-pending payment.
    pub deadline: Duration,
    pub sweep_interval: Duration,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    pub relay_url: Option<String>,
    pub relay_api_key: String,
    pub from_name: String,
    pub from_email: String,
    pub app_url: String,
    pub dispatch_interval: Duration,
    pub max_attempts: i32,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub nats_url: Option<String>,
    pub momo: MomoConfig,
    pub payments: PaymentTiming,
    pub mail: MailConfig,
    pub session_ttl: chrono::Duration,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let backend: StoreBackend = try_load("STORE_BACKEND", "postgres")?;
        let database_url = optional("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(anyhow!("DATABASE_URL is required for the postgres backend"));
        }

        Ok(Self {
            port: try_load("PORT", "8083")?,
            backend,
            database_url,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "10")?,
            nats_url: optional("NATS_URL"),
            momo: MomoConfig {
                api_url: try_load("MTN_MOMO_API_URL", "https://sandbox.momodeveloper.mtn.com")?,
                api_key: secret("MTN_MOMO_API_KEY"),
                user_id: secret("MTN_MOMO_USER_ID"),
                api_secret: secret("MTN_MOMO_API_SECRET"),
                target_environment: try_load("MTN_MOMO_TARGET_ENVIRONMENT", "sandbox")?,
                currency: try_load("MTN_MOMO_CURRENCY", "RWF")?,
                country_code: try_load("MOMO_COUNTRY_CODE", "250")?,
            },
            payments: PaymentTiming {
                poll_interval: secs("PAYMENT_POLL_INTERVAL_SECS", "5")?,
                client_timeout: secs("PAYMENT_CLIENT_TIMEOUT_SECS", "120")?,
                deadline: secs("PAYMENT_DEADLINE_SECS", "600")?,
                sweep_interval: secs("PAYMENT_SWEEP_INTERVAL_SECS", "60")?,
            },
            mail: MailConfig {
                relay_url: optional("MAIL_RELAY_URL"),
                relay_api_key: secret("MAIL_RELAY_API_KEY"),
                from_name: try_load("MAIL_FROM_NAME", "MTN Store")?,
                from_email: try_load("MAIL_FROM_EMAIL", "no-reply@localhost")?,
                app_url: try_load("APP_URL", "http://localhost:3000")?,
                dispatch_interval: secs("MAIL_DISPATCH_INTERVAL_SECS", "10")?,
                max_attempts: try_load("MAIL_MAX_ATTEMPTS", "5")?,
            },
            session_ttl: chrono::Duration::hours(try_load("SESSION_TTL_HOURS", "168")?),
            admin_email: optional("ADMIN_EMAIL"),
            admin_password: optional("ADMIN_PASSWORD"),
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> anyhow::Result<T>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    raw.parse().map_err(|e| anyhow!("Invalid {key} value: {e}"))
}

fn secs(key: &str, default: &str) -> anyhow::Result<Duration> {
    let secs: u64 = try_load(key, default)?;
    Ok(Duration::from_secs(secs))
}

/// Secrets are never echoed, even as defaults.
fn secret(key: &str) -> String {
    optional(key).unwrap_or_else(|| {
        warn!("{key} not set");
        String::new()
    })
}

impl MomoConfig {
    pub fn check(&self) -> anyhow::Result<()> {
        for (key, value) in [("MTN_MOMO_API_KEY", &self.api_key), ("MTN_MOMO_USER_ID", &self.user_id), ("MTN_MOMO_API_SECRET", &self.api_secret)] {
            if value.is_empty() {
                warn!("{key} is empty, payment calls will fail");
            }
        }
        url_ok(&self.api_url).context("MTN_MOMO_API_URL")
    }
}

fn url_ok(url: &str) -> anyhow::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(anyhow!("expected an http(s) URL, got {url}"))
    }
}
