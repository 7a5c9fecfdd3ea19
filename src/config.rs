use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::domain::DEFAULT_EXPIRY_MINUTES;
use crate::gateway::SignatureAlgorithms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
        }
    }
}

/// Merchant account and transport settings for the payment gateway.
#[derive(Debug)]
pub struct GatewayConfig {
    pub base_url: String,
    pub merchant_id: String,
    pub api_key: SecretString,
    pub algorithms: SignatureAlgorithms,
    pub callback_url: String,
    pub return_url: String,
    pub timeout_secs: u64,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

#[derive(Debug)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub admin_api_key: SecretString,
    pub gateway: GatewayConfig,
    pub transaction_expiry_minutes: i64,
    pub proof_dir: PathBuf,
    pub sweep_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` uses the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .with_context(|| format!("{} must be set", key))
        };
        let or_default = |key: &str, default: &str| -> String {
            lookup(key).unwrap_or_else(|| default.to_string())
        };

        let gateway = GatewayConfig {
            base_url: validated_url("GATEWAY_BASE_URL", required("GATEWAY_BASE_URL")?)?,
            merchant_id: required("GATEWAY_MERCHANT_ID")?,
            api_key: SecretString::new(required("GATEWAY_SECRET")?),
            algorithms: or_default("GATEWAY_SIGNATURE_ALGORITHMS", "md5,sha256,md5")
                .parse()
                .map_err(|e: String| anyhow::anyhow!("GATEWAY_SIGNATURE_ALGORITHMS: {}", e))?,
            callback_url: validated_url("GATEWAY_CALLBACK_URL", required("GATEWAY_CALLBACK_URL")?)?,
            return_url: validated_url("GATEWAY_RETURN_URL", required("GATEWAY_RETURN_URL")?)?,
            timeout_secs: parse("GATEWAY_TIMEOUT_SECS", or_default("GATEWAY_TIMEOUT_SECS", "30"))?,
            failure_threshold: parse(
                "GATEWAY_FAILURE_THRESHOLD",
                or_default("GATEWAY_FAILURE_THRESHOLD", "3"),
            )?,
            reset_timeout_secs: parse(
                "GATEWAY_RESET_TIMEOUT_SECS",
                or_default("GATEWAY_RESET_TIMEOUT_SECS", "60"),
            )?,
        };

        let transaction_expiry_minutes: i64 = parse(
            "TRANSACTION_EXPIRY_MINUTES",
            or_default(
                "TRANSACTION_EXPIRY_MINUTES",
                &DEFAULT_EXPIRY_MINUTES.to_string(),
            ),
        )?;
        if transaction_expiry_minutes <= 0 {
            anyhow::bail!("TRANSACTION_EXPIRY_MINUTES must be positive");
        }

        Ok(Config {
            server_port: parse("SERVER_PORT", or_default("SERVER_PORT", "3000"))?,
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse(
                "DATABASE_MAX_CONNECTIONS",
                or_default("DATABASE_MAX_CONNECTIONS", "5"),
            )?,
            admin_api_key: SecretString::new(required("ADMIN_API_KEY")?),
            gateway,
            transaction_expiry_minutes,
            proof_dir: PathBuf::from(or_default("PROOF_DIR", "./storage")),
            sweep_interval_secs: parse(
                "SWEEP_INTERVAL_SECS",
                or_default("SWEEP_INTERVAL_SECS", "60"),
            )?,
            log_format: or_default("LOG_FORMAT", "text").parse()?,
        })
    }
}

fn parse<T>(key: &str, raw: String) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{} has an invalid value '{}'", key, raw))
}

fn validated_url(key: &str, raw: String) -> Result<String> {
    let parsed = url::Url::parse(&raw).with_context(|| format!("{} is not a valid URL", key))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        anyhow::bail!("{} must use http or https", key);
    }
    Ok(raw)
}
