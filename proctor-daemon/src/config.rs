//! Daemon configuration from environment variables.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Errors reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// How to reach the payment gateway.
#[derive(Debug, Clone)]
pub enum GatewaySettings {
    /// Real gateway over HTTPS.
    Http {
        base_url: String,
        secret_key: String,
        webhook_secret: Option<String>,
        timeout: Duration,
    },
    /// In-memory mock; dev mode only.
    Mock,
}

/// Runtime configuration for the daemon.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub currency: String,
    pub gateway: GatewaySettings,
    pub access_code_attempts: u32,
    pub webhook_rate_per_second: u32,
    pub webhook_burst: u32,
}

impl DaemonConfig {
    /// Read configuration from `PROCTOR_*` environment variables,
    /// falling back to defaults where unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let db_path = match std::env::var("PROCTOR_DB_PATH") {
            Ok(path) => PathBuf::from(path),
            Err(_) => default_data_dir().join("proctor.db"),
        };

        let bind_addr = parse_env("PROCTOR_BIND_ADDR", "127.0.0.1:7341")?;
        let currency =
            std::env::var("PROCTOR_CURRENCY").unwrap_or_else(|_| "USD".to_string());

        let gateway = match (
            std::env::var("PROCTOR_GATEWAY_URL"),
            std::env::var("PROCTOR_GATEWAY_SECRET"),
        ) {
            (Ok(base_url), Ok(secret_key)) => GatewaySettings::Http {
                base_url,
                secret_key,
                webhook_secret: std::env::var("PROCTOR_WEBHOOK_SECRET").ok(),
                timeout: Duration::from_secs(parse_env(
                    "PROCTOR_GATEWAY_TIMEOUT_SECS",
                    "15",
                )?),
            },
            _ => GatewaySettings::Mock,
        };

        Ok(Self {
            db_path,
            bind_addr,
            currency,
            gateway,
            access_code_attempts: parse_env("PROCTOR_ACCESS_CODE_ATTEMPTS", "10")?,
            webhook_rate_per_second: parse_env("PROCTOR_WEBHOOK_RATE", "2")?,
            webhook_burst: parse_env("PROCTOR_WEBHOOK_BURST", "10")?,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proctor")
}

fn parse_env<T: std::str::FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError> {
    let raw = std::env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw,
    })
}
