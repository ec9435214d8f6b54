use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::sweeper::SweepSettings;

pub const DEFAULT_PORT: u16 = 5000;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidNumber { key: &'static str, value: String },
    #[error("inactivity timeout ({timeout:?}) must be longer than the sweep interval ({interval:?})")]
    TimeoutTooShort { timeout: Duration, interval: Duration },
    #[error("sweep interval must be greater than zero")]
    ZeroInterval,
    #[error("TLS_CERT_PATH and TLS_KEY_PATH must be set together")]
    IncompleteTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub sweep: SweepSettings,
    pub tls: Option<TlsConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            sweep: SweepSettings::default(),
            tls: None,
        }
    }
}

impl Config {
    /// Reads `PORT`, `SWEEP_INTERVAL_SECS`, `INACTIVITY_TIMEOUT_SECS`,
    /// `TLS_CERT_PATH` and `TLS_KEY_PATH`; unset keys keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(port) = lookup("PORT") {
            config.port = parse_number("PORT", &port)?;
        }
        if let Some(secs) = lookup("SWEEP_INTERVAL_SECS") {
            config.sweep.interval = Duration::from_secs(parse_number("SWEEP_INTERVAL_SECS", &secs)?);
        }
        if let Some(secs) = lookup("INACTIVITY_TIMEOUT_SECS") {
            config.sweep.timeout =
                Duration::from_secs(parse_number("INACTIVITY_TIMEOUT_SECS", &secs)?);
        }

        config.tls = match (lookup("TLS_CERT_PATH"), lookup("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        if config.sweep.interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if config.sweep.timeout <= config.sweep.interval {
            return Err(ConfigError::TimeoutTooShort {
                timeout: config.sweep.timeout,
                interval: config.sweep.interval,
            });
        }

        Ok(config)
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}
