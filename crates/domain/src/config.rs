//! Environment-driven configuration structures shared by all binaries.

use std::{env, time::Duration};

use thiserror::Error;

use crate::model::{AddressFormatError, WatchedAddress};

const DEFAULT_HIGH_VALUE_THRESHOLD: f64 = 100.0;
const DEFAULT_DEDUP_CAPACITY: u64 = 100_000;
const DEFAULT_DEDUP_TTL_SECS: u64 = 86_400;
const DEFAULT_MAX_IN_FLIGHT: usize = 256;
/// Upper bound accepted for `MAX_IN_FLIGHT`.
pub const MAX_IN_FLIGHT_LIMIT: u64 = 65_536;
/// Upper bound accepted for `DEDUP_CACHE_TTL_SECS` (one year).
pub const MAX_DEDUP_TTL_SECS: u64 = 365 * 86_400;

/// API-specific configuration (HTTP bind + shared database) so the HTTP
/// surface does not depend on monitor-only environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
}

impl ApiConfig {
    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }
}

/// Everything the ingestion worker needs, read once at startup and immutable
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    database_url: String,
    rpc_endpoints: Vec<String>,
    watched_addresses: Vec<WatchedAddress>,
    high_value_threshold: f64,
    dedup_capacity: u64,
    dedup_ttl: Duration,
    max_in_flight: usize,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// required process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let database_url = get_required_var("DATABASE_URL")?;
        let rpc_endpoints = split_list(&get_required_var("RPC_ENDPOINTS")?);
        if rpc_endpoints.is_empty() {
            return Err(ConfigError::MissingVar {
                key: "RPC_ENDPOINTS",
            });
        }

        let mut watched_addresses = Vec::new();
        for key in ["WATCHED_TOKENS", "WATCHED_CONTRACTS"] {
            let Some(raw) = get_optional_var(key) else {
                continue;
            };
            for item in split_list(&raw) {
                let address = WatchedAddress::parse(&item).map_err(|source| {
                    ConfigError::InvalidAddress {
                        key,
                        value: item.clone(),
                        source,
                    }
                })?;
                if !watched_addresses.contains(&address) {
                    watched_addresses.push(address);
                }
            }
        }
        if watched_addresses.is_empty() {
            return Err(ConfigError::MissingVar {
                key: "WATCHED_TOKENS",
            });
        }

        let high_value_threshold = match get_optional_var("HIGH_VALUE_THRESHOLD") {
            Some(raw) => parse_threshold("HIGH_VALUE_THRESHOLD", &raw)?,
            None => DEFAULT_HIGH_VALUE_THRESHOLD,
        };
        let dedup_capacity =
            parse_optional_int("DEDUP_CACHE_CAPACITY")?.unwrap_or(DEFAULT_DEDUP_CAPACITY);
        let dedup_ttl = Duration::from_secs(
            parse_bounded_int("DEDUP_CACHE_TTL_SECS", MAX_DEDUP_TTL_SECS)?
                .unwrap_or(DEFAULT_DEDUP_TTL_SECS),
        );
        let max_in_flight = match parse_bounded_int("MAX_IN_FLIGHT", MAX_IN_FLIGHT_LIMIT)? {
            Some(value) => usize::try_from(value).map_err(|_| ConfigError::OutOfRange {
                key: "MAX_IN_FLIGHT",
                value,
                max: MAX_IN_FLIGHT_LIMIT,
            })?,
            None => DEFAULT_MAX_IN_FLIGHT,
        }
        .max(1);

        Ok(Self {
            database_url,
            rpc_endpoints,
            watched_addresses,
            high_value_threshold,
            dedup_capacity,
            dedup_ttl,
            max_in_flight,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn rpc_endpoints(&self) -> &[String] {
        &self.rpc_endpoints
    }

    pub fn watched_addresses(&self) -> &[WatchedAddress] {
        &self.watched_addresses
    }

    pub fn high_value_threshold(&self) -> f64 {
        self.high_value_threshold
    }

    pub fn dedup_capacity(&self) -> u64 {
        self.dedup_capacity
    }

    pub fn dedup_ttl(&self) -> Duration {
        self.dedup_ttl
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_threshold(key: &'static str, raw: &str) -> Result<f64, ConfigError> {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => Ok(value),
        _ => Err(ConfigError::InvalidFloat {
            key,
            value: raw.to_string(),
        }),
    }
}

fn parse_optional_int(key: &'static str) -> Result<Option<u64>, ConfigError> {
    get_optional_var(key)
        .map(|raw| {
            raw.parse()
                .map_err(|source| ConfigError::InvalidNumber { key, source })
        })
        .transpose()
}

fn parse_bounded_int(key: &'static str, max: u64) -> Result<Option<u64>, ConfigError> {
    match parse_optional_int(key)? {
        Some(value) if value > max => Err(ConfigError::OutOfRange { key, value, max }),
        other => Ok(other),
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("LEDGER_WATCH_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("`{key}` is {value}, above the maximum of {max}")]
    OutOfRange {
        key: &'static str,
        value: u64,
        max: u64,
    },
    #[error("invalid non-negative decimal in `{key}`: `{value}`")]
    InvalidFloat { key: &'static str, value: String },
    #[error("invalid address `{value}` in `{key}`: {source}")]
    InvalidAddress {
        key: &'static str,
        value: String,
        #[source]
        source: AddressFormatError,
    },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
