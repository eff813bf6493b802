//! Records produced by the ingestion pipeline and read back by the query
//! service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Number of hex characters in a 20-byte account address.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Errors emitted when configured addresses fail validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("address must start with `0x`")]
    MissingPrefix,
    #[error("address must be exactly {ADDRESS_HEX_LENGTH} hex characters after `0x`")]
    WrongLength,
    #[error("address contains non-hex characters")]
    NonHex,
}

/// Validates the `0x` + 40 hex-character address contract.
pub fn validate_address(address: &str) -> Result<(), AddressFormatError> {
    let Some(body) = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
    else {
        return Err(AddressFormatError::MissingPrefix);
    };

    if body.len() != ADDRESS_HEX_LENGTH {
        return Err(AddressFormatError::WrongLength);
    }

    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AddressFormatError::NonHex);
    }

    Ok(())
}

/// One entry of the watched address set, stored in canonical lowercase form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WatchedAddress(String);

impl WatchedAddress {
    pub fn parse(address: &str) -> Result<Self, AddressFormatError> {
        let trimmed = address.trim();
        validate_address(trimmed)?;
        let mut owned = trimmed.to_owned();
        owned.make_ascii_lowercase();
        Ok(Self(owned))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Classification tag attached to alert-worthy transactions.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
pub enum AlertType {
    HighValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    /// Transferred value in decimal ETH units.
    pub value: f64,
    pub is_high_value: bool,
    /// Reserved; nothing sets it yet.
    pub is_suspicious: bool,
    pub alert_type: Option<AlertType>,
    /// Time the pipeline processed the transaction, not chain inclusion time.
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: i64,
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: f64,
    pub is_high_value: bool,
    pub is_suspicious: bool,
    pub alert_type: Option<AlertType>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlert {
    pub alert_type: AlertType,
    pub description: String,
    pub tx_hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub alert_type: AlertType,
    pub description: String,
    pub tx_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Pagination window for recency-ordered transaction listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    pub limit: u64,
    pub skip: u64,
}

impl Default for TransactionQuery {
    fn default() -> Self {
        Self {
            limit: Self::DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

impl TransactionQuery {
    pub const DEFAULT_LIMIT: u64 = 100;
    pub const MAX_LIMIT: u64 = 1_000;

    pub fn new(limit: u64, skip: u64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            skip,
        }
    }
}
