//! Ledger RPC seam: the traits the pool and pipeline are written against and
//! the WebSocket-backed implementation used in production.

use async_trait::async_trait;
use ethers::types::{Address, H256};
use futures::stream::BoxStream;
use thiserror::Error;

mod types;
mod ws_client;

pub use types::{LogEvent, TransactionDetail, TxLookup};
pub use ws_client::{EthersClient, EthersConnector};

const TOO_MANY_REQUESTS: &str = "Too Many Requests";
const RATE_LIMIT_EXCEEDED: &str = "rate limit exceeded";

/// Stream of log events for one subscription. An `Err` item or the end of the
/// stream means the subscription is gone.
pub type LogStream = BoxStream<'static, Result<LogEvent, LedgerError>>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("failed to dial {url}: {reason}")]
    Dial { url: String, reason: String },
    #[error("rate limited by endpoint: {0}")]
    RateLimited(String),
    #[error("subscription failed: {0}")]
    Subscription(String),
    #[error("rpc request failed: {0}")]
    Request(String),
    #[error("sender recovery failed: {0}")]
    Sender(String),
}

impl LedgerError {
    /// Classifies a request failure by its message. Throttling is recognised
    /// by a `Too Many Requests` fragment or the exact `rate limit exceeded`
    /// message; everything else is permanent.
    pub fn request(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_rate_limit_message(&message) {
            Self::RateLimited(message)
        } else {
            Self::Request(message)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

pub fn is_rate_limit_message(message: &str) -> bool {
    message.contains(TOO_MANY_REQUESTS) || message == RATE_LIMIT_EXCEEDED
}

/// One live connection to a ledger node.
#[async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Cheap liveness query (current chain height).
    async fn block_number(&self) -> Result<u64, LedgerError>;

    async fn transaction(&self, hash: H256) -> Result<TxLookup, LedgerError>;

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream, LedgerError>;
}

/// Dials endpoint URLs into clients.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Client: LedgerClient;

    async fn connect(&self, url: &str) -> Result<Self::Client, LedgerError>;
}
