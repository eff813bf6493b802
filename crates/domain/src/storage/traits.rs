use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{AlertRecord, NewAlert, NewTransaction, TransactionQuery, TransactionRecord};

/// Common result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    pub fn from_source(err: impl std::fmt::Display) -> Self {
        Self::Database(err.to_string())
    }
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Persists a processed transaction. Re-inserting a known hash is a no-op.
    async fn insert_transaction(&self, transaction: NewTransaction) -> StorageResult<()>;
    /// Lists transactions newest first.
    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> StorageResult<Vec<TransactionRecord>>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<()>;
    /// Lists alerts created at or after `since`, newest first.
    async fn list_alerts_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertRecord>>;
}
