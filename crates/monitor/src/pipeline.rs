use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ethers::types::{H256, U256};
use ethers::utils::{format_units, to_checksum};
use ledger_watch_domain::{AlertType, NewAlert, NewTransaction, SeenCache, TransactionStore};
use metrics::counter;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertSendError, AlertSink};
use crate::limiter::RateLimiter;
use crate::rpc::{LedgerClient, LogEvent, TransactionDetail, TxLookup};

/// Retry budget for throttled detail lookups. The n-th retry waits
/// `n * backoff_step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The transaction was already dispatched by an earlier event.
    Duplicate,
    /// Not mined yet; nothing emitted.
    Pending,
    /// Handed to the store, plus the alert queue when high value.
    Emitted { high_value: bool },
    /// Fetch failed for good or ran out of retries.
    Dropped,
    Cancelled,
}

enum Fetch {
    Mined(TransactionDetail),
    Pending,
    Failed,
    Cancelled,
}

/// Per-event pipeline: dedup, throttle, fetch with retry, classify, emit.
/// One instance is shared by every in-flight event.
pub struct EventProcessor<S: ?Sized> {
    storage: Arc<S>,
    seen: Arc<dyn SeenCache>,
    limiter: Arc<RateLimiter>,
    alerts: AlertSink,
    threshold: f64,
    retry: RetryPolicy,
}

impl<S> EventProcessor<S>
where
    S: TransactionStore + ?Sized,
{
    pub fn new(
        storage: Arc<S>,
        seen: Arc<dyn SeenCache>,
        limiter: Arc<RateLimiter>,
        alerts: AlertSink,
        threshold: f64,
    ) -> Self {
        Self {
            storage,
            seen,
            limiter,
            alerts,
            threshold,
            retry: RetryPolicy::default(),
        }
    }

    pub async fn process<L>(
        &self,
        client: &L,
        event: &LogEvent,
        cancel: &CancellationToken,
    ) -> ProcessOutcome
    where
        L: LedgerClient + ?Sized,
    {
        let tx_hash = format!("{:#x}", event.tx_hash);
        if !self.seen.first_sighting(&tx_hash) {
            counter!("monitor_events_total", "result" => "duplicate").increment(1);
            return ProcessOutcome::Duplicate;
        }
        counter!("monitor_events_total", "result" => "dispatched").increment(1);

        let detail = match self.fetch(client, event.tx_hash, cancel).await {
            Fetch::Mined(detail) => detail,
            Fetch::Pending => {
                debug!(%tx_hash, "transaction pending, skipping");
                counter!("monitor_transactions_total", "result" => "pending").increment(1);
                return ProcessOutcome::Pending;
            }
            Fetch::Failed => {
                counter!("monitor_transactions_total", "result" => "dropped").increment(1);
                return ProcessOutcome::Dropped;
            }
            Fetch::Cancelled => return ProcessOutcome::Cancelled,
        };

        let Some(transaction) = self.classify(&detail) else {
            warn!(%tx_hash, value = %detail.value, "value does not normalise, dropping");
            counter!("monitor_transactions_total", "result" => "dropped").increment(1);
            return ProcessOutcome::Dropped;
        };
        self.emit(transaction, cancel).await
    }

    async fn fetch<L>(&self, client: &L, hash: H256, cancel: &CancellationToken) -> Fetch
    where
        L: LedgerClient + ?Sized,
    {
        let mut retries = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Fetch::Cancelled,
                _ = self.limiter.acquire() => {}
            }

            let lookup = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Fetch::Cancelled,
                lookup = client.transaction(hash) => lookup,
            };

            match lookup {
                Ok(TxLookup::Mined(detail)) => return Fetch::Mined(detail),
                Ok(TxLookup::Pending) => return Fetch::Pending,
                Err(err) if err.is_rate_limited() && retries < self.retry.max_retries => {
                    retries += 1;
                    let backoff = self.retry.backoff(retries);
                    warn!(tx_hash = ?hash, attempt = retries, ?backoff, "detail fetch throttled, retrying");
                    counter!("monitor_fetch_retries_total").increment(1);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Fetch::Cancelled,
                        _ = sleep(backoff) => {}
                    }
                }
                Err(err) => {
                    error!(tx_hash = ?hash, retries, %err, "detail fetch failed, dropping event");
                    return Fetch::Failed;
                }
            }
        }
    }

    fn classify(&self, detail: &TransactionDetail) -> Option<NewTransaction> {
        let value = normalize_wei(detail.value)?;
        let is_high_value = value >= self.threshold;
        Some(NewTransaction {
            hash: format!("{:#x}", detail.hash),
            from: to_checksum(&detail.from, None),
            to: detail.to.map(|to| to_checksum(&to, None)),
            value,
            is_high_value,
            is_suspicious: false,
            alert_type: is_high_value.then_some(AlertType::HighValue),
            detected_at: Utc::now(),
        })
    }

    async fn emit(&self, transaction: NewTransaction, cancel: &CancellationToken) -> ProcessOutcome {
        let high_value = transaction.is_high_value;
        let alert = high_value.then(|| NewAlert {
            alert_type: AlertType::HighValue,
            description: format!(
                "High value transaction detected: {:.2} ETH",
                transaction.value
            ),
            tx_hash: transaction.hash.clone(),
            created_at: Utc::now(),
        });

        let tx_hash = transaction.hash.clone();
        match self.storage.insert_transaction(transaction).await {
            Ok(()) => {
                info!(%tx_hash, high_value, "transaction recorded");
                counter!("monitor_transactions_total", "result" => "persisted").increment(1);
            }
            Err(err) => {
                error!(%tx_hash, %err, "failed to persist transaction");
                counter!("monitor_transactions_total", "result" => "store_error").increment(1);
            }
        }

        if let Some(alert) = alert {
            match self.alerts.submit(alert, cancel).await {
                Ok(()) => {}
                Err(AlertSendError::Cancelled) => return ProcessOutcome::Cancelled,
                Err(err @ AlertSendError::Closed) => {
                    error!(%tx_hash, %err, "alert discarded");
                }
            }
        }

        ProcessOutcome::Emitted { high_value }
    }
}

/// Converts wei to ETH through an exact decimal rendering, narrowing to `f64`
/// only at the end.
pub fn normalize_wei(wei: U256) -> Option<f64> {
    format_units(wei, "ether").ok()?.parse().ok()
}
