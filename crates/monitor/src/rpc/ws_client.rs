use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};

use async_trait::async_trait;
use ethers::providers::{Middleware, Provider, ProviderError, PubsubClient, RpcError, Ws};
use ethers::types::{Address, Filter, Log, Transaction, H256, U256};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use super::{
    is_rate_limit_message, Connector, LedgerClient, LedgerError, LogEvent, LogStream,
    TransactionDetail, TxLookup,
};

/// Dials `ws://`/`wss://` endpoints through ethers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthersConnector;

#[async_trait]
impl Connector for EthersConnector {
    type Client = EthersClient;

    async fn connect(&self, url: &str) -> Result<Self::Client, LedgerError> {
        let provider = Provider::<Ws>::connect(url)
            .await
            .map_err(|err| LedgerError::Dial {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(EthersClient { provider })
    }
}

#[derive(Debug)]
pub struct EthersClient {
    provider: Provider<Ws>,
}

#[async_trait]
impl LedgerClient for EthersClient {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider
            .get_block_number()
            .await
            .map(|height| height.as_u64())
            .map_err(provider_error)
    }

    async fn transaction(&self, hash: H256) -> Result<TxLookup, LedgerError> {
        let tx = self
            .provider
            .get_transaction(hash)
            .await
            .map_err(provider_error)?
            .ok_or_else(|| LedgerError::Request(format!("transaction {hash:?} not found")))?;
        convert_transaction(tx)
    }

    async fn subscribe_logs(&self, addresses: &[Address]) -> Result<LogStream, LedgerError> {
        let filter = Filter::new().address(addresses.to_vec());
        let id: U256 = self
            .provider
            .request("eth_subscribe", ("logs", filter))
            .await
            .map_err(|err| LedgerError::Subscription(err.to_string()))?;

        let ws = self.provider.as_ref().clone();
        let notifications = ws
            .subscribe(id)
            .map_err(|err| LedgerError::Subscription(err.to_string()))?;

        Ok(Box::pin(WsLogStream {
            id,
            ws,
            notifications,
        }))
    }
}

fn provider_error(err: ProviderError) -> LedgerError {
    let throttled = err
        .as_error_response()
        .is_some_and(|response| is_rate_limit_message(&response.message));
    if throttled {
        LedgerError::RateLimited(err.to_string())
    } else {
        LedgerError::request(err.to_string())
    }
}

fn convert_transaction(tx: Transaction) -> Result<TxLookup, LedgerError> {
    if tx.block_number.is_none() {
        return Ok(TxLookup::Pending);
    }

    let from = tx
        .recover_from()
        .map_err(|err| LedgerError::Sender(err.to_string()))?;

    Ok(TxLookup::Mined(TransactionDetail {
        hash: tx.hash,
        from,
        to: tx.to,
        value: tx.value,
    }))
}

fn convert_log(log: Log) -> Option<LogEvent> {
    if log.removed == Some(true) {
        return None;
    }
    Some(LogEvent {
        tx_hash: log.transaction_hash?,
        address: log.address,
        block_number: log.block_number.map(|number| number.as_u64()),
    })
}

/// Owns the server-side subscription; dropping it unsubscribes.
struct WsLogStream {
    id: U256,
    ws: Ws,
    notifications: <Ws as PubsubClient>::NotificationStream,
}

impl Stream for WsLogStream {
    type Item = Result<LogEvent, LedgerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(raw) = ready!(self.notifications.poll_next_unpin(cx)) else {
                return Poll::Ready(None);
            };
            match serde_json::from_str::<Log>(raw.get()) {
                Ok(log) => {
                    if let Some(event) = convert_log(log) {
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                Err(err) => warn!(?err, "skipping malformed log notification"),
            }
        }
    }
}

impl Drop for WsLogStream {
    fn drop(&mut self) {
        if let Err(err) = self.ws.unsubscribe(self.id) {
            debug!(?err, id = ?self.id, "unsubscribe failed");
        }
    }
}
