//! In-process doubles for the ledger seam and the persistence boundary.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use futures::channel::mpsc::{unbounded, UnboundedSender};
use tokio::time::Instant;

use ledger_watch_domain::{
    AlertRecord, AlertStore, NewAlert, NewTransaction, StorageError, StorageResult,
    TransactionQuery, TransactionRecord, TransactionStore,
};

use crate::rpc::{
    Connector, LedgerClient, LedgerError, LogEvent, LogStream, TransactionDetail, TxLookup,
};

pub const WEI_PER_ETH: u64 = 1_000_000_000_000_000_000;

pub fn event(byte: u8) -> LogEvent {
    LogEvent {
        tx_hash: H256::repeat_byte(byte),
        address: Address::repeat_byte(0xaa),
        block_number: Some(19_000_000),
    }
}

pub fn detail(byte: u8, eth: u64) -> TransactionDetail {
    TransactionDetail {
        hash: H256::repeat_byte(byte),
        from: Address::repeat_byte(0x01),
        to: Some(Address::repeat_byte(0x02)),
        value: U256::from(eth) * U256::from(WEI_PER_ETH),
    }
}

/// Shared behaviour of one fake node. Tests keep an `Arc` and flip the knobs
/// while the code under test talks to it through [`MockLedger`].
pub struct LedgerState {
    pub dialable: AtomicBool,
    pub alive: AtomicBool,
    pub subscribe_fails: AtomicBool,
    pub subscriptions: AtomicUsize,
    pub dials: AtomicUsize,
    scripted: Mutex<VecDeque<Result<TxLookup, LedgerError>>>,
    mined: Mutex<HashMap<H256, TransactionDetail>>,
    lookups: Mutex<Vec<Instant>>,
    feed: Mutex<Option<UnboundedSender<Result<LogEvent, LedgerError>>>>,
}

impl LedgerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dialable: AtomicBool::new(true),
            alive: AtomicBool::new(true),
            subscribe_fails: AtomicBool::new(false),
            subscriptions: AtomicUsize::new(0),
            dials: AtomicUsize::new(0),
            scripted: Mutex::new(VecDeque::new()),
            mined: Mutex::new(HashMap::new()),
            lookups: Mutex::new(Vec::new()),
            feed: Mutex::new(None),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        let state = Self::new();
        state.dialable.store(false, Ordering::SeqCst);
        state.alive.store(false, Ordering::SeqCst);
        state
    }

    pub fn mine(&self, detail: TransactionDetail) {
        self.mined.lock().unwrap().insert(detail.hash, detail);
    }

    /// Queues responses served before falling back to mined transactions.
    pub fn script(&self, responses: impl IntoIterator<Item = Result<TxLookup, LedgerError>>) {
        self.scripted.lock().unwrap().extend(responses);
    }

    pub fn lookup_times(&self) -> Vec<Instant> {
        self.lookups.lock().unwrap().clone()
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.lock().unwrap().len()
    }

    pub fn has_subscriber(&self) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|feed| !feed.is_closed())
    }

    /// Pushes an event to the active subscription, if any.
    pub fn emit(&self, event: LogEvent) -> bool {
        self.send(Ok(event))
    }

    pub fn break_subscription(&self, err: LedgerError) -> bool {
        self.send(Err(err))
    }

    fn send(&self, item: Result<LogEvent, LedgerError>) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|feed| feed.unbounded_send(item).is_ok())
    }
}

pub struct MockLedger {
    pub state: Arc<LedgerState>,
}

impl MockLedger {
    pub fn new(state: Arc<LedgerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn block_number(&self) -> Result<u64, LedgerError> {
        if self.state.alive.load(Ordering::SeqCst) {
            Ok(19_000_000)
        } else {
            Err(LedgerError::request("connection reset"))
        }
    }

    async fn transaction(&self, hash: H256) -> Result<TxLookup, LedgerError> {
        self.state.lookups.lock().unwrap().push(Instant::now());
        if let Some(response) = self.state.scripted.lock().unwrap().pop_front() {
            return response;
        }
        self.state
            .mined
            .lock()
            .unwrap()
            .get(&hash)
            .cloned()
            .map(TxLookup::Mined)
            .ok_or_else(|| LedgerError::request("transaction not found"))
    }

    async fn subscribe_logs(&self, _addresses: &[Address]) -> Result<LogStream, LedgerError> {
        if self.state.subscribe_fails.load(Ordering::SeqCst) {
            return Err(LedgerError::Subscription("filter not supported".into()));
        }
        let (tx, rx) = unbounded();
        *self.state.feed.lock().unwrap() = Some(tx);
        self.state.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::pin(rx))
    }
}

/// Resolves URLs to pre-registered [`LedgerState`]s.
#[derive(Default)]
pub struct MockConnector {
    nodes: HashMap<String, Arc<LedgerState>>,
}

impl MockConnector {
    pub fn with(mut self, url: &str, state: Arc<LedgerState>) -> Self {
        self.nodes.insert(url.to_string(), state);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Client = MockLedger;

    async fn connect(&self, url: &str) -> Result<Self::Client, LedgerError> {
        let dial_error = || LedgerError::Dial {
            url: url.to_string(),
            reason: "connection refused".into(),
        };
        let state = self.nodes.get(url).ok_or_else(dial_error)?;
        state.dials.fetch_add(1, Ordering::SeqCst);
        if !state.dialable.load(Ordering::SeqCst) {
            return Err(dial_error());
        }
        Ok(MockLedger::new(state.clone()))
    }
}

/// Records every insert without deduplicating, so tests can count emissions.
#[derive(Default)]
pub struct MemoryStore {
    transactions: Mutex<Vec<NewTransaction>>,
    alerts: Mutex<Vec<NewAlert>>,
    pub fail_alerts: AtomicBool,
    pub fail_transactions: AtomicBool,
}

impl MemoryStore {
    pub fn transactions(&self) -> Vec<NewTransaction> {
        self.transactions.lock().unwrap().clone()
    }

    pub fn alerts(&self) -> Vec<NewAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert_transaction(&self, transaction: NewTransaction) -> StorageResult<()> {
        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(StorageError::Database("disk full".into()));
        }
        self.transactions.lock().unwrap().push(transaction);
        Ok(())
    }

    async fn list_transactions(
        &self,
        _query: TransactionQuery,
    ) -> StorageResult<Vec<TransactionRecord>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl AlertStore for MemoryStore {
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<()> {
        if self.fail_alerts.load(Ordering::SeqCst) {
            return Err(StorageError::Database("disk full".into()));
        }
        self.alerts.lock().unwrap().push(alert);
        Ok(())
    }

    async fn list_alerts_since(&self, _since: DateTime<Utc>) -> StorageResult<Vec<AlertRecord>> {
        Ok(Vec::new())
    }
}
