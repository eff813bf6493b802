use ethers::types::{Address, H256, U256};

/// A log notification for one of the watched addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub tx_hash: H256,
    /// Emitting contract.
    pub address: Address,
    pub block_number: Option<u64>,
}

/// Mined transaction with its sender already recovered from the signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionDetail {
    pub hash: H256,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// Transferred value in wei.
    pub value: U256,
}

/// Result of a detail lookup by hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxLookup {
    /// Known to the node but not yet included in a block.
    Pending,
    Mined(TransactionDetail),
}
