//! Ledger ingestion core: the endpoint pool, the log subscription loop, the
//! per-event processor and the alert fan-out. The `ledger_watch_monitor`
//! binary wires these over WebSocket endpoints; embedders can drive
//! [`run_monitor`] with their own [`rpc::Connector`].

pub mod alerts;
pub mod limiter;
pub mod pipeline;
pub mod pool;
pub mod rpc;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use alerts::{alert_channel, run_alert_fanout, AlertNotifier, AlertSink, LogNotifier};
pub use pipeline::{EventProcessor, ProcessOutcome, RetryPolicy};
pub use pool::{EndpointHandle, EndpointPool, HealthConfig, PoolError};
pub use rpc::{EthersConnector, LedgerClient, LedgerError};
pub use worker::{run_monitor, LoopTimings, MonitorError, MonitorSettings, SubscriptionLoop};
