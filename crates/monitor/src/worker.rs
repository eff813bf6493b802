use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use futures::StreamExt;
use metrics::counter;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use ledger_watch_domain::{
    config::{ConfigError, MonitorConfig},
    services::telemetry::TelemetryError,
    storage::{AlertStore, StorageError, TransactionStore},
    SeenTxCache,
};

use crate::{
    alerts::{alert_channel, run_alert_fanout, LogNotifier, ALERT_BUFFER},
    limiter::RateLimiter,
    pipeline::EventProcessor,
    pool::{EndpointHandle, EndpointPool, PoolError},
    rpc::{Connector, LedgerClient, LogEvent},
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("endpoint pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("invalid watched address {0}")]
    InvalidAddress(String),
}

/// Back-off pauses of the subscription loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// Wait after finding no live endpoint.
    pub no_endpoint: Duration,
    /// Wait after a failed or torn-down subscription.
    pub resubscribe: Duration,
}

impl Default for LoopTimings {
    fn default() -> Self {
        Self {
            no_endpoint: Duration::from_secs(5),
            resubscribe: Duration::from_secs(1),
        }
    }
}

/// Runtime knobs of the ingestion pipeline, resolved from [`MonitorConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub watched: Vec<Address>,
    pub high_value_threshold: f64,
    pub dedup_capacity: u64,
    pub dedup_ttl: Duration,
    pub max_in_flight: usize,
    pub timings: LoopTimings,
}

impl TryFrom<&MonitorConfig> for MonitorSettings {
    type Error = MonitorError;

    fn try_from(config: &MonitorConfig) -> Result<Self, Self::Error> {
        let watched = config
            .watched_addresses()
            .iter()
            .map(|address| {
                Address::from_str(address.as_str())
                    .map_err(|_| MonitorError::InvalidAddress(address.as_str().to_string()))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self {
            watched,
            high_value_threshold: config.high_value_threshold(),
            dedup_capacity: config.dedup_capacity(),
            dedup_ttl: config.dedup_ttl(),
            max_in_flight: config.max_in_flight(),
            timings: LoopTimings::default(),
        })
    }
}

/// Keeps one log subscription open against whichever endpoint the pool
/// hands out, spawning a processor task per received event.
pub struct SubscriptionLoop<C: Connector, S: ?Sized> {
    pool: Arc<EndpointPool<C>>,
    processor: Arc<EventProcessor<S>>,
    watched: Vec<Address>,
    in_flight: Arc<Semaphore>,
    timings: LoopTimings,
}

impl<C, S> SubscriptionLoop<C, S>
where
    C: Connector,
    S: TransactionStore + ?Sized + 'static,
{
    pub fn new(
        pool: Arc<EndpointPool<C>>,
        processor: Arc<EventProcessor<S>>,
        watched: Vec<Address>,
        max_in_flight: usize,
        timings: LoopTimings,
    ) -> Self {
        Self {
            pool,
            processor,
            watched,
            in_flight: Arc::new(Semaphore::new(max_in_flight.clamp(1, Semaphore::MAX_PERMITS))),
            timings,
        }
    }

    /// Runs until `cancel` fires. Every other failure is retried.
    pub async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            let Some(endpoint) = self.pool.select() else {
                warn!(wait = ?self.timings.no_endpoint, "no live endpoints, waiting");
                pause(self.timings.no_endpoint, &cancel).await;
                continue;
            };

            let subscribed = tokio::select! {
                _ = cancel.cancelled() => break,
                subscribed = endpoint.client.subscribe_logs(&self.watched) => subscribed,
            };
            let mut logs = match subscribed {
                Ok(logs) => {
                    info!(url = %endpoint.url, addresses = self.watched.len(), "log subscription active");
                    counter!("monitor_subscriptions_total", "result" => "ok").increment(1);
                    logs
                }
                Err(err) => {
                    warn!(url = %endpoint.url, %err, "subscription failed, reselecting endpoint");
                    counter!("monitor_subscriptions_total", "result" => "error").increment(1);
                    pause(self.timings.resubscribe, &cancel).await;
                    continue;
                }
            };

            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = logs.next() => next,
                };
                match next {
                    Some(Ok(event)) => {
                        if !self.dispatch(&endpoint, event, &cancel).await {
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(url = %endpoint.url, %err, "subscription error, reconnecting");
                        break;
                    }
                    None => {
                        warn!(url = %endpoint.url, "subscription closed, reconnecting");
                        break;
                    }
                }
            }

            drop(logs);
            pause(self.timings.resubscribe, &cancel).await;
        }
        info!("subscription loop stopped");
    }

    /// Waits for an in-flight slot, then hands the event to its own task.
    /// Returns `false` once cancelled.
    async fn dispatch(
        &self,
        endpoint: &EndpointHandle<C::Client>,
        event: LogEvent,
        cancel: &CancellationToken,
    ) -> bool {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return false,
            permit = self.in_flight.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return false,
            },
        };

        debug!(
            tx_hash = ?event.tx_hash,
            contract = ?event.address,
            block = ?event.block_number,
            url = %endpoint.url,
            "dispatching log event"
        );
        let processor = Arc::clone(&self.processor);
        let client = Arc::clone(&endpoint.client);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            processor.process(client.as_ref(), &event, &cancel).await;
        });
        true
    }
}

async fn pause(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(duration) => {}
    }
}

/// Wires the alert fan-out, the pool health loop and the subscription loop,
/// returning once `cancel` fires and the background tasks have stopped.
pub async fn run_monitor<C, S>(
    settings: MonitorSettings,
    storage: Arc<S>,
    pool: Arc<EndpointPool<C>>,
    cancel: CancellationToken,
) -> Result<(), MonitorError>
where
    C: Connector,
    S: TransactionStore + AlertStore + ?Sized + 'static,
{
    let (alerts, queue) = alert_channel(ALERT_BUFFER);
    let fanout = tokio::spawn(run_alert_fanout(
        queue,
        Arc::clone(&storage),
        LogNotifier,
        cancel.clone(),
    ));
    let health = tokio::spawn({
        let pool = Arc::clone(&pool);
        let cancel = cancel.clone();
        async move { pool.run_health_loop(cancel).await }
    });

    let seen = Arc::new(SeenTxCache::with_capacity(
        settings.dedup_ttl,
        settings.dedup_capacity,
    ));
    let processor = Arc::new(EventProcessor::new(
        storage,
        seen,
        Arc::new(RateLimiter::per_second()),
        alerts,
        settings.high_value_threshold,
    ));

    info!(
        endpoints = pool.len(),
        live = pool.live_count(),
        watched = settings.watched.len(),
        threshold = settings.high_value_threshold,
        "monitor started"
    );
    SubscriptionLoop::new(
        pool,
        processor,
        settings.watched,
        settings.max_in_flight,
        settings.timings,
    )
    .run(cancel.clone())
    .await;

    cancel.cancel();
    for (name, task) in [("alert fan-out", fanout), ("health loop", health)] {
        if let Err(err) = task.await {
            error!(task = name, ?err, "background task failed");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use ledger_watch_domain::AlertType;

    use crate::pool::HealthConfig;
    use crate::rpc::LedgerError;
    use crate::test_support::{detail, event, LedgerState, MemoryStore, MockConnector};

    fn settings() -> MonitorSettings {
        MonitorSettings {
            watched: vec![Address::repeat_byte(0xaa)],
            high_value_threshold: 100.0,
            dedup_capacity: 1_000,
            dedup_ttl: Duration::from_secs(60),
            max_in_flight: 8,
            timings: LoopTimings::default(),
        }
    }

    async fn pool_of(states: &[Arc<LedgerState>]) -> Arc<EndpointPool<MockConnector>> {
        let urls: Vec<String> = (0..states.len()).map(|i| format!("ws://node-{i}")).collect();
        let connector = urls
            .iter()
            .zip(states)
            .fold(MockConnector::default(), |connector, (url, state)| {
                connector.with(url, state.clone())
            });
        Arc::new(
            EndpointPool::connect(&urls, connector, HealthConfig::default())
                .await
                .expect("pool builds"),
        )
    }

    /// Lets spawned tasks run until `done` holds, advancing paused time in
    /// small steps.
    async fn settle(mut done: impl FnMut() -> bool) {
        for _ in 0..600 {
            if done() {
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
        panic!("condition not reached");
    }

    struct Running {
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<Result<(), MonitorError>>,
    }

    impl Running {
        async fn stop(self) {
            self.cancel.cancel();
            self.task
                .await
                .expect("monitor task joins")
                .expect("monitor exits cleanly");
        }
    }

    fn start(
        settings: MonitorSettings,
        storage: Arc<MemoryStore>,
        pool: Arc<EndpointPool<MockConnector>>,
    ) -> Running {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_monitor(settings, storage, pool, cancel.clone()));
        Running { cancel, task }
    }

    #[tokio::test(start_paused = true)]
    async fn high_value_event_produces_transaction_and_alert() {
        let node = LedgerState::new();
        node.mine(detail(0x21, 150));
        let storage = Arc::new(MemoryStore::default());
        let running = start(settings(), storage.clone(), pool_of(&[node.clone()]).await);

        settle(|| node.has_subscriber()).await;
        assert!(node.emit(event(0x21)));
        settle(|| !storage.alerts().is_empty()).await;

        let transactions = storage.transactions();
        assert_eq!(transactions.len(), 1);
        assert!(transactions[0].is_high_value);
        assert_eq!(transactions[0].alert_type, Some(AlertType::HighValue));

        let alerts = storage.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].tx_hash, transactions[0].hash);
        assert_eq!(alerts[0].alert_type, AlertType::HighValue);

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_in_flight_limit_is_clamped() {
        let node = LedgerState::new();
        node.mine(detail(0x24, 1));
        let storage = Arc::new(MemoryStore::default());
        let settings = MonitorSettings {
            max_in_flight: usize::MAX,
            ..settings()
        };
        let running = start(settings, storage.clone(), pool_of(&[node.clone()]).await);

        settle(|| node.has_subscriber()).await;
        node.emit(event(0x24));
        settle(|| !storage.transactions().is_empty()).await;

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn low_value_event_produces_transaction_only() {
        let node = LedgerState::new();
        node.mine(detail(0x22, 10));
        let storage = Arc::new(MemoryStore::default());
        let running = start(settings(), storage.clone(), pool_of(&[node.clone()]).await);

        settle(|| node.has_subscriber()).await;
        node.emit(event(0x22));
        node.emit(event(0x22));
        settle(|| !storage.transactions().is_empty()).await;
        sleep(Duration::from_secs(3)).await;

        let transactions = storage.transactions();
        assert_eq!(transactions.len(), 1);
        assert!(!transactions[0].is_high_value);
        assert_eq!(transactions[0].alert_type, None);
        assert!(storage.alerts().is_empty());

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_subscription_moves_to_another_endpoint() {
        let nodes = [LedgerState::new(), LedgerState::new()];
        // The first selection lands on node 1.
        nodes[1].subscribe_fails.store(true, Ordering::SeqCst);
        let storage = Arc::new(MemoryStore::default());
        let running = start(settings(), storage, pool_of(&nodes).await);

        settle(|| nodes[0].has_subscriber()).await;
        assert_eq!(nodes[0].subscriptions.load(Ordering::SeqCst), 1);
        assert_eq!(nodes[1].subscriptions.load(Ordering::SeqCst), 0);

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn broken_subscription_is_reestablished() {
        let node = LedgerState::new();
        node.mine(detail(0x23, 1));
        let storage = Arc::new(MemoryStore::default());
        let running = start(settings(), storage.clone(), pool_of(&[node.clone()]).await);

        settle(|| node.has_subscriber()).await;
        node.break_subscription(LedgerError::Subscription("connection reset".into()));
        settle(|| node.subscriptions.load(Ordering::SeqCst) == 2 && node.has_subscriber()).await;

        node.emit(event(0x23));
        settle(|| storage.transactions().len() == 1).await;

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_an_endpoint_then_resumes() {
        let node = LedgerState::new();
        let pool = pool_of(&[node.clone()]).await;
        pool.mark_dead(0);
        let running = start(settings(), Arc::new(MemoryStore::default()), pool.clone());

        sleep(Duration::from_secs(12)).await;
        assert_eq!(node.subscriptions.load(Ordering::SeqCst), 0);

        pool.mark_live(0);
        settle(|| node.has_subscriber()).await;

        running.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_every_loop() {
        let node = LedgerState::new();
        let running = start(
            settings(),
            Arc::new(MemoryStore::default()),
            pool_of(&[node.clone()]).await,
        );
        settle(|| node.has_subscriber()).await;

        running.stop().await;
        assert!(!node.has_subscriber());
    }
}
