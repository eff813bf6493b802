//! Endpoint pool: round-robin selection over a fixed set of ledger endpoints
//! with liveness maintained by a background health loop.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use futures::future::join_all;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::rpc::{Connector, LedgerClient};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no endpoints configured")]
    NoEndpoints,
    #[error("none of the {0} endpoints could be dialed")]
    AllDialsFailed(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub dial_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(10),
        }
    }
}

/// A selected endpoint. The client stays usable even if the health loop
/// later drops the pool's own reference.
pub struct EndpointHandle<T> {
    pub index: usize,
    pub url: String,
    pub client: Arc<T>,
}

struct Endpoint<T> {
    url: String,
    client: Option<Arc<T>>,
    live: bool,
}

pub struct EndpointPool<C: Connector> {
    connector: C,
    endpoints: RwLock<Vec<Endpoint<C::Client>>>,
    cursor: AtomicUsize,
    health: HealthConfig,
}

impl<C: Connector> EndpointPool<C> {
    /// Dials every URL concurrently. Endpoints that fail to dial start dead;
    /// construction only fails when none could be dialed.
    pub async fn connect(
        urls: &[String],
        connector: C,
        health: HealthConfig,
    ) -> Result<Self, PoolError> {
        if urls.is_empty() {
            return Err(PoolError::NoEndpoints);
        }

        let dials = urls
            .iter()
            .map(|url| dial(&connector, url, health.dial_timeout));
        let endpoints: Vec<_> = join_all(dials)
            .await
            .into_iter()
            .zip(urls)
            .map(|(client, url)| Endpoint {
                url: url.clone(),
                live: client.is_some(),
                client: client.map(Arc::new),
            })
            .collect();

        let live = endpoints.iter().filter(|endpoint| endpoint.live).count();
        if live == 0 {
            return Err(PoolError::AllDialsFailed(urls.len()));
        }
        info!(live, total = urls.len(), "endpoint pool ready");
        gauge!("monitor_endpoints_live").set(live as f64);

        Ok(Self {
            connector,
            endpoints: RwLock::new(endpoints),
            cursor: AtomicUsize::new(0),
            health,
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.read().iter().filter(|endpoint| endpoint.live).count()
    }

    /// Advances the cursor and returns the first live endpoint at or after
    /// it, wrapping once. Never touches the network.
    pub fn select(&self) -> Option<EndpointHandle<C::Client>> {
        let endpoints = self.read();
        let len = endpoints.len();
        if len == 0 {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed).wrapping_add(1) % len;

        (0..len)
            .map(|offset| (start + offset) % len)
            .find_map(|index| {
                let endpoint = &endpoints[index];
                let client = endpoint.client.as_ref().filter(|_| endpoint.live)?;
                Some(EndpointHandle {
                    index,
                    url: endpoint.url.clone(),
                    client: Arc::clone(client),
                })
            })
    }

    /// Marks an endpoint selectable again. Has no effect on an endpoint
    /// without a connection.
    pub fn mark_live(&self, index: usize) {
        let mut endpoints = self.write();
        if let Some(endpoint) = endpoints.get_mut(index) {
            endpoint.live = endpoint.client.is_some();
        }
        publish_live(&endpoints);
    }

    /// Takes an endpoint out of rotation. Its connection is kept so the next
    /// health pass can probe it.
    pub fn mark_dead(&self, index: usize) {
        let mut endpoints = self.write();
        if let Some(endpoint) = endpoints.get_mut(index) {
            endpoint.live = false;
        }
        publish_live(&endpoints);
    }

    /// Runs one health pass: endpoints with a connection are probed, the rest
    /// are redialed. All endpoints are checked concurrently.
    pub async fn check_endpoints(&self) {
        let snapshot: Vec<(String, Option<Arc<C::Client>>)> = self
            .read()
            .iter()
            .map(|endpoint| (endpoint.url.clone(), endpoint.client.clone()))
            .collect();

        let checks = snapshot
            .into_iter()
            .map(|(url, client)| async move { self.check_one(&url, client).await });
        let outcomes = join_all(checks).await;

        let mut endpoints = self.write();
        for (endpoint, client) in endpoints.iter_mut().zip(outcomes) {
            endpoint.live = client.is_some();
            endpoint.client = client;
        }
        publish_live(&endpoints);
    }

    /// Repeats [`Self::check_endpoints`] every interval until cancelled. The
    /// first pass runs one interval after start.
    pub async fn run_health_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.health.interval, self.health.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.check_endpoints() => {}
                    }
                }
            }
        }
        debug!("health loop stopped");
    }

    async fn check_one(&self, url: &str, client: Option<Arc<C::Client>>) -> Option<Arc<C::Client>> {
        let Some(client) = client else {
            let client = dial(&self.connector, url, self.health.dial_timeout).await?;
            info!(url, "endpoint reconnected");
            counter!("monitor_health_probes_total", "result" => "reconnected").increment(1);
            return Some(Arc::new(client));
        };

        match timeout(self.health.probe_timeout, client.block_number()).await {
            Ok(Ok(height)) => {
                debug!(url, height, "endpoint healthy");
                counter!("monitor_health_probes_total", "result" => "ok").increment(1);
                Some(client)
            }
            Ok(Err(err)) => {
                warn!(url, %err, "endpoint probe failed");
                counter!("monitor_health_probes_total", "result" => "error").increment(1);
                None
            }
            Err(_) => {
                warn!(url, timeout = ?self.health.probe_timeout, "endpoint probe timed out");
                counter!("monitor_health_probes_total", "result" => "error").increment(1);
                None
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Endpoint<C::Client>>> {
        self.endpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Endpoint<C::Client>>> {
        self.endpoints.write().unwrap_or_else(PoisonError::into_inner)
    }
}

async fn dial<C: Connector>(connector: &C, url: &str, limit: Duration) -> Option<C::Client> {
    match timeout(limit, connector.connect(url)).await {
        Ok(Ok(client)) => Some(client),
        Ok(Err(err)) => {
            warn!(url, %err, "endpoint dial failed");
            None
        }
        Err(_) => {
            warn!(url, timeout = ?limit, "endpoint dial timed out");
            None
        }
    }
}

fn publish_live<T>(endpoints: &[Endpoint<T>]) {
    let live = endpoints.iter().filter(|endpoint| endpoint.live).count();
    gauge!("monitor_endpoints_live").set(live as f64);
}
