//! Alert fan-out: a bounded queue between event processors and a single
//! consumer that persists each alert and then notifies.

use std::sync::Arc;

use async_trait::async_trait;
use ledger_watch_domain::{AlertStore, NewAlert};
use metrics::counter;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Pending alerts held before producers start waiting.
pub const ALERT_BUFFER: usize = 100;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AlertSendError {
    #[error("alert queue closed")]
    Closed,
    #[error("cancelled while waiting for alert queue capacity")]
    Cancelled,
}

pub fn alert_channel(capacity: usize) -> (AlertSink, AlertQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (AlertSink { tx }, AlertQueue { rx })
}

#[derive(Debug, Clone)]
pub struct AlertSink {
    tx: mpsc::Sender<NewAlert>,
}

impl AlertSink {
    /// Enqueues an alert, waiting for room when the buffer is full.
    pub async fn submit(
        &self,
        alert: NewAlert,
        cancel: &CancellationToken,
    ) -> Result<(), AlertSendError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AlertSendError::Cancelled),
            sent = self.tx.send(alert) => sent.map_err(|_| AlertSendError::Closed),
        }
    }
}

#[derive(Debug)]
pub struct AlertQueue {
    rx: mpsc::Receiver<NewAlert>,
}

impl AlertQueue {
    pub async fn recv(&mut self) -> Option<NewAlert> {
        self.rx.recv().await
    }

    /// Takes an already queued alert without waiting.
    pub fn try_recv(&mut self) -> Option<NewAlert> {
        self.rx.try_recv().ok()
    }
}

/// Delivery side effect run after an alert has been persisted.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &NewAlert);
}

/// Writes each alert to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, alert: &NewAlert) {
        warn!(
            alert_type = %alert.alert_type,
            tx_hash = %alert.tx_hash,
            "ALERT: {} - {} (TX: {})",
            alert.alert_type,
            alert.description,
            alert.tx_hash
        );
    }
}

/// Consumes alerts until cancelled or every sink is dropped. A failed store
/// write is logged and the alert is still delivered to the notifier.
pub async fn run_alert_fanout<S, N>(
    mut queue: AlertQueue,
    store: Arc<S>,
    notifier: N,
    cancel: CancellationToken,
) where
    S: AlertStore + ?Sized,
    N: AlertNotifier,
{
    loop {
        let alert = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(alert) => alert,
                None => break,
            },
        };

        match store.insert_alert(alert.clone()).await {
            Ok(()) => {
                counter!("monitor_alerts_total", "result" => "persisted").increment(1);
            }
            Err(err) => {
                error!(%err, tx_hash = %alert.tx_hash, "failed to persist alert");
                counter!("monitor_alerts_total", "result" => "store_error").increment(1);
            }
        }
        notifier.notify(&alert).await;
    }
    debug!("alert fan-out stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    use chrono::Utc;
    use ledger_watch_domain::AlertType;

    use crate::test_support::MemoryStore;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        seen: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl AlertNotifier for RecordingNotifier {
        async fn notify(&self, alert: &NewAlert) {
            self.seen.lock().unwrap().push(alert.tx_hash.clone());
        }
    }

    fn alert(tx_hash: &str) -> NewAlert {
        NewAlert {
            alert_type: AlertType::HighValue,
            description: "High value transaction detected: 150.00 ETH".into(),
            tx_hash: tx_hash.into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn persists_then_notifies_each_alert() {
        let store = Arc::new(MemoryStore::default());
        let notifier = RecordingNotifier::default();
        let (sink, queue) = alert_channel(ALERT_BUFFER);
        let cancel = CancellationToken::new();

        sink.submit(alert("0x01"), &cancel).await.expect("queued");
        sink.submit(alert("0x02"), &cancel).await.expect("queued");
        drop(sink);

        run_alert_fanout(queue, store.clone(), notifier.clone(), cancel).await;

        let stored: Vec<_> = store.alerts().into_iter().map(|a| a.tx_hash).collect();
        assert_eq!(stored, vec!["0x01", "0x02"]);
        assert_eq!(*notifier.seen.lock().unwrap(), vec!["0x01", "0x02"]);
    }

    #[tokio::test]
    async fn store_failure_does_not_stop_consumer() {
        let store = Arc::new(MemoryStore::default());
        store.fail_alerts.store(true, Ordering::SeqCst);
        let notifier = RecordingNotifier::default();
        let (sink, queue) = alert_channel(4);
        let cancel = CancellationToken::new();

        for hash in ["0x01", "0x02", "0x03"] {
            sink.submit(alert(hash), &cancel).await.expect("queued");
        }
        drop(sink);

        run_alert_fanout(queue, store.clone(), notifier.clone(), cancel).await;

        assert!(store.alerts().is_empty());
        assert_eq!(notifier.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn consumer_exits_on_cancel() {
        let (_sink, queue) = alert_channel(1);
        let cancel = CancellationToken::new();
        let consumer = tokio::spawn(run_alert_fanout(
            queue,
            Arc::new(MemoryStore::default()),
            LogNotifier,
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer stops promptly")
            .expect("consumer task joins");
    }

    #[tokio::test]
    async fn full_buffer_blocks_until_cancelled() {
        let (sink, _queue) = alert_channel(1);
        let cancel = CancellationToken::new();
        sink.submit(alert("0x01"), &cancel).await.expect("first fits");

        let blocked = tokio::time::timeout(Duration::from_millis(50), sink.submit(alert("0x02"), &cancel)).await;
        assert!(blocked.is_err(), "second alert waits for capacity");

        cancel.cancel();
        assert_eq!(
            sink.submit(alert("0x03"), &cancel).await,
            Err(AlertSendError::Cancelled)
        );
    }

    #[tokio::test]
    async fn submit_fails_once_consumer_is_gone() {
        let (sink, queue) = alert_channel(1);
        drop(queue);
        assert_eq!(
            sink.submit(alert("0x01"), &CancellationToken::new()).await,
            Err(AlertSendError::Closed)
        );
    }
}
