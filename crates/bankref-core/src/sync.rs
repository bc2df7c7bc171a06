use crate::resolver::{decode_active_banks, BankResolver};
use crate::store::{Filter, GatedStore};
use crate::types::{collections, PlatformBank};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Cancellable stream of bank-list snapshots.
///
/// The first snapshot arrives without waiting for a remote change; each
/// subsequent one reflects a result-set change pushed by the store. Snapshots
/// within one feed arrive in emission order; nothing is promised between a
/// feed and a concurrent direct read.
pub struct BankFeed {
    rx: mpsc::UnboundedReceiver<Vec<PlatformBank>>,
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BankFeed {
    /// Next snapshot; `None` once the feed terminated.
    pub async fn next(&mut self) -> Option<Vec<PlatformBank>> {
        self.rx.recv().await
    }

    /// Stop the feed and release the standing query. Consuming the feed
    /// guarantees no further snapshot can be observed, even one already in
    /// flight.
    pub fn cancel(self) {
        let _ = self.cancel.send(true);
        if let Some(task) = self.task {
            task.abort();
        }
        debug!("bank feed cancelled");
    }

    /// A feed that emits one empty snapshot and terminates, the degraded
    /// shape used when a subscription cannot be established.
    fn terminated_empty() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(false);
        let _ = tx.send(Vec::new());
        Self {
            rx,
            cancel,
            task: None,
        }
    }
}

/// Re-resolves dependent bank state whenever the store pushes a change,
/// feeding dashboards without polling.
#[derive(Clone)]
pub struct RealTimeSynchronizer {
    store: GatedStore,
    resolver: BankResolver,
}

impl RealTimeSynchronizer {
    pub fn new(store: GatedStore, resolver: BankResolver) -> Self {
        Self { store, resolver }
    }

    /// Live view of all active banks, ordered by priority.
    pub async fn subscribe_active_banks(&self) -> BankFeed {
        let watch = match self
            .store
            .subscribe(collections::BANKS, vec![Filter::eq("is_active", true)])
            .await
        {
            Ok(watch) => watch,
            Err(err) => {
                warn!(error = %err, "active-bank subscription failed, feed terminated empty");
                return BankFeed::terminated_empty();
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut watch = watch;
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    docs = watch.next() => match docs {
                        Some(docs) => {
                            if tx.send(decode_active_banks(docs)).is_err() {
                                break;
                            }
                        }
                        None => {
                            // Store ended the stream: one empty emission, then done.
                            let _ = tx.send(Vec::new());
                            break;
                        }
                    },
                }
            }
        });

        BankFeed {
            rx,
            cancel: cancel_tx,
            task: Some(task),
        }
    }

    /// Live view of the banks usable by one exchange.
    ///
    /// The standing query watches the *assignment* collection; every
    /// notification re-extracts the active bank ids, re-resolves them through
    /// the batch resolver, and emits the active subset — a bank deactivation
    /// reaches subscribers through the next assignment-set change, a
    /// membership change immediately.
    pub async fn subscribe_exchange_banks(&self, exchange_id: &str) -> BankFeed {
        let watch = match self
            .store
            .subscribe(
                collections::ASSIGNMENTS,
                vec![
                    Filter::eq("exchange_id", exchange_id),
                    Filter::eq("is_active", true),
                ],
            )
            .await
        {
            Ok(watch) => watch,
            Err(err) => {
                warn!(
                    exchange_id,
                    error = %err,
                    "exchange-bank subscription failed, feed terminated empty"
                );
                return BankFeed::terminated_empty();
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let resolver = self.resolver.clone();

        let task = tokio::spawn(async move {
            let mut watch = watch;
            loop {
                tokio::select! {
                    _ = cancel_rx.changed() => break,
                    docs = watch.next() => match docs {
                        Some(docs) => {
                            let ids: Vec<String> = docs
                                .iter()
                                .filter_map(|doc| doc.get("bank_id").and_then(|v| v.as_str()))
                                .map(str::to_string)
                                .collect();
                            let mut banks: Vec<PlatformBank> = resolver
                                .resolve_banks(&ids)
                                .await
                                .into_iter()
                                .filter(|bank| bank.is_active)
                                .collect();
                            banks.sort_by(|a, b| {
                                (a.priority, a.name.as_str()).cmp(&(b.priority, b.name.as_str()))
                            });
                            if tx.send(banks).is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = tx.send(Vec::new());
                            break;
                        }
                    },
                }
            }
        });

        BankFeed {
            rx,
            cancel: cancel_tx,
            task: Some(task),
        }
    }
}
