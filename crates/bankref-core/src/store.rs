use crate::error::RefDataError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Documents travel as raw JSON; typed records decode at component edges.
pub type Document = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
}

/// Equality/range predicate on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Gte,
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Lte,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub ascending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// One field-merge update inside an atomic batch commit.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub collection: String,
    pub id: String,
    pub fields: Document,
}

impl BatchWrite {
    pub fn merge(collection: impl Into<String>, id: impl Into<String>, fields: Document) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            fields,
        }
    }
}

/// Consumer side of a standing query.
///
/// The producer emits the full current result set once immediately after
/// registration and again on every result-set change. `cancel` consumes the
/// watch, so nothing can be observed after it returns, even for emissions
/// already in flight.
pub struct DocumentWatch {
    rx: mpsc::UnboundedReceiver<Vec<Document>>,
    cancel: watch::Sender<bool>,
}

impl DocumentWatch {
    /// Next result-set snapshot; `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.rx.recv().await
    }

    /// Stop the standing query and release the producer.
    pub fn cancel(self) {
        let _ = self.cancel.send(true);
        debug!("document watch cancelled");
    }
}

/// Producer side handed to store adapters by [`document_watch`].
pub struct WatchPublisher {
    tx: mpsc::UnboundedSender<Vec<Document>>,
    cancelled: watch::Receiver<bool>,
}

impl WatchPublisher {
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Emit a snapshot; returns false once the consumer cancelled or dropped.
    pub fn publish(&self, docs: Vec<Document>) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.tx.send(docs).is_ok()
    }

    /// Standalone cancellation signal, for use in producer select loops.
    /// Resolves `changed` (or errors) once the consumer cancels or drops.
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancelled.clone()
    }
}

/// Build a connected publisher/watch pair for a standing query.
pub fn document_watch() -> (WatchPublisher, DocumentWatch) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        WatchPublisher {
            tx,
            cancelled: cancel_rx,
        },
        DocumentWatch {
            rx,
            cancel: cancel_tx,
        },
    )
}

/// Contract required of the remote document store.
///
/// Implementations must emit the initial result set on `subscribe` before any
/// change-driven emission, and `batch_commit` must apply all writes or none.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RefDataError>;

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError>;

    /// Batch equality-in lookup: all documents whose `field` is in `values`.
    async fn query_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>, RefDataError>;

    async fn insert(&self, collection: &str, fields: Document) -> Result<String, RefDataError>;

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), RefDataError>;

    async fn batch_commit(&self, writes: Vec<BatchWrite>) -> Result<(), RefDataError>;

    async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<DocumentWatch, RefDataError>;
}

/// Best-effort connectivity signal.
///
/// Offline short-circuits outbound store traffic; it is not a correctness
/// mechanism and carries no ordering guarantee against in-flight calls.
#[derive(Clone)]
pub struct ConnectivityGate {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivityGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self {
            state: Arc::new(tx),
        }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn set_online(&self) {
        let _ = self.state.send(true);
        debug!("connectivity gate online");
    }

    pub fn set_offline(&self) {
        let _ = self.state.send(false);
        debug!("connectivity gate offline");
    }

    /// Listener stream of connectivity transitions.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for ConnectivityGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Store handle every component reads and writes through.
///
/// Applies the connectivity gate and a bounded per-call deadline; a timed-out
/// call surfaces as the same `Unavailable` condition as an unreachable store.
#[derive(Clone)]
pub struct GatedStore {
    inner: Arc<dyn DocumentStore>,
    gate: ConnectivityGate,
    deadline: Duration,
}

impl GatedStore {
    pub fn new(inner: Arc<dyn DocumentStore>, gate: ConnectivityGate, deadline: Duration) -> Self {
        Self {
            inner,
            gate,
            deadline,
        }
    }

    pub fn gate(&self) -> &ConnectivityGate {
        &self.gate
    }

    fn ensure_online(&self, op: &str) -> Result<(), RefDataError> {
        if self.gate.is_online() {
            Ok(())
        } else {
            Err(RefDataError::Unavailable(format!(
                "{op} skipped: connectivity gate is offline"
            )))
        }
    }

    async fn bounded<T>(
        &self,
        op: &str,
        fut: impl std::future::Future<Output = Result<T, RefDataError>>,
    ) -> Result<T, RefDataError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(RefDataError::Unavailable(format!(
                "{op} timed out after {:?}",
                self.deadline
            ))),
        }
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RefDataError> {
        self.ensure_online("get")?;
        self.bounded("get", self.inner.get(collection, id)).await
    }

    pub async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError> {
        self.ensure_online("query")?;
        self.bounded("query", self.inner.query(collection, filters, order_by))
            .await
    }

    pub async fn query_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>, RefDataError> {
        self.ensure_online("query_in")?;
        self.bounded("query_in", self.inner.query_in(collection, field, values))
            .await
    }

    pub async fn insert(&self, collection: &str, fields: Document) -> Result<String, RefDataError> {
        self.ensure_online("insert")?;
        self.bounded("insert", self.inner.insert(collection, fields))
            .await
    }

    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), RefDataError> {
        self.ensure_online("update")?;
        self.bounded("update", self.inner.update(collection, id, fields))
            .await
    }

    pub async fn batch_commit(&self, writes: Vec<BatchWrite>) -> Result<(), RefDataError> {
        self.ensure_online("batch_commit")?;
        self.bounded("batch_commit", self.inner.batch_commit(writes))
            .await
    }

    /// The deadline bounds subscription registration only; the standing query
    /// itself is long-lived.
    pub async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<DocumentWatch, RefDataError> {
        self.ensure_online("subscribe")?;
        self.bounded("subscribe", self.inner.subscribe(collection, filters))
            .await
    }
}
