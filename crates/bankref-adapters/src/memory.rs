use async_trait::async_trait;
use bankref_core::error::RefDataError;
use bankref_core::store::{
    document_watch, BatchWrite, Document, DocumentStore, DocumentWatch, Filter, FilterOp, OrderBy,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

type Collections = HashMap<String, BTreeMap<String, Document>>;

struct Inner {
    collections: Mutex<Collections>,
    changes: broadcast::Sender<String>,
    query_calls: AtomicUsize,
    query_in_calls: AtomicUsize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Collections> {
        match self.collections.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn run_query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Vec<Document> {
        let collections = self.lock();
        let mut docs: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filters.iter().all(|f| matches_filter(doc, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(order) = order_by {
            docs.sort_by(|a, b| {
                let ordering = compare_fields(a.get(&order.field), b.get(&order.field));
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        docs
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine; subscriptions come and go.
        let _ = self.changes.send(collection.to_string());
    }
}

fn matches_filter(doc: &Document, filter: &Filter) -> bool {
    let Some(actual) = doc.get(&filter.field) else {
        return false;
    };
    match filter.op {
        FilterOp::Eq => actual == &filter.value,
        FilterOp::Gte => compare_fields(Some(actual), Some(&filter.value)).is_ge(),
        FilterOp::Lte => compare_fields(Some(actual), Some(&filter.value)).is_le(),
    }
}

fn compare_fields(a: Option<&Document>, b: Option<&Document>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => a
                .as_str()
                .unwrap_or_default()
                .cmp(b.as_str().unwrap_or_default()),
        },
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Deterministic in-memory document store with push-notification support.
///
/// The primary backend for tests and local development: every write notifies
/// standing queries, which re-evaluate and emit a fresh snapshot whenever
/// their result set changed.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(HashMap::new()),
                changes,
                query_calls: AtomicUsize::new(0),
                query_in_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Insert a document under a caller-chosen id, bypassing id assignment.
    pub fn seed(&self, collection: &str, id: &str, mut doc: Document) {
        if let Some(fields) = doc.as_object_mut() {
            fields.insert("id".to_string(), serde_json::json!(id));
        }
        self.inner
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        self.inner.notify(collection);
    }

    /// Number of `query` calls served, for cache-behavior assertions.
    pub fn query_calls(&self) -> usize {
        self.inner.query_calls.load(Ordering::SeqCst)
    }

    /// Number of `query_in` calls served, for cache-behavior assertions.
    pub fn query_in_calls(&self) -> usize {
        self.inner.query_in_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, RefDataError> {
        Ok(self
            .inner
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
        order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError> {
        self.inner.query_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.inner.run_query(collection, filters, order_by))
    }

    async fn query_in(
        &self,
        collection: &str,
        field: &str,
        values: &[String],
    ) -> Result<Vec<Document>, RefDataError> {
        self.inner.query_in_calls.fetch_add(1, Ordering::SeqCst);
        let collections = self.inner.lock();
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| {
                        doc.get(field)
                            .and_then(|v| v.as_str())
                            .is_some_and(|v| values.iter().any(|want| want == v))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, collection: &str, mut fields: Document) -> Result<String, RefDataError> {
        let id = Uuid::new_v4().to_string();
        match fields.as_object_mut() {
            Some(map) => {
                map.insert("id".to_string(), serde_json::json!(id));
            }
            None => {
                return Err(RefDataError::Store(
                    "insert payload must be a JSON object".to_string(),
                ))
            }
        }
        self.inner
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.clone(), fields);
        self.inner.notify(collection);
        debug!(collection, id = %id, "document inserted");
        Ok(id)
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<(), RefDataError> {
        let Some(patch) = fields.as_object() else {
            return Err(RefDataError::Store(
                "update payload must be a JSON object".to_string(),
            ));
        };

        {
            let mut collections = self.inner.lock();
            let doc = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| RefDataError::not_found(collection, id))?;
            let Some(target) = doc.as_object_mut() else {
                return Err(RefDataError::Store(format!(
                    "stored document {collection}/{id} is not an object"
                )));
            };
            for (key, value) in patch {
                target.insert(key.clone(), value.clone());
            }
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn batch_commit(&self, writes: Vec<BatchWrite>) -> Result<(), RefDataError> {
        let mut touched: Vec<String> = Vec::new();
        {
            let mut collections = self.inner.lock();

            // Validate the whole batch before mutating anything; a missing
            // target fails the commit with no partial effect.
            for write in &writes {
                let exists = collections
                    .get(&write.collection)
                    .is_some_and(|docs| docs.contains_key(&write.id));
                if !exists {
                    return Err(RefDataError::BatchFailure(format!(
                        "missing document {}/{}",
                        write.collection, write.id
                    )));
                }
                if write.fields.as_object().is_none() {
                    return Err(RefDataError::BatchFailure(format!(
                        "non-object patch for {}/{}",
                        write.collection, write.id
                    )));
                }
            }

            for write in &writes {
                let doc = collections
                    .get_mut(&write.collection)
                    .and_then(|docs| docs.get_mut(&write.id));
                if let (Some(target), Some(patch)) =
                    (doc.and_then(|d| d.as_object_mut()), write.fields.as_object())
                {
                    for (key, value) in patch {
                        target.insert(key.clone(), value.clone());
                    }
                }
                if !touched.contains(&write.collection) {
                    touched.push(write.collection.clone());
                }
            }
        }

        for collection in touched {
            self.inner.notify(&collection);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        collection: &str,
        filters: Vec<Filter>,
    ) -> Result<DocumentWatch, RefDataError> {
        let (publisher, watch) = document_watch();
        let inner = self.inner.clone();
        let collection = collection.to_string();
        let mut changes = inner.changes.subscribe();
        let mut cancelled = publisher.cancel_signal();

        tokio::spawn(async move {
            let mut last = inner.run_query(&collection, &filters, None);
            if !publisher.publish(last.clone()) {
                return;
            }

            loop {
                tokio::select! {
                    _ = cancelled.changed() => break,
                    changed = changes.recv() => match changed {
                        Ok(touched) if touched == collection => {
                            let current = inner.run_query(&collection, &filters, None);
                            if current != last {
                                if !publisher.publish(current.clone()) {
                                    break;
                                }
                                last = current;
                            }
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // Missed notifications collapse into one re-query.
                            let current = inner.run_query(&collection, &filters, None);
                            if current != last {
                                if !publisher.publish(current.clone()) {
                                    break;
                                }
                                last = current;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_banks() -> MemoryDocumentStore {
        let store = MemoryDocumentStore::new();
        store.seed(
            "platform_banks",
            "b1",
            json!({ "name": "Alpha", "is_active": true, "priority": 2 }),
        );
        store.seed(
            "platform_banks",
            "b2",
            json!({ "name": "Beta", "is_active": true, "priority": 1 }),
        );
        store.seed(
            "platform_banks",
            "b3",
            json!({ "name": "Gamma", "is_active": false, "priority": 3 }),
        );
        store
    }

    #[tokio::test]
    async fn query_filters_and_orders() {
        let store = store_with_banks();
        let docs = store
            .query(
                "platform_banks",
                &[Filter::eq("is_active", true)],
                Some(&OrderBy::asc("priority")),
            )
            .await
            .unwrap();

        let names: Vec<&str> = docs
            .iter()
            .filter_map(|d| d.get("name").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);
    }

    #[tokio::test]
    async fn query_in_matches_id_field() {
        let store = store_with_banks();
        let docs = store
            .query_in(
                "platform_banks",
                "id",
                &["b1".to_string(), "b3".to_string(), "missing".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let store = store_with_banks();
        store
            .update("platform_banks", "b1", json!({ "is_active": false }))
            .await
            .unwrap();

        let doc = store.get("platform_banks", "b1").await.unwrap().unwrap();
        assert_eq!(doc.get("is_active"), Some(&json!(false)));
        assert_eq!(doc.get("name"), Some(&json!("Alpha")));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store
            .update("platform_banks", "nope", json!({ "is_active": false }))
            .await
            .unwrap_err();
        assert!(matches!(err, RefDataError::NotFound { .. }));
    }

    #[tokio::test]
    async fn batch_commit_is_all_or_nothing() {
        let store = store_with_banks();
        let writes = vec![
            BatchWrite::merge("platform_banks", "b1", json!({ "is_active": false })),
            BatchWrite::merge("platform_banks", "missing", json!({ "is_active": false })),
        ];

        let err = store.batch_commit(writes).await.unwrap_err();
        assert!(matches!(err, RefDataError::BatchFailure(_)));

        // First write must not have been applied.
        let doc = store.get("platform_banks", "b1").await.unwrap().unwrap();
        assert_eq!(doc.get("is_active"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn subscription_emits_initial_then_changes() {
        let store = store_with_banks();
        let mut watch = store
            .subscribe("platform_banks", vec![Filter::eq("is_active", true)])
            .await
            .unwrap();

        let initial = watch.next().await.unwrap();
        assert_eq!(initial.len(), 2);

        store
            .update("platform_banks", "b2", json!({ "is_active": false }))
            .await
            .unwrap();

        let after = watch.next().await.unwrap();
        assert_eq!(after.len(), 1);
    }

    #[tokio::test]
    async fn subscription_skips_no_op_writes() {
        let store = store_with_banks();
        let mut watch = store
            .subscribe("platform_banks", vec![Filter::eq("is_active", true)])
            .await
            .unwrap();
        let _ = watch.next().await.unwrap();

        // Write to an unrelated collection; result set is unchanged.
        store.seed("users", "u1", json!({ "role": "admin" }));
        store
            .update("platform_banks", "b2", json!({ "description": "promoted" }))
            .await
            .unwrap();

        let after = watch.next().await.unwrap();
        // The only emission is the description change re-query (result set
        // content changed), not the unrelated collection write.
        assert!(after
            .iter()
            .any(|d| d.get("description") == Some(&json!("promoted"))));
    }
}
