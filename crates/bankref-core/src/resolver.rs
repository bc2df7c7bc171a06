use crate::cache::RefDataCache;
use crate::store::{Filter, GatedStore, OrderBy};
use crate::types::{collections, PlatformBank};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cache key for a bank id set: sorted and comma-joined, so two requests for
/// the same set in different orders land on the same entry.
pub fn bank_set_key(ids: &BTreeSet<String>) -> String {
    let joined = ids.iter().cloned().collect::<Vec<_>>().join(",");
    format!("banks:{joined}")
}

pub(crate) const ACTIVE_BANKS_KEY: &str = "banks:active";

pub(crate) fn cached<T: DeserializeOwned>(cache: &RefDataCache, key: &str) -> Option<T> {
    let raw = cache.get(key)?;
    serde_json::from_value(raw).ok()
}

pub(crate) fn remember<T: Serialize>(cache: &RefDataCache, key: impl Into<String>, value: &T) {
    if let Ok(raw) = serde_json::to_value(value) {
        cache.set(key, raw);
    }
}

/// Resolves sets of bank identifiers into bank records with one store query
/// per distinct set, reading through the shared TTL cache.
#[derive(Clone)]
pub struct BankResolver {
    store: GatedStore,
    cache: Arc<RefDataCache>,
}

impl BankResolver {
    pub fn new(store: GatedStore, cache: Arc<RefDataCache>) -> Self {
        Self { store, cache }
    }

    /// Resolve `ids` to bank records.
    ///
    /// Read-path degradation: an unreachable store or a malformed record
    /// yields an empty list, never a fault. Callers must treat empty as
    /// "unknown", not "confirmed none".
    pub async fn resolve_banks(&self, ids: &[String]) -> Vec<PlatformBank> {
        let id_set: BTreeSet<String> = ids.iter().cloned().collect();
        if id_set.is_empty() {
            return Vec::new();
        }

        let key = bank_set_key(&id_set);
        if let Some(hit) = cached::<Vec<PlatformBank>>(&self.cache, &key) {
            debug!(key, banks = hit.len(), "bank set served from cache");
            return hit;
        }

        let values: Vec<String> = id_set.into_iter().collect();
        let docs = match self
            .store
            .query_in(collections::BANKS, "id", &values)
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                warn!(error = %err, "bank batch resolution degraded to empty");
                return Vec::new();
            }
        };

        let mut banks = Vec::with_capacity(docs.len());
        for doc in docs {
            match PlatformBank::from_document(doc) {
                Ok(bank) => banks.push(bank),
                Err(err) => {
                    warn!(error = %err, "malformed bank record, degrading to empty");
                    return Vec::new();
                }
            }
        }
        banks.sort_by(|a, b| (a.priority, a.name.as_str()).cmp(&(b.priority, b.name.as_str())));

        remember(&self.cache, key, &banks);
        banks
    }

    /// Active banks ordered by priority (lower preferred). Inactive banks
    /// never appear here, though they stay resolvable by id.
    pub async fn list_active_banks(&self) -> Vec<PlatformBank> {
        if let Some(hit) = cached::<Vec<PlatformBank>>(&self.cache, ACTIVE_BANKS_KEY) {
            return hit;
        }

        let docs = match self
            .store
            .query(
                collections::BANKS,
                &[Filter::eq("is_active", true)],
                Some(&OrderBy::asc("priority")),
            )
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                warn!(error = %err, "active bank listing degraded to empty");
                return Vec::new();
            }
        };

        let banks = decode_active_banks(docs);
        remember(&self.cache, ACTIVE_BANKS_KEY, &banks);
        banks
    }
}

/// Decode a bank result set for an active-banks view: malformed records are
/// dropped, inactive records filtered, output ordered by priority.
pub(crate) fn decode_active_banks(docs: Vec<serde_json::Value>) -> Vec<PlatformBank> {
    let mut banks: Vec<PlatformBank> = docs
        .into_iter()
        .filter_map(|doc| match PlatformBank::from_document(doc) {
            Ok(bank) => Some(bank),
            Err(err) => {
                warn!(error = %err, "dropping malformed bank record from listing");
                None
            }
        })
        .filter(|bank| bank.is_active)
        .collect();
    banks.sort_by(|a, b| (a.priority, a.name.as_str()).cmp(&(b.priority, b.name.as_str())));
    banks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_support::ManualClock;
    use crate::cache::{TtlCache, DEFAULT_CACHE_TTL};
    use crate::error::RefDataError;
    use crate::store::{BatchWrite, ConnectivityGate, Document, DocumentStore, DocumentWatch};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Store double serving canned bank documents and counting calls.
    struct FixtureStore {
        banks: Vec<Document>,
        query_in_calls: AtomicUsize,
        fail: bool,
    }

    impl FixtureStore {
        fn with_banks(banks: Vec<Document>) -> Self {
            Self {
                banks,
                query_in_calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn unreachable() -> Self {
            Self {
                banks: Vec::new(),
                query_in_calls: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FixtureStore {
        async fn get(&self, _c: &str, _id: &str) -> Result<Option<Document>, RefDataError> {
            Ok(None)
        }

        async fn query(
            &self,
            _c: &str,
            _f: &[Filter],
            _o: Option<&OrderBy>,
        ) -> Result<Vec<Document>, RefDataError> {
            if self.fail {
                return Err(RefDataError::Unavailable("fixture offline".into()));
            }
            Ok(self.banks.clone())
        }

        async fn query_in(
            &self,
            _c: &str,
            field: &str,
            values: &[String],
        ) -> Result<Vec<Document>, RefDataError> {
            self.query_in_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RefDataError::Unavailable("fixture offline".into()));
            }
            Ok(self
                .banks
                .iter()
                .filter(|doc| {
                    doc.get(field)
                        .and_then(|v| v.as_str())
                        .is_some_and(|v| values.iter().any(|want| want == v))
                })
                .cloned()
                .collect())
        }

        async fn insert(&self, _c: &str, _fields: Document) -> Result<String, RefDataError> {
            Err(RefDataError::Store("fixture is read-only".into()))
        }

        async fn update(&self, _c: &str, _id: &str, _f: Document) -> Result<(), RefDataError> {
            Err(RefDataError::Store("fixture is read-only".into()))
        }

        async fn batch_commit(&self, _writes: Vec<BatchWrite>) -> Result<(), RefDataError> {
            Err(RefDataError::Store("fixture is read-only".into()))
        }

        async fn subscribe(
            &self,
            _c: &str,
            _f: Vec<Filter>,
        ) -> Result<DocumentWatch, RefDataError> {
            Err(RefDataError::Store("fixture has no subscriptions".into()))
        }
    }

    fn bank_doc(id: &str, priority: i64) -> Document {
        json!({
            "id": id,
            "name": format!("Bank {id}"),
            "is_active": true,
            "priority": priority,
        })
    }

    fn resolver_over(store: Arc<FixtureStore>) -> (BankResolver, Arc<RefDataCache>) {
        let clock = Arc::new(ManualClock::at(
            Utc.timestamp_opt(1_736_000_000, 0).single().unwrap(),
        ));
        let cache = Arc::new(TtlCache::new(DEFAULT_CACHE_TTL, clock));
        let gated = GatedStore::new(store, ConnectivityGate::new(), Duration::from_secs(5));
        (BankResolver::new(gated, cache.clone()), cache)
    }

    #[tokio::test]
    async fn empty_id_set_never_touches_store() {
        let store = Arc::new(FixtureStore::with_banks(vec![bank_doc("b1", 1)]));
        let (resolver, _cache) = resolver_over(store.clone());

        let banks = resolver.resolve_banks(&[]).await;
        assert!(banks.is_empty());
        assert_eq!(store.query_in_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn id_order_does_not_affect_cache_key() {
        let store = Arc::new(FixtureStore::with_banks(vec![
            bank_doc("b1", 2),
            bank_doc("b2", 1),
        ]));
        let (resolver, _cache) = resolver_over(store.clone());

        let first = resolver
            .resolve_banks(&["b2".to_string(), "b1".to_string()])
            .await;
        let second = resolver
            .resolve_banks(&["b1".to_string(), "b2".to_string()])
            .await;

        assert_eq!(first, second);
        assert_eq!(store.query_in_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn resolution_orders_by_priority() {
        let store = Arc::new(FixtureStore::with_banks(vec![
            bank_doc("b1", 5),
            bank_doc("b2", 1),
        ]));
        let (resolver, _cache) = resolver_over(store);

        let banks = resolver
            .resolve_banks(&["b1".to_string(), "b2".to_string()])
            .await;
        assert_eq!(banks[0].id, "b2");
        assert_eq!(banks[1].id, "b1");
    }

    #[tokio::test]
    async fn unreachable_store_degrades_to_empty() {
        let store = Arc::new(FixtureStore::unreachable());
        let (resolver, cache) = resolver_over(store);

        let banks = resolver.resolve_banks(&["b1".to_string()]).await;
        assert!(banks.is_empty());
        // Degraded results are never cached.
        assert!(cache.is_empty());

        let listed = resolver.list_active_banks().await;
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn malformed_record_degrades_to_empty() {
        let store = Arc::new(FixtureStore::with_banks(vec![json!({ "id": "b1" })]));
        let (resolver, _cache) = resolver_over(store);

        let banks = resolver.resolve_banks(&["b1".to_string()]).await;
        assert!(banks.is_empty());
    }

    #[tokio::test]
    async fn offline_gate_short_circuits_reads() {
        let store = Arc::new(FixtureStore::with_banks(vec![bank_doc("b1", 1)]));
        let clock = Arc::new(ManualClock::at(
            Utc.timestamp_opt(1_736_000_000, 0).single().unwrap(),
        ));
        let cache = Arc::new(TtlCache::new(DEFAULT_CACHE_TTL, clock));
        let gate = ConnectivityGate::new();
        let gated = GatedStore::new(store.clone(), gate.clone(), Duration::from_secs(5));
        let resolver = BankResolver::new(gated, cache);

        gate.set_offline();
        let banks = resolver.resolve_banks(&["b1".to_string()]).await;
        assert!(banks.is_empty());
        assert_eq!(store.query_in_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn set_key_is_sorted_and_joined() {
        let ids: BTreeSet<String> = ["b9", "b1", "b5"].iter().map(|s| s.to_string()).collect();
        assert_eq!(bank_set_key(&ids), "banks:b1,b5,b9");
    }
}
