use crate::assignments::AssignmentRegistry;
use crate::bulk::BulkOperations;
use crate::cache::{TtlCache, DEFAULT_CACHE_TTL};
use crate::clock::{Clock, SystemClock};
use crate::error::RefDataError;
use crate::resolver::BankResolver;
use crate::store::{ConnectivityGate, DocumentStore, GatedStore};
use crate::sync::{BankFeed, RealTimeSynchronizer};
use crate::types::{AssignedBank, AssignmentType, BankAssignment, PlatformBank};
use std::sync::Arc;
use std::time::Duration;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct RefDataConfig {
    /// Validity window for cached resolutions.
    pub cache_ttl: Duration,
    /// Per-call deadline on every store operation; expiry surfaces as the
    /// same `Unavailable` condition as an unreachable store.
    pub store_deadline: Duration,
}

impl Default for RefDataConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_CACHE_TTL,
            store_deadline: Duration::from_secs(10),
        }
    }
}

/// Facade wiring the cache, resolver, registry, synchronizer, and write paths
/// over one injected store.
///
/// Owns its cache instance outright; construct isolated engines freely in
/// tests and control expiry through [`RefDataEngine::with_clock`].
pub struct RefDataEngine {
    gate: ConnectivityGate,
    resolver: BankResolver,
    registry: AssignmentRegistry,
    synchronizer: RealTimeSynchronizer,
    writes: BulkOperations,
}

impl RefDataEngine {
    pub fn new(store: Arc<dyn DocumentStore>, config: RefDataConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        config: RefDataConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let gate = ConnectivityGate::new();
        let gated = GatedStore::new(store, gate.clone(), config.store_deadline);
        let cache = Arc::new(TtlCache::new(config.cache_ttl, clock.clone()));

        let resolver = BankResolver::new(gated.clone(), cache.clone());
        let registry = AssignmentRegistry::new(
            gated.clone(),
            cache.clone(),
            resolver.clone(),
            clock.clone(),
        );
        let synchronizer = RealTimeSynchronizer::new(gated.clone(), resolver.clone());
        let writes = BulkOperations::new(gated, cache, clock);

        Self {
            gate,
            resolver,
            registry,
            synchronizer,
            writes,
        }
    }

    /// Connectivity transitions disable/enable outbound store traffic.
    pub fn connectivity(&self) -> &ConnectivityGate {
        &self.gate
    }

    // Batch resolution -----------------------------------------------------

    pub async fn resolve_banks(&self, ids: &[String]) -> Vec<PlatformBank> {
        self.resolver.resolve_banks(ids).await
    }

    pub async fn list_active_banks(&self) -> Vec<PlatformBank> {
        self.resolver.list_active_banks().await
    }

    // Assignments ----------------------------------------------------------

    pub async fn assign(
        &self,
        exchange_id: &str,
        bank_id: &str,
        assignment_type: AssignmentType,
        assigned_by: &str,
    ) -> Result<String, RefDataError> {
        self.registry
            .assign(exchange_id, bank_id, assignment_type, assigned_by)
            .await
    }

    pub async fn remove_assignment(
        &self,
        exchange_id: &str,
        bank_id: &str,
    ) -> Result<(), RefDataError> {
        self.registry.remove(exchange_id, bank_id).await
    }

    pub async fn list_for_exchange(&self, exchange_id: &str) -> Vec<BankAssignment> {
        self.registry.list_for_exchange(exchange_id).await
    }

    pub async fn list_all_assignments(&self) -> Vec<BankAssignment> {
        self.registry.list_all().await
    }

    pub async fn resolve_assigned_banks(&self, exchange_id: &str) -> Vec<AssignedBank> {
        self.registry.resolve_assigned_banks(exchange_id).await
    }

    // Real-time feeds ------------------------------------------------------

    pub async fn subscribe_active_banks(&self) -> BankFeed {
        self.synchronizer.subscribe_active_banks().await
    }

    pub async fn subscribe_exchange_banks(&self, exchange_id: &str) -> BankFeed {
        self.synchronizer.subscribe_exchange_banks(exchange_id).await
    }

    // Write paths ----------------------------------------------------------

    pub async fn bulk_set_bank_active(
        &self,
        ids: &[String],
        is_active: bool,
    ) -> Result<(), RefDataError> {
        self.writes.bulk_set_bank_active(ids, is_active).await
    }

    pub async fn update_bank(
        &self,
        id: &str,
        fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RefDataError> {
        self.writes.update_bank(id, fields).await
    }

    pub async fn update_bank_balance(&self, id: &str, delta_minor: i64) -> Result<i64, RefDataError> {
        self.writes.update_bank_balance(id, delta_minor).await
    }
}
