use crate::cache::RefDataCache;
use crate::clock::Clock;
use crate::error::RefDataError;
use crate::resolver::{cached, remember, BankResolver};
use crate::store::{BatchWrite, Filter, GatedStore};
use crate::types::{collections, AssignedBank, AssignmentType, BankAssignment, PlatformBank};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ALL_ASSIGNMENTS_KEY: &str = "assignments:all";

fn exchange_key(exchange_id: &str) -> String {
    format!("assignments:exchange:{exchange_id}")
}

fn pair_filters(exchange_id: &str, bank_id: &str) -> [Filter; 3] {
    [
        Filter::eq("exchange_id", exchange_id),
        Filter::eq("bank_id", bank_id),
        Filter::eq("is_active", true),
    ]
}

/// Create/remove/list bank-to-exchange assignments.
///
/// Removal is soft-delete only; records keep their audit fields after the
/// active flag flips. The at-most-one-active-pair invariant is enforced by
/// check-then-act against the store: two clients racing on the same pair can
/// still produce duplicates (the store enforces no uniqueness), which `remove`
/// tolerates by flipping every matching record.
pub struct AssignmentRegistry {
    store: GatedStore,
    cache: Arc<RefDataCache>,
    resolver: BankResolver,
    clock: Arc<dyn Clock>,
}

impl AssignmentRegistry {
    pub fn new(
        store: GatedStore,
        cache: Arc<RefDataCache>,
        resolver: BankResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cache,
            resolver,
            clock,
        }
    }

    /// Grant `exchange_id` the use of `bank_id`.
    ///
    /// Fails with `DuplicateAssignment` and performs no write when an active
    /// record for the pair already exists.
    pub async fn assign(
        &self,
        exchange_id: &str,
        bank_id: &str,
        assignment_type: AssignmentType,
        assigned_by: &str,
    ) -> Result<String, RefDataError> {
        let existing = self
            .store
            .query(
                collections::ASSIGNMENTS,
                &pair_filters(exchange_id, bank_id),
                None,
            )
            .await?;

        if !existing.is_empty() {
            return Err(RefDataError::DuplicateAssignment {
                exchange_id: exchange_id.to_string(),
                bank_id: bank_id.to_string(),
            });
        }

        let fields = json!({
            "exchange_id": exchange_id,
            "bank_id": bank_id,
            "assignment_type": assignment_type,
            "is_active": true,
            "priority": 1,
            "assigned_at": self.clock.now(),
            "assigned_by": assigned_by,
        });
        let id = self.store.insert(collections::ASSIGNMENTS, fields).await?;

        self.cache.invalidate(Some("assignments:"));
        info!(exchange_id, bank_id, assignment_id = %id, "bank assigned to exchange");
        Ok(id)
    }

    /// Soft-delete every active record for the pair in one atomic batch.
    ///
    /// Idempotent: removing an already-inactive pair is a successful no-op.
    /// Flipping *every* match also cleans up duplicates the creation race may
    /// have left behind.
    pub async fn remove(&self, exchange_id: &str, bank_id: &str) -> Result<(), RefDataError> {
        let active = self
            .store
            .query(
                collections::ASSIGNMENTS,
                &pair_filters(exchange_id, bank_id),
                None,
            )
            .await?;

        if active.is_empty() {
            debug!(exchange_id, bank_id, "remove is a no-op, pair not active");
            return Ok(());
        }

        let now = self.clock.now();
        let writes: Vec<BatchWrite> = active
            .iter()
            .filter_map(|doc| doc.get("id").and_then(|v| v.as_str()))
            .map(|id| {
                BatchWrite::merge(
                    collections::ASSIGNMENTS,
                    id,
                    json!({ "is_active": false, "updated_at": now }),
                )
            })
            .collect();
        let flipped = writes.len();
        self.store.batch_commit(writes).await?;

        self.cache.invalidate(Some("assignments:"));
        info!(exchange_id, bank_id, flipped, "assignment removed");
        Ok(())
    }

    /// Active assignments for one exchange. Read-path degradation: empty on
    /// store failure.
    pub async fn list_for_exchange(&self, exchange_id: &str) -> Vec<BankAssignment> {
        let key = exchange_key(exchange_id);
        if let Some(hit) = cached::<Vec<BankAssignment>>(&self.cache, &key) {
            return hit;
        }

        let docs = match self
            .store
            .query(
                collections::ASSIGNMENTS,
                &[
                    Filter::eq("exchange_id", exchange_id),
                    Filter::eq("is_active", true),
                ],
                None,
            )
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                warn!(exchange_id, error = %err, "assignment listing degraded to empty");
                return Vec::new();
            }
        };

        let assignments = decode_assignments(docs);
        remember(&self.cache, key, &assignments);
        assignments
    }

    /// Every active assignment across all exchanges.
    pub async fn list_all(&self) -> Vec<BankAssignment> {
        if let Some(hit) = cached::<Vec<BankAssignment>>(&self.cache, ALL_ASSIGNMENTS_KEY) {
            return hit;
        }

        let docs = match self
            .store
            .query(
                collections::ASSIGNMENTS,
                &[Filter::eq("is_active", true)],
                None,
            )
            .await
        {
            Ok(docs) => docs,
            Err(err) => {
                warn!(error = %err, "assignment listing degraded to empty");
                return Vec::new();
            }
        };

        let assignments = decode_assignments(docs);
        remember(&self.cache, ALL_ASSIGNMENTS_KEY, &assignments);
        assignments
    }

    /// Active assignments joined with their resolved bank records.
    ///
    /// Banks deactivated after assignment drop out of the usable set here;
    /// the assignment record itself stays untouched.
    pub async fn resolve_assigned_banks(&self, exchange_id: &str) -> Vec<AssignedBank> {
        let assignments = self.list_for_exchange(exchange_id).await;
        if assignments.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = assignments.iter().map(|a| a.bank_id.clone()).collect();
        let banks = self.resolver.resolve_banks(&ids).await;
        let by_id: HashMap<&str, &PlatformBank> =
            banks.iter().map(|bank| (bank.id.as_str(), bank)).collect();

        assignments
            .into_iter()
            .filter_map(|assignment| {
                let bank = by_id.get(assignment.bank_id.as_str())?;
                if !bank.is_active {
                    return None;
                }
                Some(AssignedBank {
                    bank: (*bank).clone(),
                    assignment,
                })
            })
            .collect()
    }
}

fn decode_assignments(docs: Vec<serde_json::Value>) -> Vec<BankAssignment> {
    docs.into_iter()
        .filter_map(|doc| match BankAssignment::from_document(doc) {
            Ok(assignment) => Some(assignment),
            Err(err) => {
                warn!(error = %err, "dropping malformed assignment record");
                None
            }
        })
        .collect()
}
