use crate::cache::RefDataCache;
use crate::clock::Clock;
use crate::error::RefDataError;
use crate::store::{BatchWrite, GatedStore};
use crate::types::{collections, PlatformBank};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Bank write paths: atomic multi-record status flips and single-record
/// maintenance. Every mutation here invalidates the cache entries it may have
/// staled; the bulk path clears the whole cache because affected-id sets are
/// not tracked per entry.
pub struct BulkOperations {
    store: GatedStore,
    cache: Arc<RefDataCache>,
    clock: Arc<dyn Clock>,
}

impl BulkOperations {
    pub fn new(store: GatedStore, cache: Arc<RefDataCache>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            cache,
            clock,
        }
    }

    /// Flip `is_active` on every listed bank in one atomic batch.
    ///
    /// All-or-nothing: on failure no document changed and the cache is left
    /// alone, so the caller may retry the whole batch.
    pub async fn bulk_set_bank_active(
        &self,
        ids: &[String],
        is_active: bool,
    ) -> Result<(), RefDataError> {
        if ids.is_empty() {
            debug!("bulk status change with no ids is a no-op");
            return Ok(());
        }

        let now = self.clock.now();
        let writes: Vec<BatchWrite> = ids
            .iter()
            .map(|id| {
                BatchWrite::merge(
                    collections::BANKS,
                    id,
                    json!({ "is_active": is_active, "updated_at": now }),
                )
            })
            .collect();
        self.store.batch_commit(writes).await?;

        // Whole-cache clear: any cached resolution may reference these ids.
        self.cache.clear();
        info!(banks = ids.len(), is_active, "bulk bank status change committed");
        Ok(())
    }

    /// Merge `fields` into one bank record.
    pub async fn update_bank(
        &self,
        id: &str,
        mut fields: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), RefDataError> {
        fields.insert("updated_at".to_string(), json!(self.clock.now()));
        self.store
            .update(collections::BANKS, id, serde_json::Value::Object(fields))
            .await?;

        self.cache.invalidate(Some("banks:"));
        debug!(bank_id = id, "bank record updated");
        Ok(())
    }

    /// Apply a signed delta to a bank balance.
    pub async fn update_bank_balance(
        &self,
        id: &str,
        delta_minor: i64,
    ) -> Result<i64, RefDataError> {
        let doc = self
            .store
            .get(collections::BANKS, id)
            .await?
            .ok_or_else(|| RefDataError::not_found(collections::BANKS, id))?;
        let bank = PlatformBank::from_document(doc)?;

        let balance_minor = bank.balance_minor.saturating_add(delta_minor);
        self.store
            .update(
                collections::BANKS,
                id,
                json!({ "balance_minor": balance_minor, "updated_at": self.clock.now() }),
            )
            .await?;

        self.cache.invalidate(Some("banks:"));
        info!(bank_id = id, delta_minor, balance_minor, "bank balance updated");
        Ok(balance_minor)
    }
}
