use async_trait::async_trait;
use bankref_core::error::RefDataError;
use bankref_core::store::{BatchWrite, Document, DocumentStore, DocumentWatch, Filter, OrderBy};

/// Store that fails every call with `Unavailable`.
///
/// Deterministic stand-in for an unreachable backend, used to exercise the
/// degraded read paths and write-path failure surfacing.
#[derive(Debug, Clone, Default)]
pub struct UnavailableStore;

impl UnavailableStore {
    fn refuse<T>(&self, op: &str) -> Result<T, RefDataError> {
        Err(RefDataError::Unavailable(format!("{op}: store unreachable")))
    }
}

#[async_trait]
impl DocumentStore for UnavailableStore {
    async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Document>, RefDataError> {
        self.refuse("get")
    }

    async fn query(
        &self,
        _collection: &str,
        _filters: &[Filter],
        _order_by: Option<&OrderBy>,
    ) -> Result<Vec<Document>, RefDataError> {
        self.refuse("query")
    }

    async fn query_in(
        &self,
        _collection: &str,
        _field: &str,
        _values: &[String],
    ) -> Result<Vec<Document>, RefDataError> {
        self.refuse("query_in")
    }

    async fn insert(&self, _collection: &str, _fields: Document) -> Result<String, RefDataError> {
        self.refuse("insert")
    }

    async fn update(
        &self,
        _collection: &str,
        _id: &str,
        _fields: Document,
    ) -> Result<(), RefDataError> {
        self.refuse("update")
    }

    async fn batch_commit(&self, _writes: Vec<BatchWrite>) -> Result<(), RefDataError> {
        self.refuse("batch_commit")
    }

    async fn subscribe(
        &self,
        _collection: &str,
        _filters: Vec<Filter>,
    ) -> Result<DocumentWatch, RefDataError> {
        self.refuse("subscribe")
    }
}
