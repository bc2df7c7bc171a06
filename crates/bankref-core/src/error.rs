use thiserror::Error;

/// Reference-data core errors.
#[derive(Debug, Error)]
pub enum RefDataError {
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Exchange '{exchange_id}' already has an active assignment for bank '{bank_id}'")]
    DuplicateAssignment {
        exchange_id: String,
        bank_id: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Atomic batch write failed: {0}")]
    BatchFailure(String),

    #[error("Document decode failed: {0}")]
    Decode(String),

    #[error("Store error: {0}")]
    Store(String),
}

impl RefDataError {
    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Read paths treat this variant as "degrade to empty"; write paths surface it.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
