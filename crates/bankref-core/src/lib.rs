//! Reference-data access and caching core for exchange transfer platforms.
//!
//! Resolves which settlement banks are usable by which exchange, derives the
//! applicable commission for a transfer, and keeps the resolved view
//! consistent under concurrent writes and push notifications while bounding
//! redundant reads against the remote document store with a TTL cache.

#![deny(unsafe_code)]

pub mod assignments;
pub mod bulk;
pub mod cache;
pub mod clock;
pub mod commission;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod store;
pub mod sync;
pub mod types;

pub use assignments::AssignmentRegistry;
pub use bulk::BulkOperations;
pub use cache::{RefDataCache, TtlCache, DEFAULT_CACHE_TTL};
pub use clock::{Clock, SystemClock};
pub use commission::{default_rate, resolve_rate};
pub use engine::{RefDataConfig, RefDataEngine};
pub use error::RefDataError;
pub use resolver::{bank_set_key, BankResolver};
pub use store::{
    document_watch, BatchWrite, ConnectivityGate, Document, DocumentStore, DocumentWatch, Filter,
    FilterOp, GatedStore, OrderBy, WatchPublisher,
};
pub use sync::{BankFeed, RealTimeSynchronizer};
pub use types::{
    collections, AssignedBank, AssignmentType, BankAssignment, CliqDetails, CliqMethod,
    CommissionRate, CommissionRates, PlatformBank, RateKind, TransferDirection, UserProfile,
    UserRole,
};
