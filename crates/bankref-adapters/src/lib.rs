//! Document store backends for the bank reference-data core.
//!
//! `MemoryDocumentStore` is the deterministic push-capable backend used by
//! tests and local development; `PgDocumentStore` persists the same contract
//! in PostgreSQL; `UnavailableStore` fails every call for degraded-path
//! testing.

#![deny(unsafe_code)]

pub mod memory;
pub mod pg;
pub mod unavailable;

pub use memory::MemoryDocumentStore;
pub use pg::PgDocumentStore;
pub use unavailable::UnavailableStore;
