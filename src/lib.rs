//! # taintstore - Batch persistence for static-analysis runs
//!
//! Analysis output is built as an in-memory graph of records that reference
//! each other before any row exists in the store. taintstore turns that
//! graph into rows:
//! - Placeholder identities (`DbId`) that resolve once real keys are known
//! - Key-based dedup against rows already in the store, in batched lookups
//! - Contiguous primary-key ranges from a durable, lockable counter
//! - A batch preparer that runs all of it in dependency order
//! - SQLite-backed storage implementing the `BackingStore` contract

pub mod dbid;
pub mod entity;
pub mod key;
pub mod model;
pub mod merge;
pub mod allocator;
pub mod prepare;
pub mod storage;
pub mod input;
pub mod config;
pub mod ui;

// Re-exports for convenient access
pub use dbid::{DbId, IdValue, IssueDbId};
pub use entity::EntityKind;
pub use key::{EntityKey, KeyPart};
pub use allocator::PrimaryKeyAllocator;
pub use merge::Merger;
pub use prepare::{persist, AnalysisBatch, BatchPreparer, BatchSummary, PersistOptions};
pub use storage::{BackingStore, SqliteStore};

/// Result type alias for taintstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for taintstore operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Identity #{0} was read before it was resolved")]
    Unresolved(u64),

    #[error("Identity #{local_id} is already resolved to {current}, cannot resolve it to {requested}")]
    AlreadyResolved {
        local_id: u64,
        current: String,
        requested: String,
    },

    #[error("Lock contention: {0}")]
    LockContention(String),

    #[error("Reserved primary key range exhausted for {0}")]
    RangeExhausted(EntityKind),

    #[error("{0} identities are generated by the store, not the allocator")]
    NotRegistered(EntityKind),

    #[error("{0} primary key range must be reserved before use")]
    NotReserved(EntityKind),

    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Lookup batch for {kind} binds {parameters} parameters, store limit is {limit}")]
    BatchTooLarge {
        kind: EntityKind,
        parameters: usize,
        limit: usize,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
