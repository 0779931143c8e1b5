//! Storage Layer - the contract the engine needs from a backing store
//!
//! The merge engine, allocator and preparer only talk to a `BackingStore`:
//! - counter rows read and written under an exclusive lock
//! - existing rows looked up by batches of key tuples
//! - bulk insertion of resolved rows
//!
//! `SqliteStore` is the SQLite-backed implementation, with tables:
//! - primary_keys(table_name, current_id)
//! - runs, shared_texts, issues, issue_instances, issue_instance_fix_info
//! - trace_frames, trace_frame_annotations
//! - issue_instance_shared_text_assoc, issue_instance_trace_frame_assoc,
//!   trace_frame_leaf_assoc

pub mod schema;
pub mod sqlite;

pub use sqlite::{NewIssueInstance, RunSummary, SqliteStore, StoreOptions, StoreStats};

use crate::Result;
use crate::entity::EntityKind;
use crate::key::EntityKey;
use crate::model::Row;

/// A stored row matched by key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingRow {
    pub id: i64,
    pub key: EntityKey,
}

pub trait BackingStore {
    /// Take the exclusive lock on `kind`'s counter row and read it.
    ///
    /// Returns `Error::LockContention` if the lock is held elsewhere. The
    /// lock is held until `release_counter`; if the read fails it is
    /// released before returning.
    fn lock_counter(&self, kind: EntityKind) -> Result<Option<i64>>;

    /// Write `kind`'s counter while holding its lock
    fn store_counter(&self, kind: EntityKind, current_id: i64) -> Result<()>;

    /// Commit (durably) or roll back the counter update and release the lock
    fn release_counter(&self, commit: bool) -> Result<()>;

    /// Largest identity stored for `kind`, 0 if there is none
    fn max_existing_id(&self, kind: EntityKind) -> Result<i64>;

    /// Rows of `kind` whose `columns` equal any of `keys`
    fn find_existing(&self, kind: EntityKind, columns: &[&str], keys: &[EntityKey]) -> Result<Vec<ExistingRow>>;

    /// Insert rows of `kind`, returning the number inserted. Association
    /// rows whose pair is already stored are skipped.
    fn bulk_insert(&self, kind: EntityKind, rows: &[Row]) -> Result<usize>;

    /// Most parameters a single `find_existing` call may bind
    fn max_parameters(&self) -> usize;
}
