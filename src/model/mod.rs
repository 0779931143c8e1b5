//! Records - typed in-memory rows of an analysis run
//!
//! Every record type names its entity kind, exposes its placeholder identity,
//! knows how it is merged against the store, and serializes itself into a
//! `Row` of fully resolved column values.

pub mod location;
pub mod run;
pub mod shared_text;
pub mod issue;
pub mod trace;

use std::collections::BTreeMap;
use rusqlite::types::Value;
use crate::Result;
use crate::dbid::DbId;
use crate::entity::EntityKind;
use crate::key::EntityKey;
use crate::merge::Merger;
use crate::storage::BackingStore;

pub use location::SourceLocation;
pub use run::{Run, RunStatus};
pub use shared_text::{IssueInstanceSharedTextAssoc, SharedText, SharedTextKind};
pub use issue::{Issue, IssueInstance, IssueInstanceFixInfo};
pub use trace::{
    IssueInstanceTraceFrameAssoc, TraceFrame, TraceFrameAnnotation, TraceFrameLeafAssoc, TraceKind,
};

/// Column name to resolved value, ready for bulk insertion
pub type Row = BTreeMap<&'static str, Value>;

/// A record that can be prepared for insertion
pub trait Record: Sized {
    const KIND: EntityKind;

    /// Identity to fill from the allocator; `None` for associations
    fn id(&self) -> Option<&DbId>;

    /// Serialize using resolved identities only
    fn to_row(&self) -> Result<Row>;

    /// Drop records that must not be inserted, resolving their identities.
    ///
    /// Records are kept as they are unless the kind overrides this.
    fn merge<S: BackingStore + ?Sized>(_merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        Ok(items)
    }
}

/// A record deduplicated by a tuple of its column values
pub trait KeyedRecord: Record {
    /// Columns forming the key, in the order `key()` produces them
    const KEY_COLUMNS: &'static [&'static str];

    fn placeholder(&self) -> &DbId;

    fn key(&self) -> Result<EntityKey>;
}

/// A record joining two other records
pub trait AssocRecord: Record {
    fn endpoints(&self) -> (&DbId, &DbId);
}

pub(crate) fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, text)
}

pub(crate) fn opt_int(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::Integer)
}

pub(crate) fn opt_id(value: Option<&DbId>) -> Result<Value> {
    match value {
        Some(id) => id.sql_value(),
        None => Ok(Value::Null),
    }
}
