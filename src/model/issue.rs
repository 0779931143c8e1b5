//! Issues, their per-run instances and fix information
//!
//! An issue persists across runs and is identified by its handle. Each run
//! that finds it adds an issue instance carrying the run-specific details.

use crate::Result;
use crate::dbid::{DbId, IssueDbId};
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyPart};
use crate::merge::{Merger, OnDuplicate};
use crate::storage::BackingStore;
use super::location::SourceLocation;
use super::{opt_id, opt_int, opt_text, text, KeyedRecord, Record, Row};
use rusqlite::types::Value;

/// An issue coming from the analysis
#[derive(Debug, Clone)]
pub struct Issue {
    pub id: IssueDbId,
    /// Identifies the issue across runs on different code revisions
    pub handle: String,
    /// Issue type
    pub code: i64,
    pub callable: String,
    pub filename: Option<String>,
    /// Unix seconds of the first run that found this issue
    pub first_seen: i64,
    pub run_id: DbId,
    /// Raw JSON of the original issue
    pub json: Option<String>,
}

impl Issue {
    pub fn new(
        handle: impl Into<String>,
        code: i64,
        callable: impl Into<String>,
        run_id: &DbId,
        first_seen: i64,
    ) -> Self {
        Self {
            id: IssueDbId::new(),
            handle: handle.into(),
            code,
            callable: callable.into(),
            filename: None,
            first_seen,
            run_id: run_id.clone(),
            json: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

impl Record for Issue {
    const KIND: EntityKind = EntityKind::Issue;

    fn id(&self) -> Option<&DbId> {
        Some(self.id.as_db_id())
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("handle", text(&self.handle)),
            ("code", Value::Integer(self.code)),
            ("callable", text(&self.callable)),
            ("filename", opt_text(self.filename.as_deref())),
            ("first_seen", Value::Integer(self.first_seen)),
            ("run_id", self.run_id.sql_value()?),
            ("json", opt_text(self.json.as_deref())),
        ]))
    }

    /// A handle showing up twice in one run is unexpected, so it is logged
    /// before being collapsed like any other duplicate.
    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_keys_with(items, OnDuplicate::Warn)
    }
}

impl KeyedRecord for Issue {
    const KEY_COLUMNS: &'static [&'static str] = &["handle"];

    fn placeholder(&self) -> &DbId {
        self.id.as_db_id()
    }

    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::from([KeyPart::from(self.handle.as_str())]))
    }
}

#[derive(Debug, Clone)]
pub struct IssueInstanceFixInfo {
    pub id: DbId,
    pub fix_info: String,
}

impl IssueInstanceFixInfo {
    pub fn new(fix_info: impl Into<String>) -> Self {
        Self {
            id: DbId::new(),
            fix_info: fix_info.into(),
        }
    }
}

impl Record for IssueInstanceFixInfo {
    const KIND: EntityKind = EntityKind::IssueInstanceFixInfo;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("fix_info", text(&self.fix_info)),
        ]))
    }
}

/// A particular instance of an issue found in a run
#[derive(Debug, Clone)]
pub struct IssueInstance {
    pub id: DbId,
    pub location: SourceLocation,
    pub filename: Option<String>,
    /// Locations with interesting taint information
    pub taint_locations: Vec<SourceLocation>,
    /// True if the issue did not exist before this instance
    pub is_new_issue: bool,
    pub run_id: DbId,
    pub issue_id: IssueDbId,
    pub fix_info_id: Option<DbId>,
    pub message_id: Option<DbId>,
    pub min_trace_length_to_sources: Option<i64>,
    pub min_trace_length_to_sinks: Option<i64>,
    /// The higher the rank, the higher the priority
    pub rank: i64,
    /// Number of issues in this callable for this run
    pub callable_count: i64,
}

impl IssueInstance {
    pub fn new(issue_id: &IssueDbId, run_id: &DbId, location: SourceLocation) -> Self {
        Self {
            id: DbId::new(),
            location,
            filename: None,
            taint_locations: Vec::new(),
            is_new_issue: false,
            run_id: run_id.clone(),
            issue_id: issue_id.clone(),
            fix_info_id: None,
            message_id: None,
            min_trace_length_to_sources: None,
            min_trace_length_to_sinks: None,
            rank: 0,
            callable_count: 0,
        }
    }
}

impl Record for IssueInstance {
    const KIND: EntityKind = EntityKind::IssueInstance;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("location", text(&self.location.to_string())),
            ("filename", opt_text(self.filename.as_deref())),
            ("taint_locations", text(&SourceLocation::join_list(&self.taint_locations))),
            ("is_new_issue", Value::Integer(i64::from(self.is_new_issue))),
            ("run_id", self.run_id.sql_value()?),
            ("issue_id", self.issue_id.sql_value()?),
            ("fix_info_id", opt_id(self.fix_info_id.as_ref())?),
            ("message_id", opt_id(self.message_id.as_ref())?),
            ("min_trace_length_to_sources", opt_int(self.min_trace_length_to_sources)),
            ("min_trace_length_to_sinks", opt_int(self.min_trace_length_to_sinks)),
            ("rank", Value::Integer(self.rank)),
            ("callable_count", Value::Integer(self.callable_count)),
        ]))
    }

    /// Carries over whether the parent issue was new in this run. Instances
    /// of a new run are always new rows; those of a stored run may have been
    /// written by an earlier attempt and are matched by key.
    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        let items = items
            .into_iter()
            .map(|mut instance| {
                instance.issue_id.resolved()?;
                instance.is_new_issue = instance.issue_id.is_new();
                Ok(instance)
            })
            .collect::<Result<Vec<_>>>()?;
        merger.merge_by_keys_if(items, |instance| !instance.run_id.is_new())
    }
}

impl KeyedRecord for IssueInstance {
    const KEY_COLUMNS: &'static [&'static str] = &["run_id", "issue_id", "location"];

    fn placeholder(&self) -> &DbId {
        &self.id
    }

    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::from([
            KeyPart::from(self.run_id.resolved()?),
            KeyPart::from(self.issue_id.resolved()?),
            KeyPart::from(self.location.to_string()),
        ]))
    }
}
