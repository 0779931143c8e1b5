//! Trace frames - call edges of taint traces - with their annotations and
//! associations to issue instances and leaves
//!
//! Frames are keyed within their run. A new run can never match a stored
//! frame, so the lookup only finds rows when a run with a stored `job_id` is
//! persisted again, e.g. to finish a batch that failed part way. Annotations
//! are looked up only for such reused frames.

use crate::{Error, Result};
use crate::dbid::DbId;
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyPart};
use crate::merge::Merger;
use crate::storage::BackingStore;
use super::location::SourceLocation;
use super::{opt_int, opt_text, text, AssocRecord, KeyedRecord, Record, Row};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// Backward trace, towards sinks
    Precondition,
    /// Forward trace, towards sources
    Postcondition,
}

impl TraceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceKind::Precondition => "precondition",
            TraceKind::Postcondition => "postcondition",
        }
    }
}

impl FromStr for TraceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "precondition" | "pre" => Ok(TraceKind::Precondition),
            "postcondition" | "post" => Ok(TraceKind::Postcondition),
            _ => Err(Error::Parse(format!("Unknown trace kind: {}", s))),
        }
    }
}

impl std::fmt::Display for TraceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One call edge of a trace within a run
#[derive(Debug, Clone)]
pub struct TraceFrame {
    pub id: DbId,
    pub kind: TraceKind,
    /// The function that produces the tainted trace
    pub caller: String,
    pub caller_port: String,
    /// The call within the caller
    pub callee: String,
    pub callee_port: String,
    pub callee_location: SourceLocation,
    pub filename: String,
    pub run_id: DbId,
    pub type_interval_lower: Option<i64>,
    pub type_interval_upper: Option<i64>,
    pub preserves_type_context: bool,
    /// Taint-in-taint-out locations
    pub titos: Vec<SourceLocation>,
}

impl TraceFrame {
    pub fn new(
        kind: TraceKind,
        caller: impl Into<String>,
        callee: impl Into<String>,
        callee_location: SourceLocation,
        filename: impl Into<String>,
        run_id: &DbId,
    ) -> Self {
        Self {
            id: DbId::new(),
            kind,
            caller: caller.into(),
            caller_port: String::new(),
            callee: callee.into(),
            callee_port: String::new(),
            callee_location,
            filename: filename.into(),
            run_id: run_id.clone(),
            type_interval_lower: None,
            type_interval_upper: None,
            preserves_type_context: false,
            titos: Vec::new(),
        }
    }

    pub fn with_ports(mut self, caller_port: impl Into<String>, callee_port: impl Into<String>) -> Self {
        self.caller_port = caller_port.into();
        self.callee_port = callee_port.into();
        self
    }
}

impl Record for TraceFrame {
    const KIND: EntityKind = EntityKind::TraceFrame;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("kind", text(self.kind.as_str())),
            ("caller", text(&self.caller)),
            ("caller_port", text(&self.caller_port)),
            ("callee", text(&self.callee)),
            ("callee_port", text(&self.callee_port)),
            ("callee_location", text(&self.callee_location.to_string())),
            ("filename", text(&self.filename)),
            ("run_id", self.run_id.sql_value()?),
            ("type_interval_lower", opt_int(self.type_interval_lower)),
            ("type_interval_upper", opt_int(self.type_interval_upper)),
            ("preserves_type_context", Value::Integer(i64::from(self.preserves_type_context))),
            ("titos", text(&SourceLocation::join_list(&self.titos))),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_keys(items)
    }
}

impl KeyedRecord for TraceFrame {
    const KEY_COLUMNS: &'static [&'static str] = &[
        "run_id",
        "kind",
        "caller",
        "caller_port",
        "callee",
        "callee_port",
        "callee_location",
    ];

    fn placeholder(&self) -> &DbId {
        &self.id
    }

    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::from([
            KeyPart::from(self.run_id.resolved()?),
            KeyPart::from(self.kind.as_str()),
            KeyPart::from(self.caller.as_str()),
            KeyPart::from(self.caller_port.as_str()),
            KeyPart::from(self.callee.as_str()),
            KeyPart::from(self.callee_port.as_str()),
            KeyPart::from(self.callee_location.to_string()),
        ]))
    }
}

/// Extra bits of information shown on a trace frame
#[derive(Debug, Clone)]
pub struct TraceFrameAnnotation {
    pub id: DbId,
    pub location: SourceLocation,
    pub message: String,
    pub link: Option<String>,
    /// Link to possible pre/post traces
    pub trace_key: Option<String>,
    pub trace_frame_id: DbId,
}

impl TraceFrameAnnotation {
    pub fn new(trace_frame_id: &DbId, location: SourceLocation, message: impl Into<String>) -> Self {
        Self {
            id: DbId::new(),
            location,
            message: message.into(),
            link: None,
            trace_key: None,
            trace_frame_id: trace_frame_id.clone(),
        }
    }
}

impl Record for TraceFrameAnnotation {
    const KIND: EntityKind = EntityKind::TraceFrameAnnotation;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("location", text(&self.location.to_string())),
            ("message", text(&self.message)),
            ("link", opt_text(self.link.as_deref())),
            ("trace_key", opt_text(self.trace_key.as_deref())),
            ("trace_frame_id", self.trace_frame_id.sql_value()?),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_keys_if(items, |annotation| !annotation.trace_frame_id.is_new())
    }
}

impl KeyedRecord for TraceFrameAnnotation {
    const KEY_COLUMNS: &'static [&'static str] = &["trace_frame_id", "location", "message"];

    fn placeholder(&self) -> &DbId {
        &self.id
    }

    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::from([
            KeyPart::from(self.trace_frame_id.resolved()?),
            KeyPart::from(self.location.to_string()),
            KeyPart::from(self.message.as_str()),
        ]))
    }
}

#[derive(Debug, Clone)]
pub struct IssueInstanceTraceFrameAssoc {
    pub issue_instance_id: DbId,
    pub trace_frame_id: DbId,
}

impl IssueInstanceTraceFrameAssoc {
    pub fn new(issue_instance_id: &DbId, trace_frame_id: &DbId) -> Self {
        Self {
            issue_instance_id: issue_instance_id.clone(),
            trace_frame_id: trace_frame_id.clone(),
        }
    }
}

impl Record for IssueInstanceTraceFrameAssoc {
    const KIND: EntityKind = EntityKind::IssueInstanceTraceFrameAssoc;

    fn id(&self) -> Option<&DbId> {
        None
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("issue_instance_id", self.issue_instance_id.sql_value()?),
            ("trace_frame_id", self.trace_frame_id.sql_value()?),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_pair(items)
    }
}

impl AssocRecord for IssueInstanceTraceFrameAssoc {
    fn endpoints(&self) -> (&DbId, &DbId) {
        (&self.issue_instance_id, &self.trace_frame_id)
    }
}

/// Trace frame <-> leaf, where the leaf is a source or sink shared text
#[derive(Debug, Clone)]
pub struct TraceFrameLeafAssoc {
    pub trace_frame_id: DbId,
    pub leaf_id: DbId,
    /// Minimum trace length to the leaf
    pub trace_length: Option<i64>,
}

impl TraceFrameLeafAssoc {
    pub fn new(trace_frame_id: &DbId, leaf_id: &DbId, trace_length: Option<i64>) -> Self {
        Self {
            trace_frame_id: trace_frame_id.clone(),
            leaf_id: leaf_id.clone(),
            trace_length,
        }
    }
}

impl Record for TraceFrameLeafAssoc {
    const KIND: EntityKind = EntityKind::TraceFrameLeafAssoc;

    fn id(&self) -> Option<&DbId> {
        None
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("trace_frame_id", self.trace_frame_id.sql_value()?),
            ("leaf_id", self.leaf_id.sql_value()?),
            ("trace_length", opt_int(self.trace_length)),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_pair(items)
    }
}

impl AssocRecord for TraceFrameLeafAssoc {
    fn endpoints(&self) -> (&DbId, &DbId) {
        (&self.trace_frame_id, &self.leaf_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_kind_aliases() {
        assert_eq!(TraceKind::from_str("pre").unwrap(), TraceKind::Precondition);
        assert_eq!(TraceKind::from_str("postcondition").unwrap(), TraceKind::Postcondition);
        assert!(TraceKind::from_str("sideways").is_err());
    }

    #[test]
    fn test_frame_key_needs_resolved_run() {
        let run = DbId::new();
        let frame = TraceFrame::new(
            TraceKind::Postcondition,
            "app.views.index",
            "app.db.query",
            SourceLocation::new(12, 4, Some(20)),
            "app/views.py",
            &run,
        );
        assert!(frame.key().is_err());

        run.resolve(1_i64, true).unwrap();
        let key = frame.key().unwrap();
        key.check_arity(TraceFrame::KEY_COLUMNS).unwrap();
        assert_eq!(key.parts()[0], KeyPart::Int(1));
    }

    #[test]
    fn test_leaf_assoc_row() {
        let assoc = TraceFrameLeafAssoc::new(&DbId::existing(3), &DbId::existing(8), Some(2));
        let row = assoc.to_row().unwrap();
        assert_eq!(row["trace_frame_id"], Value::Integer(3));
        assert_eq!(row["leaf_id"], Value::Integer(8));
        assert_eq!(row["trace_length"], Value::Integer(2));
    }
}
