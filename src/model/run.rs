//! Analysis runs

use crate::{Error, Result};
use crate::dbid::DbId;
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyPart};
use crate::merge::Merger;
use crate::storage::BackingStore;
use super::{opt_text, text, KeyedRecord, Record, Row};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Finished,
    Incomplete,
    Skipped,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "finished",
            RunStatus::Incomplete => "incomplete",
            RunStatus::Skipped => "skipped",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "finished" => Ok(RunStatus::Finished),
            "incomplete" => Ok(RunStatus::Incomplete),
            "skipped" => Ok(RunStatus::Skipped),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(Error::Parse(format!("Unknown run status: {}", s))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single run of the analyzer.
///
/// A run with a `job_id` is stored once: persisting it again resolves to the
/// stored row, so a failed batch can be retried. Runs without one are always
/// new rows.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: DbId,
    pub job_id: Option<String>,
    /// Unix seconds
    pub date: i64,
    pub commit_hash: Option<String>,
    /// e.g. master vs. test runs in the same database
    pub kind: Option<String>,
    pub repository: Option<String>,
    pub status: RunStatus,
    pub status_description: Option<String>,
}

impl Run {
    pub fn new(date: i64) -> Self {
        Self {
            id: DbId::new(),
            job_id: None,
            date,
            commit_hash: None,
            kind: None,
            repository: None,
            status: RunStatus::Finished,
            status_description: None,
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }
}

impl Record for Run {
    const KIND: EntityKind = EntityKind::Run;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("job_id", opt_text(self.job_id.as_deref())),
            ("date", Value::Integer(self.date)),
            ("commit_hash", opt_text(self.commit_hash.as_deref())),
            ("kind", opt_text(self.kind.as_deref())),
            ("repository", opt_text(self.repository.as_deref())),
            ("status", text(self.status.as_str())),
            ("status_description", opt_text(self.status_description.as_deref())),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_keys_if(items, |run| run.job_id.is_some())
    }
}

impl KeyedRecord for Run {
    const KEY_COLUMNS: &'static [&'static str] = &["job_id"];

    fn placeholder(&self) -> &DbId {
        &self.id
    }

    fn key(&self) -> Result<EntityKey> {
        match &self.job_id {
            Some(job_id) => Ok(EntityKey::from([KeyPart::from(job_id.as_str())])),
            None => Err(Error::MalformedKey(format!(
                "run #{} has no job id to match on",
                self.id.local_id()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::DEFAULT_BATCH_SIZE;
    use crate::storage::SqliteStore;

    fn stored_run(store: &SqliteStore, id: i64, job_id: &str) {
        let row = Row::from([
            ("id", Value::Integer(id)),
            ("job_id", Value::Text(job_id.to_string())),
            ("date", Value::Integer(1)),
        ]);
        store.bulk_insert(EntityKind::Run, &[row]).unwrap();
    }

    #[test]
    fn test_run_with_stored_job_id_is_reused() {
        let store = SqliteStore::open_in_memory().unwrap();
        stored_run(&store, 7, "nightly-17");
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);

        let rerun = Run::new(2).with_job_id("nightly-17");
        let rerun_id = rerun.id.clone();
        let other = Run::new(2).with_job_id("nightly-18");

        let merged = Run::merge(&merger, vec![rerun, other]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].job_id.as_deref(), Some("nightly-18"));
        assert_eq!(rerun_id.resolved().unwrap(), 7);
        assert!(!rerun_id.is_new());
    }

    #[test]
    fn test_runs_without_job_id_are_always_new() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);

        let merged = Run::merge(&merger, vec![Run::new(1), Run::new(1)]).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(!merged[0].id.is_resolved());

        assert!(matches!(Run::new(1).key(), Err(Error::MalformedKey(_))));
    }
}
