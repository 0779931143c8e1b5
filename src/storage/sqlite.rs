//! SQLite storage implementation

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use serde::Serialize;
use crate::{Error, Result};
use crate::dbid::IdValue;
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyPart};
use crate::model::Row;
use super::{schema, BackingStore, ExistingRow};

/// Highest parameter number SQLite accepts in one statement
const SQLITE_MAX_VARIABLE_NUMBER: usize = 32766;

/// Connection settings
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long to wait on a locked database before reporting contention
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// SQLite-backed storage for analysis runs
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a database file (creates if doesn't exist)
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    pub fn open_with(path: &Path, options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened {} (journal_mode={})", path.display(), mode);

        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Initialize the database schema
    fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::all_schema_statements() {
            self.conn.execute(stmt, [])?;
        }
        Ok(())
    }

    // ========== Counter Operations ==========

    /// Read `kind`'s counter without locking it
    pub fn counter(&self, kind: EntityKind) -> Result<Option<i64>> {
        self.conn
            .query_row(
                "SELECT current_id FROM primary_keys WHERE table_name = ?1",
                [kind.table_name()],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    // ========== Run Summaries ==========

    /// Issue counts of one stored run, `None` if there is no such run
    pub fn run_summary(&self, run_id: i64) -> Result<Option<RunSummary>> {
        let run = self
            .conn
            .query_row(
                "SELECT job_id, commit_hash, status FROM runs WHERE id = ?1",
                [run_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((job_id, commit_hash, status)) = run else {
            return Ok(None);
        };

        let num_total_issues: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issue_instances WHERE run_id = ?1",
            [run_id],
            |row| row.get(0),
        )?;
        let num_new_issues: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM issue_instances WHERE run_id = ?1 AND is_new_issue = 1",
            [run_id],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            SELECT i.code, COUNT(*)
            FROM issue_instances ii
            JOIN issues i ON i.id = ii.issue_id
            WHERE ii.run_id = ?1
            GROUP BY i.code
            "#,
        )?;
        let alarm_counts = stmt
            .query_map([run_id], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(Some(RunSummary {
            id: run_id,
            job_id,
            commit_hash,
            status,
            num_new_issues: num_new_issues as usize,
            num_total_issues: num_total_issues as usize,
            alarm_counts,
        }))
    }

    /// Instances of `run_id` whose issue was first seen in that run
    pub fn new_issue_instances(&self, run_id: i64) -> Result<Vec<NewIssueInstance>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT ii.id, i.handle, i.code, i.callable, ii.filename, ii.location
            FROM issue_instances ii
            JOIN issues i ON i.id = ii.issue_id
            WHERE ii.run_id = ?1 AND ii.is_new_issue = 1
            ORDER BY ii.id
            "#,
        )?;
        let instances = stmt
            .query_map([run_id], |row| {
                Ok(NewIssueInstance {
                    instance_id: row.get(0)?,
                    handle: row.get(1)?,
                    code: row.get(2)?,
                    callable: row.get(3)?,
                    filename: row.get(4)?,
                    location: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(instances)
    }

    // ========== Statistics ==========

    pub fn count_rows(&self, kind: EntityKind) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.table_name());
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let mut rows = BTreeMap::new();
        let mut counters = BTreeMap::new();
        for &kind in EntityKind::all() {
            rows.insert(kind.table_name().to_string(), self.count_rows(kind)?);
            if let Some(current_id) = self.counter(kind)? {
                counters.insert(kind.table_name().to_string(), current_id);
            }
        }
        Ok(StoreStats { rows, counters })
    }
}

impl BackingStore for SqliteStore {
    fn lock_counter(&self, kind: EntityKind) -> Result<Option<i64>> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| contention_or(e, kind))?;
        match self.counter(kind) {
            Ok(current_id) => Ok(current_id),
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    tracing::warn!("Failed to release {} counter lock: {}", kind, rollback);
                }
                Err(e)
            }
        }
    }

    fn store_counter(&self, kind: EntityKind, current_id: i64) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO primary_keys (table_name, current_id) VALUES (?1, ?2)
            ON CONFLICT(table_name) DO UPDATE SET current_id = excluded.current_id
            "#,
            params![kind.table_name(), current_id],
        )?;
        Ok(())
    }

    fn release_counter(&self, commit: bool) -> Result<()> {
        // Nothing to release if the lock was never taken
        if self.conn.is_autocommit() {
            return Ok(());
        }
        let stmt = if commit { "COMMIT" } else { "ROLLBACK" };
        self.conn.execute_batch(stmt)?;
        Ok(())
    }

    fn max_existing_id(&self, kind: EntityKind) -> Result<i64> {
        if kind.is_association() {
            return Err(Error::NotRegistered(kind));
        }
        let sql = format!("SELECT COALESCE(MAX(id), 0) FROM {}", kind.table_name());
        let max: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(max)
    }

    fn find_existing(&self, kind: EntityKind, columns: &[&str], keys: &[EntityKey]) -> Result<Vec<ExistingRow>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        if kind.is_association() {
            return Err(Error::MalformedKey(format!("{} rows have no identity to look up", kind)));
        }
        for key in keys {
            key.check_arity(columns)?;
        }

        // (c1, c2) IN (VALUES (?1, ?2), (?3, ?4), ...)
        let column_list = columns.iter().map(|c| format!("\"{}\"", c)).collect::<Vec<_>>().join(", ");
        let arity = columns.len();
        let tuples: Vec<String> = (0..keys.len())
            .map(|k| {
                let params: Vec<String> = (1..=arity).map(|c| format!("?{}", k * arity + c)).collect();
                format!("({})", params.join(", "))
            })
            .collect();
        let sql = format!(
            "SELECT id, {cols} FROM {table} WHERE ({cols}) IN (VALUES {tuples})",
            cols = column_list,
            table = kind.table_name(),
            tuples = tuples.join(", ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let raw_rows = stmt
            .query_map(params_from_iter(keys.iter().flat_map(|k| k.parts())), |row| {
                (0..=columns.len())
                    .map(|i| row.get::<_, Value>(i))
                    .collect::<rusqlite::Result<Vec<Value>>>()
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw_rows.into_iter().map(row_to_existing).collect()
    }

    fn bulk_insert(&self, kind: EntityKind, rows: &[Row]) -> Result<usize> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<&'static str> = first.keys().copied().collect();
        let placeholders = (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ");
        // Association rows are pure pairs; one already stored is kept as is
        let verb = if kind.is_association() { "INSERT OR IGNORE" } else { "INSERT" };
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            kind.table_name(),
            columns.join(", "),
            placeholders
        );

        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                if !row.keys().copied().eq(columns.iter().copied()) {
                    return Err(Error::MalformedKey(format!(
                        "{} row has columns {:?}, expected {:?}",
                        kind,
                        row.keys().collect::<Vec<_>>(),
                        columns
                    )));
                }
                inserted += stmt.execute(params_from_iter(row.values()))?;
            }
        }
        tx.commit()?;

        Ok(inserted)
    }

    fn max_parameters(&self) -> usize {
        SQLITE_MAX_VARIABLE_NUMBER
    }
}

/// Busy and locked databases mean another writer holds the lock
fn contention_or(err: rusqlite::Error, kind: EntityKind) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::LockContention(format!("{} counter: {}", kind, err))
        }
        _ => Error::Storage(err),
    }
}

fn row_to_existing(values: Vec<Value>) -> Result<ExistingRow> {
    let mut values = values.into_iter();
    let id = match values.next().map(IdValue::try_from).transpose()? {
        Some(IdValue::Concrete(id)) => id,
        other => {
            return Err(Error::TypeMismatch(format!(
                "stored identity expected to be an integer but was {:?}",
                other
            )))
        }
    };
    let parts = values.map(KeyPart::try_from).collect::<Result<Vec<_>>>()?;
    Ok(ExistingRow {
        id,
        key: EntityKey::new(parts),
    })
}

/// Issue counts of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub id: i64,
    pub job_id: Option<String>,
    pub commit_hash: Option<String>,
    pub status: String,
    /// Instances whose issue was first seen in this run
    pub num_new_issues: usize,
    pub num_total_issues: usize,
    /// Instances per issue code
    pub alarm_counts: BTreeMap<i64, usize>,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Run {}", self.id)?;
        if let Some(job_id) = &self.job_id {
            write!(f, " (job {})", job_id)?;
        }
        writeln!(f, ": {}", self.status)?;
        if let Some(commit_hash) = &self.commit_hash {
            writeln!(f, "  commit: {}", commit_hash)?;
        }
        writeln!(f, "  issues: {} ({} new)", self.num_total_issues, self.num_new_issues)?;
        for (code, count) in &self.alarm_counts {
            writeln!(f, "  code {}: {}", code, count)?;
        }
        Ok(())
    }
}

/// An issue instance whose issue was new in its run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewIssueInstance {
    pub instance_id: i64,
    pub handle: String,
    pub code: i64,
    pub callable: String,
    pub filename: Option<String>,
    pub location: String,
}

/// Database statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Row count per table
    pub rows: BTreeMap<String, usize>,
    /// Persistent counter per table, where one exists
    pub counters: BTreeMap<String, i64>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Database Statistics:")?;
        for (table, count) in &self.rows {
            match self.counters.get(table) {
                Some(current_id) => writeln!(f, "  {}: {} (counter at {})", table, count, current_id)?,
                None => writeln!(f, "  {}: {}", table, count)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_row(id: i64, contents: &str) -> Row {
        Row::from([
            ("id", Value::Integer(id)),
            ("contents", Value::Text(contents.to_string())),
            ("kind", Value::Text("feature".to_string())),
        ])
    }

    fn text_key(contents: &str) -> EntityKey {
        EntityKey::from([KeyPart::from(contents), KeyPart::from("feature")])
    }

    #[test]
    fn test_find_existing_matches_full_keys() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .bulk_insert(EntityKind::SharedText, &[text_row(1, "a"), text_row(2, "b")])
            .unwrap();

        let columns = ["contents", "kind"];
        let mut found = store
            .find_existing(EntityKind::SharedText, &columns, &[text_key("a"), text_key("b"), text_key("c")])
            .unwrap();
        found.sort_by_key(|row| row.id);

        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, 1);
        assert_eq!(found[0].key, text_key("a"));
        assert_eq!(found[1].key, text_key("b"));
    }

    #[test]
    fn test_find_existing_rejects_wrong_arity() {
        let store = SqliteStore::open_in_memory().unwrap();
        let err = store
            .find_existing(EntityKind::SharedText, &["contents", "kind"], &[EntityKey::from([KeyPart::from("a")])])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedKey(_)));
    }

    #[test]
    fn test_bulk_insert_rejects_mismatched_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let short = Row::from([("id", Value::Integer(2)), ("contents", Value::Text("b".to_string()))]);

        let err = store
            .bulk_insert(EntityKind::SharedText, &[text_row(1, "a"), short])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedKey(_)));
        // The whole batch is rolled back
        assert_eq!(store.count_rows(EntityKind::SharedText).unwrap(), 0);
    }

    #[test]
    fn test_unique_keys_are_enforced() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.bulk_insert(EntityKind::SharedText, &[text_row(1, "a")]).unwrap();

        let err = store.bulk_insert(EntityKind::SharedText, &[text_row(2, "a")]).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_max_existing_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.max_existing_id(EntityKind::SharedText).unwrap(), 0);

        store
            .bulk_insert(EntityKind::SharedText, &[text_row(7, "a"), text_row(3, "b")])
            .unwrap();
        assert_eq!(store.max_existing_id(EntityKind::SharedText).unwrap(), 7);
        assert!(matches!(
            store.max_existing_id(EntityKind::TraceFrameLeafAssoc),
            Err(Error::NotRegistered(_))
        ));
    }

    #[test]
    fn test_counter_commit_and_rollback() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.lock_counter(EntityKind::Issue).unwrap(), None);
        store.store_counter(EntityKind::Issue, 10).unwrap();
        store.release_counter(true).unwrap();
        assert_eq!(store.counter(EntityKind::Issue).unwrap(), Some(10));

        assert_eq!(store.lock_counter(EntityKind::Issue).unwrap(), Some(10));
        store.store_counter(EntityKind::Issue, 20).unwrap();
        store.release_counter(false).unwrap();
        assert_eq!(store.counter(EntityKind::Issue).unwrap(), Some(10));

        // Releasing without a lock is a no-op
        store.release_counter(false).unwrap();
    }

    #[test]
    fn test_failed_counter_read_releases_lock() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.conn.execute_batch("DROP TABLE primary_keys").unwrap();

        assert!(matches!(store.lock_counter(EntityKind::Issue), Err(Error::Storage(_))));
        assert!(store.conn.is_autocommit());
    }

    #[test]
    fn test_stored_association_pairs_are_skipped() {
        let store = SqliteStore::open_in_memory().unwrap();
        let pair = |frame: i64, leaf: i64| {
            Row::from([
                ("trace_frame_id", Value::Integer(frame)),
                ("leaf_id", Value::Integer(leaf)),
                ("trace_length", Value::Integer(0)),
            ])
        };

        assert_eq!(store.bulk_insert(EntityKind::TraceFrameLeafAssoc, &[pair(1, 2)]).unwrap(), 1);
        let inserted = store
            .bulk_insert(EntityKind::TraceFrameLeafAssoc, &[pair(1, 2), pair(1, 3)])
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.count_rows(EntityKind::TraceFrameLeafAssoc).unwrap(), 2);
    }

    #[test]
    fn test_run_summary_counts_instances() {
        let store = SqliteStore::open_in_memory().unwrap();
        let run = Row::from([
            ("id", Value::Integer(3)),
            ("job_id", Value::Text("nightly-17".to_string())),
            ("date", Value::Integer(1)),
        ]);
        store.bulk_insert(EntityKind::Run, &[run]).unwrap();

        let issue = |id: i64, handle: &str, code: i64| {
            Row::from([
                ("id", Value::Integer(id)),
                ("handle", Value::Text(handle.to_string())),
                ("code", Value::Integer(code)),
                ("callable", Value::Text("app.views.search".to_string())),
                ("first_seen", Value::Integer(1)),
            ])
        };
        store
            .bulk_insert(EntityKind::Issue, &[issue(1, "H1", 5005), issue(2, "H2", 5005), issue(3, "H3", 6015)])
            .unwrap();

        let instance = |id: i64, run_id: i64, issue_id: i64, is_new: bool| {
            Row::from([
                ("id", Value::Integer(id)),
                ("location", Value::Text("1|1|1".to_string())),
                ("is_new_issue", Value::Integer(i64::from(is_new))),
                ("run_id", Value::Integer(run_id)),
                ("issue_id", Value::Integer(issue_id)),
            ])
        };
        store
            .bulk_insert(
                EntityKind::IssueInstance,
                &[
                    instance(1, 3, 1, true),
                    instance(2, 3, 2, false),
                    instance(3, 3, 3, true),
                    instance(4, 9, 1, true),
                ],
            )
            .unwrap();

        let summary = store.run_summary(3).unwrap().unwrap();
        assert_eq!(summary.job_id.as_deref(), Some("nightly-17"));
        assert_eq!(summary.status, "finished");
        assert_eq!(summary.num_total_issues, 3);
        assert_eq!(summary.num_new_issues, 2);
        assert_eq!(summary.alarm_counts, BTreeMap::from([(5005, 2), (6015, 1)]));
        assert!(summary.to_string().contains("issues: 3 (2 new)"));

        let new_instances = store.new_issue_instances(3).unwrap();
        let handles: Vec<&str> = new_instances.iter().map(|i| i.handle.as_str()).collect();
        assert_eq!(handles, vec!["H1", "H3"]);

        assert!(store.run_summary(4).unwrap().is_none());
    }

    #[test]
    fn test_second_writer_sees_contention() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.db");
        let impatient = StoreOptions {
            busy_timeout: Duration::from_millis(0),
        };

        let holder = SqliteStore::open_with(&path, &impatient).unwrap();
        let other = SqliteStore::open_with(&path, &impatient).unwrap();

        holder.lock_counter(EntityKind::SharedText).unwrap();
        let err = other.lock_counter(EntityKind::SharedText).unwrap_err();
        assert!(matches!(err, Error::LockContention(_)));

        holder.release_counter(true).unwrap();
        other.lock_counter(EntityKind::SharedText).unwrap();
        other.release_counter(false).unwrap();
    }

    #[test]
    fn test_stats() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.bulk_insert(EntityKind::SharedText, &[text_row(1, "a")]).unwrap();
        store.lock_counter(EntityKind::SharedText).unwrap();
        store.store_counter(EntityKind::SharedText, 1).unwrap();
        store.release_counter(true).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.rows["shared_texts"], 1);
        assert_eq!(stats.rows["issues"], 0);
        assert_eq!(stats.counters["shared_texts"], 1);
        assert!(!stats.counters.contains_key("issues"));
        assert!(stats.to_string().contains("shared_texts: 1 (counter at 1)"));
    }
}
