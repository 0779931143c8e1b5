//! Key-based merge of new records against stored rows
//!
//! Records are scanned twice: once to collect the distinct keys, which are
//! looked up in the store in bounded batches, and once to decide for every
//! record whether it is already stored, a duplicate of an earlier record in
//! the same batch, or genuinely new. Only new records are returned; all
//! others have their placeholder resolved on the way.

use std::collections::{HashMap, HashSet};
use crate::{Error, Result};
use crate::dbid::DbId;
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyDigest};
use crate::model::{AssocRecord, KeyedRecord};
use crate::storage::BackingStore;

/// Number of parameters bound by a single lookup query
pub const DEFAULT_BATCH_SIZE: usize = 900;

/// What to do when a key shows up twice in one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnDuplicate {
    /// Collapse silently
    Collapse,
    /// Collapse and log a warning
    Warn,
}

pub struct Merger<'a, S: BackingStore + ?Sized> {
    store: &'a S,
    batch_size: usize,
}

impl<'a, S: BackingStore + ?Sized> Merger<'a, S> {
    pub fn new(store: &'a S, batch_size: usize) -> Self {
        Self { store, batch_size }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Merge records by their key, collapsing in-batch duplicates silently
    pub fn merge_by_keys<R: KeyedRecord>(&self, items: Vec<R>) -> Result<Vec<R>> {
        self.merge_by_keys_with(items, OnDuplicate::Collapse)
    }

    pub fn merge_by_keys_with<R: KeyedRecord>(&self, items: Vec<R>, on_duplicate: OnDuplicate) -> Result<Vec<R>> {
        if items.is_empty() {
            return Ok(items);
        }

        // First pass: the key of every record and the distinct keys
        let mut digests = Vec::with_capacity(items.len());
        let mut keys: HashMap<KeyDigest, EntityKey> = HashMap::new();
        let mut distinct = Vec::new();
        for item in &items {
            let key = item.key()?;
            key.check_arity(R::KEY_COLUMNS)?;
            let digest = key.digest();
            digests.push(digest);
            if !keys.contains_key(&digest) {
                distinct.push(key.clone());
                keys.insert(digest, key);
            }
        }

        let existing = self.fetch_existing(R::KIND, R::KEY_COLUMNS, &distinct)?;

        // Second pass: existing, duplicate or new
        let total = items.len();
        let mut first_seen: HashMap<KeyDigest, DbId> = HashMap::new();
        let mut warned: HashSet<KeyDigest> = HashSet::new();
        let mut seen: HashSet<KeyDigest> = HashSet::new();
        let mut new_items = Vec::new();

        for (item, digest) in items.into_iter().zip(digests) {
            if !seen.insert(digest) && on_duplicate == OnDuplicate::Warn && warned.insert(digest) {
                tracing::warn!(
                    "Same {} (key={}) showed up twice in a run",
                    R::KIND,
                    keys[&digest]
                );
            }

            let id = item.placeholder();
            if let Some(&existing_id) = existing.get(&digest) {
                id.resolve(existing_id, false)?;
            } else if let Some(first) = first_seen.get(&digest) {
                id.resolve(first, false)?;
            } else {
                first_seen.insert(digest, id.clone());
                new_items.push(item);
            }
        }

        tracing::debug!(
            "Merged {} {} records: {} new, {} existing keys",
            total,
            R::KIND,
            new_items.len(),
            existing.len()
        );

        Ok(new_items)
    }

    /// Merge by key only the records `keyed` selects; all others are new.
    ///
    /// For kinds that can only be stored already when their owner is, e.g.
    /// instances of a run written by an earlier attempt.
    pub fn merge_by_keys_if<R: KeyedRecord>(&self, items: Vec<R>, keyed: impl Fn(&R) -> bool) -> Result<Vec<R>> {
        let (lookup, fresh): (Vec<R>, Vec<R>) = items.into_iter().partition(|item| keyed(item));
        let mut new_items = self.merge_by_keys(lookup)?;
        new_items.extend(fresh);
        Ok(new_items)
    }

    /// Merge associations by their resolved endpoint pair.
    ///
    /// Both endpoints must already be resolved. Duplicate pairs are expected
    /// when a traversal revisits the same edge and collapse silently.
    pub fn merge_by_pair<R: AssocRecord>(&self, items: Vec<R>) -> Result<Vec<R>> {
        let total = items.len();
        let mut seen: HashSet<(i64, i64)> = HashSet::new();
        let mut new_items = Vec::new();

        for item in items {
            let (left, right) = item.endpoints();
            let pair = (left.resolved()?, right.resolved()?);
            if seen.insert(pair) {
                new_items.push(item);
            }
        }

        tracing::debug!(
            "Merged {} {} records into {} distinct pairs",
            total,
            R::KIND,
            new_items.len()
        );

        Ok(new_items)
    }

    /// Look up which keys already exist, in batches that stay within the
    /// store's parameter limit.
    pub(crate) fn fetch_existing(
        &self,
        kind: EntityKind,
        columns: &[&str],
        keys: &[EntityKey],
    ) -> Result<HashMap<KeyDigest, i64>> {
        let mut existing = HashMap::new();
        if keys.is_empty() {
            return Ok(existing);
        }
        if columns.is_empty() {
            return Err(Error::MalformedKey(format!("{} has no key columns", kind)));
        }

        let keys_per_batch = (self.batch_size / columns.len()).max(1);
        let limit = self.store.max_parameters();

        for batch in keys.chunks(keys_per_batch) {
            let parameters = batch.len() * columns.len();
            if parameters > limit {
                return Err(Error::BatchTooLarge { kind, parameters, limit });
            }

            let rows = self.store.find_existing(kind, columns, batch)?;
            tracing::debug!(
                "Looked up {} {} keys, {} already stored",
                batch.len(),
                kind,
                rows.len()
            );

            for row in rows {
                row.key.check_arity(columns)?;
                existing.insert(row.key.digest(), row.id);
            }
        }

        Ok(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Issue, IssueInstanceSharedTextAssoc, Record, SharedText, SharedTextKind};
    use crate::storage::SqliteStore;
    use std::sync::{Arc, Mutex};

    fn store_with_texts(texts: &[(i64, &str, &str)]) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows: Vec<_> = texts
            .iter()
            .map(|(id, contents, kind)| {
                crate::model::Row::from([
                    ("id", rusqlite::types::Value::Integer(*id)),
                    ("contents", rusqlite::types::Value::Text(contents.to_string())),
                    ("kind", rusqlite::types::Value::Text(kind.to_string())),
                ])
            })
            .collect();
        store.bulk_insert(EntityKind::SharedText, &rows).unwrap();
        store
    }

    #[test]
    fn test_in_batch_duplicates_collapse_to_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);

        let first = SharedText::new("a", SharedTextKind::Feature);
        let second = SharedText::new("a", SharedTextKind::Feature);
        let second_id = second.id.clone();

        let merged = merger.merge_by_keys(vec![first, second]).unwrap();
        assert_eq!(merged.len(), 1);
        assert!(!second_id.is_resolved());

        merged[0].id.resolve(10_i64, true).unwrap();
        assert_eq!(second_id.resolved().unwrap(), 10);
        assert!(!second_id.is_new());
    }

    #[test]
    fn test_existing_rows_are_not_yielded() {
        let store = store_with_texts(&[(42, "via tito", "feature")]);
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);

        let existing = SharedText::new("via tito", SharedTextKind::Feature);
        let existing_id = existing.id.clone();
        let other_kind = SharedText::new("via tito", SharedTextKind::Message);

        let merged = merger.merge_by_keys(vec![existing, other_kind]).unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].kind, SharedTextKind::Message);
        assert_eq!(existing_id.resolved().unwrap(), 42);
        assert!(!existing_id.is_new());
    }

    #[test]
    fn test_one_record_per_distinct_key_across_batches() {
        let store = store_with_texts(&[(1, "t3", "feature"), (2, "t7", "feature")]);
        // Two columns per key: one key per lookup batch
        let merger = Merger::new(&store, 2);

        let mut texts = Vec::new();
        for i in 0..10 {
            texts.push(SharedText::new(format!("t{}", i % 5 + 3), SharedTextKind::Feature));
        }
        let ids: Vec<DbId> = texts.iter().map(|t| t.id.clone()).collect();

        let merged = merger.merge_by_keys(texts).unwrap();
        // t3..t7 are distinct; t3 and t7 already stored
        assert_eq!(merged.len(), 3);
        for (offset, text) in merged.iter().enumerate() {
            text.id.resolve(100 + offset as i64, true).unwrap();
        }

        for (i, id) in ids.iter().enumerate() {
            let twin = &ids[(i + 5) % 10];
            assert_eq!(id.resolved().unwrap(), twin.resolved().unwrap());
        }
        assert_eq!(ids[0].resolved().unwrap(), 1);
        assert_eq!(ids[4].resolved().unwrap(), 2);
    }

    #[test]
    fn test_issue_duplicates_in_one_run_collapse() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);
        let run = DbId::existing(1);

        let first = Issue::new("H1", 6015, "app.views.index", &run, 0);
        let again = Issue::new("H1", 6015, "app.views.index", &run, 0);
        let again_id = again.id.clone();

        let merged = Issue::merge(&merger, vec![first, again]).unwrap();
        assert_eq!(merged.len(), 1);
        merged[0].id.resolve(3_i64, true).unwrap();
        assert_eq!(again_id.resolved().unwrap(), 3);
    }

    /// Log output captured by a test subscriber
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_repeated_handle_warns_once_per_handle() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);
        let run = DbId::existing(1);

        let issues = vec![
            Issue::new("H1", 6015, "app.views.index", &run, 0),
            Issue::new("H1", 6015, "app.views.index", &run, 0),
            Issue::new("H2", 5005, "app.views.search", &run, 0),
            Issue::new("H1", 6015, "app.views.index", &run, 0),
            Issue::new("H3", 5005, "app.views.detail", &run, 0),
            Issue::new("H2", 5005, "app.views.search", &run, 0),
        ];

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let merged = tracing::subscriber::with_default(subscriber, || Issue::merge(&merger, issues)).unwrap();
        assert_eq!(merged.len(), 3);

        let output = logs.contents();
        let warnings: Vec<&str> = output.lines().filter(|l| l.contains("showed up twice")).collect();
        assert_eq!(warnings.len(), 2, "{}", output);
        assert!(warnings.iter().any(|l| l.contains("\"H1\"")));
        assert!(warnings.iter().any(|l| l.contains("\"H2\"")));
        assert!(!output.contains("\"H3\""));
    }

    #[test]
    fn test_shared_texts_collapse_without_warning() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);
        let texts = vec![
            SharedText::new("a", SharedTextKind::Feature),
            SharedText::new("a", SharedTextKind::Feature),
        ];

        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let logs = logs.clone();
                move || logs.clone()
            })
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        let merged = tracing::subscriber::with_default(subscriber, || SharedText::merge(&merger, texts)).unwrap();

        assert_eq!(merged.len(), 1);
        assert!(logs.contents().is_empty());
    }

    #[test]
    fn test_merge_by_keys_if_only_looks_up_selected() {
        let store = store_with_texts(&[(42, "stored", "feature")]);
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);

        let looked_up = SharedText::new("stored", SharedTextKind::Feature);
        let looked_up_id = looked_up.id.clone();
        let skipped = SharedText::new("stored", SharedTextKind::Feature);
        let skipped_id = skipped.id.clone();

        let merged = merger
            .merge_by_keys_if(vec![looked_up, skipped], |text| text.id == looked_up_id)
            .unwrap();

        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, skipped_id);
        assert_eq!(looked_up_id.resolved().unwrap(), 42);
        assert!(!skipped_id.is_resolved());
    }

    #[test]
    fn test_batch_over_store_limit_fails_fast() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, store.max_parameters() * 4);

        let texts: Vec<_> = (0..store.max_parameters())
            .map(|i| SharedText::new(format!("text {}", i), SharedTextKind::Feature))
            .collect();

        let err = merger.merge_by_keys(texts).unwrap_err();
        assert!(matches!(err, Error::BatchTooLarge { kind: EntityKind::SharedText, .. }));
    }

    #[test]
    fn test_pairs_collapse_silently() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);
        let instance = DbId::existing(1);
        let text = DbId::existing(2);
        let other_text = DbId::existing(3);

        let assocs = vec![
            IssueInstanceSharedTextAssoc::new(&instance, &text),
            IssueInstanceSharedTextAssoc::new(&instance, &text),
            IssueInstanceSharedTextAssoc::new(&instance, &other_text),
        ];
        let merged = merger.merge_by_pair(assocs).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_pairs_require_resolved_endpoints() {
        let store = SqliteStore::open_in_memory().unwrap();
        let merger = Merger::new(&store, DEFAULT_BATCH_SIZE);
        let assoc = IssueInstanceSharedTextAssoc::new(&DbId::existing(1), &DbId::new());

        let err = merger.merge_by_pair(vec![assoc]).unwrap_err();
        assert!(matches!(err, Error::Unresolved(_)));
    }
}
