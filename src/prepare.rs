//! Batch preparation - from records with placeholders to insertable rows
//!
//! For one kind at a time: merge against the store, reserve exactly as many
//! identities as there are new records, resolve their placeholders and
//! serialize them. `persist` does this for a whole `AnalysisBatch` in
//! dependency order and inserts the rows.

use serde::Serialize;
use crate::Result;
use crate::allocator::PrimaryKeyAllocator;
use crate::dbid::{DbId, IssueDbId};
use crate::entity::EntityKind;
use crate::merge::{Merger, DEFAULT_BATCH_SIZE};
use crate::model::{
    Issue, IssueInstance, IssueInstanceFixInfo, IssueInstanceSharedTextAssoc, IssueInstanceTraceFrameAssoc, Record,
    Row, Run, SharedText, SharedTextKind, TraceFrame, TraceFrameAnnotation, TraceFrameLeafAssoc,
};
use crate::storage::BackingStore;

#[derive(Debug, Clone, Copy)]
pub struct PersistOptions {
    /// Parameters bound per key lookup
    pub batch_size: usize,
    /// Resync counters to the stored maximum before reserving
    pub use_lock: bool,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            use_lock: false,
        }
    }
}

/// Rows of one kind ready for `bulk_insert`
#[derive(Debug)]
pub struct PreparedRows {
    pub kind: EntityKind,
    pub rows: Vec<Row>,
    /// Records before merging
    pub candidates: usize,
    /// Records resolved to an existing or earlier identity
    pub duplicates: usize,
}

pub struct BatchPreparer<'a, S: BackingStore + ?Sized> {
    store: &'a S,
    merger: Merger<'a, S>,
    allocator: PrimaryKeyAllocator,
    use_lock: bool,
}

impl<'a, S: BackingStore + ?Sized> BatchPreparer<'a, S> {
    pub fn new(store: &'a S, options: &PersistOptions) -> Self {
        Self {
            store,
            merger: Merger::new(store, options.batch_size),
            allocator: PrimaryKeyAllocator::new(),
            use_lock: options.use_lock,
        }
    }

    /// Merge, allocate, resolve and serialize records of one kind
    pub fn prepare<R: Record>(&mut self, items: Vec<R>) -> Result<PreparedRows> {
        let candidates = items.len();
        let new_items = R::merge(&self.merger, items)?;

        if R::KIND.is_allocator_managed() {
            self.allocator
                .reserve(self.store, &[(R::KIND, new_items.len())], self.use_lock)?;
            for item in &new_items {
                if let Some(id) = item.id() {
                    id.resolve(self.allocator.get(R::KIND)?, true)?;
                }
            }
        }

        let rows = new_items.iter().map(Record::to_row).collect::<Result<Vec<_>>>()?;
        Ok(PreparedRows {
            kind: R::KIND,
            duplicates: candidates - rows.len(),
            rows,
            candidates,
        })
    }

    /// Prepare records of one kind and insert them
    pub fn insert<R: Record>(&mut self, items: Vec<R>) -> Result<KindSummary> {
        let prepared = self.prepare(items)?;
        let inserted = self.store.bulk_insert(prepared.kind, &prepared.rows)?;

        tracing::info!(
            "{}: {} inserted, {} duplicates",
            prepared.kind,
            inserted,
            prepared.duplicates
        );

        Ok(KindSummary {
            kind: prepared.kind,
            candidates: prepared.candidates,
            inserted,
            duplicates: prepared.duplicates,
        })
    }
}

/// All records of one analysis run
#[derive(Debug, Default)]
pub struct AnalysisBatch {
    pub runs: Vec<Run>,
    pub shared_texts: Vec<SharedText>,
    pub issues: Vec<Issue>,
    pub fix_infos: Vec<IssueInstanceFixInfo>,
    pub issue_instances: Vec<IssueInstance>,
    pub trace_frames: Vec<TraceFrame>,
    pub annotations: Vec<TraceFrameAnnotation>,
    pub instance_texts: Vec<IssueInstanceSharedTextAssoc>,
    pub instance_frames: Vec<IssueInstanceTraceFrameAssoc>,
    pub frame_leaves: Vec<TraceFrameLeafAssoc>,
}

impl AnalysisBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_run(&mut self, run: Run) -> DbId {
        let id = run.id.clone();
        self.runs.push(run);
        id
    }

    pub fn add_shared_text(&mut self, contents: impl Into<String>, kind: SharedTextKind) -> DbId {
        let text = SharedText::new(contents, kind);
        let id = text.id.clone();
        self.shared_texts.push(text);
        id
    }

    pub fn add_issue(&mut self, issue: Issue) -> IssueDbId {
        let id = issue.id.clone();
        self.issues.push(issue);
        id
    }

    pub fn add_fix_info(&mut self, fix_info: impl Into<String>) -> DbId {
        let info = IssueInstanceFixInfo::new(fix_info);
        let id = info.id.clone();
        self.fix_infos.push(info);
        id
    }

    pub fn add_issue_instance(&mut self, instance: IssueInstance) -> DbId {
        let id = instance.id.clone();
        self.issue_instances.push(instance);
        id
    }

    pub fn add_trace_frame(&mut self, frame: TraceFrame) -> DbId {
        let id = frame.id.clone();
        self.trace_frames.push(frame);
        id
    }

    pub fn add_annotation(&mut self, annotation: TraceFrameAnnotation) -> DbId {
        let id = annotation.id.clone();
        self.annotations.push(annotation);
        id
    }

    pub fn link_instance_text(&mut self, instance: &DbId, text: &DbId) {
        self.instance_texts.push(IssueInstanceSharedTextAssoc::new(instance, text));
    }

    pub fn link_instance_frame(&mut self, instance: &DbId, frame: &DbId) {
        self.instance_frames.push(IssueInstanceTraceFrameAssoc::new(instance, frame));
    }

    pub fn link_frame_leaf(&mut self, frame: &DbId, leaf: &DbId, trace_length: Option<i64>) {
        self.frame_leaves.push(TraceFrameLeafAssoc::new(frame, leaf, trace_length));
    }

    /// Total number of records
    pub fn len(&self) -> usize {
        self.runs.len()
            + self.shared_texts.len()
            + self.issues.len()
            + self.fix_infos.len()
            + self.issue_instances.len()
            + self.trace_frames.len()
            + self.annotations.len()
            + self.instance_texts.len()
            + self.instance_frames.len()
            + self.frame_leaves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persist a whole batch, kind by kind in dependency order.
///
/// Kinds are committed one at a time. On error the kinds already inserted
/// stay; persisting the batch again skips whatever is deduplicated by key.
pub fn persist<S: BackingStore + ?Sized>(
    store: &S,
    batch: AnalysisBatch,
    options: &PersistOptions,
) -> Result<BatchSummary> {
    tracing::debug!("Persisting {} records", batch.len());

    let mut preparer = BatchPreparer::new(store, options);
    let kinds = vec![
        preparer.insert(batch.runs)?,
        preparer.insert(batch.shared_texts)?,
        preparer.insert(batch.issues)?,
        preparer.insert(batch.fix_infos)?,
        preparer.insert(batch.issue_instances)?,
        preparer.insert(batch.trace_frames)?,
        preparer.insert(batch.annotations)?,
        preparer.insert(batch.instance_texts)?,
        preparer.insert(batch.instance_frames)?,
        preparer.insert(batch.frame_leaves)?,
    ];

    Ok(BatchSummary { kinds })
}

#[derive(Debug, Clone, Serialize)]
pub struct KindSummary {
    pub kind: EntityKind,
    pub candidates: usize,
    pub inserted: usize,
    pub duplicates: usize,
}

/// What `persist` did, per kind
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchSummary {
    pub kinds: Vec<KindSummary>,
}

impl BatchSummary {
    pub fn get(&self, kind: EntityKind) -> Option<&KindSummary> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn inserted(&self, kind: EntityKind) -> usize {
        self.get(kind).map_or(0, |k| k.inserted)
    }

    pub fn total_inserted(&self) -> usize {
        self.kinds.iter().map(|k| k.inserted).sum()
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Persisted {} rows:", self.total_inserted())?;
        for k in &self.kinds {
            if k.candidates == 0 {
                continue;
            }
            writeln!(
                f,
                "  {}: {} inserted, {} duplicates",
                k.kind.table_name(),
                k.inserted,
                k.duplicates
            )?;
        }
        Ok(())
    }
}
