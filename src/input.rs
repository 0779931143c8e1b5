//! Run input - a JSON description of one analysis run
//!
//! Frames are listed once with a local `id`; issues refer to them by that
//! id. Every string that ends up in `shared_texts` (messages, features,
//! leaves) is added as its own record and left to the merge to deduplicate.

use std::collections::HashMap;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use serde::{Deserialize, Serialize};
use crate::{Error, Result};
use crate::dbid::DbId;
use crate::model::{
    Issue, IssueInstance, Run, RunStatus, SharedTextKind, SourceLocation, TraceFrame, TraceFrameAnnotation,
    TraceKind,
};
use crate::prepare::AnalysisBatch;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default)]
    pub run: RunMetadata,
    #[serde(default)]
    pub issues: Vec<IssueInput>,
    #[serde(default)]
    pub frames: Vec<FrameInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    pub job_id: Option<String>,
    /// Unix seconds, defaults to now
    pub date: Option<i64>,
    pub commit_hash: Option<String>,
    pub kind: Option<String>,
    pub repository: Option<String>,
    #[serde(default)]
    pub status: RunStatus,
    pub status_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueInput {
    pub handle: String,
    pub code: i64,
    pub callable: String,
    pub filename: Option<String>,
    pub message: String,
    pub location: SourceLocation,
    #[serde(default)]
    pub taint_locations: Vec<SourceLocation>,
    #[serde(default)]
    pub features: Vec<String>,
    pub fix_info: Option<String>,
    #[serde(default)]
    pub rank: i64,
    #[serde(default)]
    pub callable_count: i64,
    /// Local ids of the frames this issue flows through
    #[serde(default)]
    pub frames: Vec<String>,
    pub min_trace_length_to_sources: Option<i64>,
    pub min_trace_length_to_sinks: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameInput {
    /// Local reference, only meaningful within this input
    pub id: String,
    pub kind: TraceKind,
    pub caller: String,
    #[serde(default)]
    pub caller_port: String,
    pub callee: String,
    #[serde(default)]
    pub callee_port: String,
    pub location: SourceLocation,
    pub filename: String,
    #[serde(default)]
    pub titos: Vec<SourceLocation>,
    #[serde(default)]
    pub leaves: Vec<LeafInput>,
    #[serde(default)]
    pub annotations: Vec<AnnotationInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeafInput {
    /// `source` or `sink`
    pub kind: SharedTextKind,
    pub name: String,
    pub trace_length: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationInput {
    pub location: SourceLocation,
    pub message: String,
    pub link: Option<String>,
    pub trace_key: Option<String>,
}

impl RunInput {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Build the records of this run
    pub fn into_batch(self) -> Result<AnalysisBatch> {
        let mut batch = AnalysisBatch::new();

        let date = match self.run.date {
            Some(date) => date,
            None => unix_now()?,
        };
        let mut run = Run::new(date);
        run.job_id = self.run.job_id;
        run.commit_hash = self.run.commit_hash;
        run.kind = self.run.kind;
        run.repository = self.run.repository;
        run.status = self.run.status;
        run.status_description = self.run.status_description;
        let run_id = batch.add_run(run);

        let mut frames: HashMap<String, DbId> = HashMap::new();
        for frame in self.frames {
            if frames.contains_key(&frame.id) {
                return Err(Error::Parse(format!("Frame '{}' is defined twice", frame.id)));
            }
            let frame_id = add_frame(&mut batch, &run_id, &frame)?;
            frames.insert(frame.id, frame_id);
        }

        for issue in self.issues {
            add_issue(&mut batch, &run_id, date, &frames, issue)?;
        }

        Ok(batch)
    }
}

fn add_frame(batch: &mut AnalysisBatch, run_id: &DbId, input: &FrameInput) -> Result<DbId> {
    let mut frame = TraceFrame::new(
        input.kind,
        &input.caller,
        &input.callee,
        input.location,
        &input.filename,
        run_id,
    )
    .with_ports(&input.caller_port, &input.callee_port);
    frame.titos = input.titos.clone();
    let frame_id = batch.add_trace_frame(frame);

    for leaf in &input.leaves {
        if !matches!(leaf.kind, SharedTextKind::Source | SharedTextKind::Sink) {
            return Err(Error::Parse(format!(
                "Leaf '{}' of frame '{}' must be a source or sink, not {}",
                leaf.name, input.id, leaf.kind
            )));
        }
        let leaf_id = batch.add_shared_text(&leaf.name, leaf.kind);
        batch.link_frame_leaf(&frame_id, &leaf_id, leaf.trace_length);
    }

    for note in &input.annotations {
        let mut annotation = TraceFrameAnnotation::new(&frame_id, note.location, &note.message);
        annotation.link = note.link.clone();
        annotation.trace_key = note.trace_key.clone();
        batch.add_annotation(annotation);
    }

    Ok(frame_id)
}

fn add_issue(
    batch: &mut AnalysisBatch,
    run_id: &DbId,
    date: i64,
    frames: &HashMap<String, DbId>,
    input: IssueInput,
) -> Result<()> {
    let raw = serde_json::to_string(&input)?;

    let mut issue = Issue::new(&input.handle, input.code, &input.callable, run_id, date);
    issue.filename = input.filename.clone();
    issue.json = Some(raw);
    let issue_id = batch.add_issue(issue);

    let message_id = batch.add_shared_text(&input.message, SharedTextKind::Message);
    let fix_info_id = input.fix_info.as_ref().map(|info| batch.add_fix_info(info));

    let mut instance = IssueInstance::new(&issue_id, run_id, input.location);
    instance.filename = input.filename;
    instance.taint_locations = input.taint_locations;
    instance.message_id = Some(message_id);
    instance.fix_info_id = fix_info_id;
    instance.min_trace_length_to_sources = input.min_trace_length_to_sources;
    instance.min_trace_length_to_sinks = input.min_trace_length_to_sinks;
    instance.rank = input.rank;
    instance.callable_count = input.callable_count;
    let instance_id = batch.add_issue_instance(instance);

    for feature in &input.features {
        let feature_id = batch.add_shared_text(feature, SharedTextKind::Feature);
        batch.link_instance_text(&instance_id, &feature_id);
    }

    for reference in &input.frames {
        let frame_id = frames.get(reference).ok_or_else(|| {
            Error::Parse(format!("Issue '{}' refers to unknown frame '{}'", input.handle, reference))
        })?;
        batch.link_instance_frame(&instance_id, frame_id);
    }

    Ok(())
}

fn unix_now() -> Result<i64> {
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| Error::Parse(format!("System clock is before the epoch: {}", e)))?;
    Ok(elapsed.as_secs() as i64)
}
