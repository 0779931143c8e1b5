//! Entity kinds - the categories of persisted records
//!
//! Kinds are listed in dependency order: every kind only references kinds
//! that come before it, so a batch persisted in this order never reads an
//! identity that has not been resolved yet.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A category of persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// One invocation of the analyzer
    Run,
    /// Deduplicated strings: features, messages, source and sink names
    SharedText,
    /// An issue that can persist across runs, keyed by its handle
    Issue,
    /// Suggested fix attached to an issue instance
    IssueInstanceFixInfo,
    /// Per-run occurrence of an issue
    IssueInstance,
    /// One call edge of a taint trace
    TraceFrame,
    /// Extra information attached to a trace frame
    TraceFrameAnnotation,
    /// Issue instance <-> shared text
    IssueInstanceSharedTextAssoc,
    /// Issue instance <-> trace frame
    IssueInstanceTraceFrameAssoc,
    /// Trace frame <-> leaf (source or sink shared text)
    TraceFrameLeafAssoc,
}

impl EntityKind {
    /// Get the string representation of the entity kind
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Run => "run",
            EntityKind::SharedText => "shared_text",
            EntityKind::Issue => "issue",
            EntityKind::IssueInstanceFixInfo => "issue_instance_fix_info",
            EntityKind::IssueInstance => "issue_instance",
            EntityKind::TraceFrame => "trace_frame",
            EntityKind::TraceFrameAnnotation => "trace_frame_annotation",
            EntityKind::IssueInstanceSharedTextAssoc => "issue_instance_shared_text_assoc",
            EntityKind::IssueInstanceTraceFrameAssoc => "issue_instance_trace_frame_assoc",
            EntityKind::TraceFrameLeafAssoc => "trace_frame_leaf_assoc",
        }
    }

    /// Name of the table holding rows of this kind
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Run => "runs",
            EntityKind::SharedText => "shared_texts",
            EntityKind::Issue => "issues",
            EntityKind::IssueInstanceFixInfo => "issue_instance_fix_info",
            EntityKind::IssueInstance => "issue_instances",
            EntityKind::TraceFrame => "trace_frames",
            EntityKind::TraceFrameAnnotation => "trace_frame_annotations",
            EntityKind::IssueInstanceSharedTextAssoc => "issue_instance_shared_text_assoc",
            EntityKind::IssueInstanceTraceFrameAssoc => "issue_instance_trace_frame_assoc",
            EntityKind::TraceFrameLeafAssoc => "trace_frame_leaf_assoc",
        }
    }

    /// Whether identities of this kind come from the primary-key allocator.
    ///
    /// Association kinds have no identity column of their own.
    pub fn is_allocator_managed(&self) -> bool {
        !self.is_association()
    }

    /// Check if this kind joins two other kinds
    pub fn is_association(&self) -> bool {
        matches!(
            self,
            EntityKind::IssueInstanceSharedTextAssoc
                | EntityKind::IssueInstanceTraceFrameAssoc
                | EntityKind::TraceFrameLeafAssoc
        )
    }

    /// All kinds, in dependency order
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Run,
            EntityKind::SharedText,
            EntityKind::Issue,
            EntityKind::IssueInstanceFixInfo,
            EntityKind::IssueInstance,
            EntityKind::TraceFrame,
            EntityKind::TraceFrameAnnotation,
            EntityKind::IssueInstanceSharedTextAssoc,
            EntityKind::IssueInstanceTraceFrameAssoc,
            EntityKind::TraceFrameLeafAssoc,
        ]
    }

    /// Kinds whose identities are handed out by the allocator
    pub fn allocator_managed() -> impl Iterator<Item = EntityKind> {
        Self::all().iter().copied().filter(EntityKind::is_allocator_managed)
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EntityKind::all()
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s || kind.table_name() == s)
            .ok_or_else(|| Error::Parse(format!("Unknown entity kind: {}", s)))
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_roundtrip() {
        for kind in EntityKind::all() {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
            let by_table: EntityKind = kind.table_name().parse().unwrap();
            assert_eq!(*kind, by_table);
        }
    }

    #[test]
    fn test_associations_are_not_allocator_managed() {
        assert!(!EntityKind::TraceFrameLeafAssoc.is_allocator_managed());
        assert!(EntityKind::SharedText.is_allocator_managed());
        assert_eq!(EntityKind::allocator_managed().count(), 7);
    }

    #[test]
    fn test_associations_come_last() {
        let first_assoc = EntityKind::all()
            .iter()
            .position(|k| k.is_association())
            .unwrap();
        assert!(EntityKind::all()[first_assoc..].iter().all(|k| k.is_association()));
        assert!(EntityKind::Issue < EntityKind::IssueInstance);
    }
}
