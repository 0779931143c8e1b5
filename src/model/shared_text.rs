//! Shared texts - strings reused across records (features, messages,
//! source and sink names) and their association with issue instances

use crate::{Error, Result};
use crate::dbid::DbId;
use crate::entity::EntityKind;
use crate::key::{EntityKey, KeyPart};
use crate::merge::Merger;
use crate::storage::BackingStore;
use super::{text, AssocRecord, KeyedRecord, Record, Row};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SharedTextKind {
    Feature,
    Message,
    Source,
    Sink,
}

impl SharedTextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharedTextKind::Feature => "feature",
            SharedTextKind::Message => "message",
            SharedTextKind::Source => "source",
            SharedTextKind::Sink => "sink",
        }
    }

    pub fn all() -> &'static [SharedTextKind] {
        &[
            SharedTextKind::Feature,
            SharedTextKind::Message,
            SharedTextKind::Source,
            SharedTextKind::Sink,
        ]
    }
}

impl FromStr for SharedTextKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "feature" => Ok(SharedTextKind::Feature),
            "message" => Ok(SharedTextKind::Message),
            "source" => Ok(SharedTextKind::Source),
            "sink" => Ok(SharedTextKind::Sink),
            _ => Err(Error::Parse(format!("Unknown shared text kind: {}", s))),
        }
    }
}

impl std::fmt::Display for SharedTextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A string-ish property that can be shared by many records
#[derive(Debug, Clone)]
pub struct SharedText {
    pub id: DbId,
    pub contents: String,
    pub kind: SharedTextKind,
}

impl SharedText {
    pub fn new(contents: impl Into<String>, kind: SharedTextKind) -> Self {
        Self {
            id: DbId::new(),
            contents: contents.into(),
            kind,
        }
    }
}

impl Record for SharedText {
    const KIND: EntityKind = EntityKind::SharedText;

    fn id(&self) -> Option<&DbId> {
        Some(&self.id)
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("id", self.id.sql_value()?),
            ("contents", text(&self.contents)),
            ("kind", text(self.kind.as_str())),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_keys(items)
    }
}

impl KeyedRecord for SharedText {
    const KEY_COLUMNS: &'static [&'static str] = &["contents", "kind"];

    fn placeholder(&self) -> &DbId {
        &self.id
    }

    fn key(&self) -> Result<EntityKey> {
        Ok(EntityKey::from([
            KeyPart::from(self.contents.as_str()),
            KeyPart::from(self.kind.as_str()),
        ]))
    }
}

/// Issue instance <-> shared text (features, sources, sinks of an instance)
#[derive(Debug, Clone)]
pub struct IssueInstanceSharedTextAssoc {
    pub issue_instance_id: DbId,
    pub shared_text_id: DbId,
}

impl IssueInstanceSharedTextAssoc {
    pub fn new(issue_instance_id: &DbId, shared_text_id: &DbId) -> Self {
        Self {
            issue_instance_id: issue_instance_id.clone(),
            shared_text_id: shared_text_id.clone(),
        }
    }
}

impl Record for IssueInstanceSharedTextAssoc {
    const KIND: EntityKind = EntityKind::IssueInstanceSharedTextAssoc;

    fn id(&self) -> Option<&DbId> {
        None
    }

    fn to_row(&self) -> Result<Row> {
        Ok(Row::from([
            ("issue_instance_id", self.issue_instance_id.sql_value()?),
            ("shared_text_id", self.shared_text_id.sql_value()?),
        ]))
    }

    fn merge<S: BackingStore + ?Sized>(merger: &Merger<'_, S>, items: Vec<Self>) -> Result<Vec<Self>> {
        merger.merge_by_pair(items)
    }
}

impl AssocRecord for IssueInstanceSharedTextAssoc {
    fn endpoints(&self) -> (&DbId, &DbId) {
        (&self.issue_instance_id, &self.shared_text_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_text_kind_roundtrip() {
        for kind in SharedTextKind::all() {
            let parsed: SharedTextKind = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn test_to_row_requires_resolution() {
        let text = SharedText::new("via tito", SharedTextKind::Feature);
        assert!(text.to_row().is_err());

        text.id.resolve(9_i64, true).unwrap();
        let row = text.to_row().unwrap();
        assert_eq!(row["id"], rusqlite::types::Value::Integer(9));
        assert_eq!(row["kind"], rusqlite::types::Value::Text("feature".to_string()));
    }

    #[test]
    fn test_key_matches_columns() {
        let text = SharedText::new("UserControlled", SharedTextKind::Source);
        let key = text.key().unwrap();
        key.check_arity(SharedText::KEY_COLUMNS).unwrap();
        assert_eq!(key.parts()[1], KeyPart::from("source"));
    }
}
