//! Entity keys used to match new records against stored rows
//!
//! A key is the ordered tuple of column values that identifies a record of
//! one kind, e.g. `(contents, kind)` for a shared text. Keys are compared
//! through a blake3 digest of a tagged, length-prefixed encoding, so two
//! tuples only collide if every part matches in type and value.

use crate::{Error, Result};
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use std::fmt;

/// One column value of an entity key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    Text(String),
    Int(i64),
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Text(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Text(s)
    }
}

impl From<i64> for KeyPart {
    fn from(i: i64) -> Self {
        KeyPart::Int(i)
    }
}

impl TryFrom<Value> for KeyPart {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Text(s) => Ok(KeyPart::Text(s)),
            Value::Integer(i) => Ok(KeyPart::Int(i)),
            other => Err(Error::TypeMismatch(format!(
                "key column expected to be text or integer but was {}",
                other.data_type()
            ))),
        }
    }
}

impl ToSql for KeyPart {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            KeyPart::Text(s) => s.to_sql(),
            KeyPart::Int(i) => i.to_sql(),
        }
    }
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Text(s) => write!(f, "{:?}", s),
            KeyPart::Int(i) => write!(f, "{}", i),
        }
    }
}

/// Digest of an `EntityKey`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 32]);

/// Kind-specific tuple identifying a record
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityKey(Vec<KeyPart>);

impl EntityKey {
    pub fn new(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fail unless the key has exactly one part per key column
    pub fn check_arity(&self, columns: &[&str]) -> Result<()> {
        if columns.is_empty() {
            return Err(Error::MalformedKey("no key columns".to_string()));
        }
        if self.0.len() != columns.len() {
            return Err(Error::MalformedKey(format!(
                "key {} has {} parts, expected {} for columns {:?}",
                self,
                self.0.len(),
                columns.len(),
                columns
            )));
        }
        Ok(())
    }

    pub fn digest(&self) -> KeyDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.0.len() as u64).to_le_bytes());
        for part in &self.0 {
            match part {
                KeyPart::Text(s) => {
                    hasher.update(b"t");
                    hasher.update(&(s.len() as u64).to_le_bytes());
                    hasher.update(s.as_bytes());
                }
                KeyPart::Int(i) => {
                    hasher.update(b"i");
                    hasher.update(&i.to_le_bytes());
                }
            }
        }
        KeyDigest(*hasher.finalize().as_bytes())
    }
}

impl<const N: usize> From<[KeyPart; N]> for EntityKey {
    fn from(parts: [KeyPart; N]) -> Self {
        Self(parts.into())
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, ")")
    }
}
