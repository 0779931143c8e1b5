//! Placeholder identities
//!
//! Records reference each other by id, but ids are only known once the batch
//! is merged against the store and the allocator hands out fresh keys. A
//! `DbId` lets records share an identity before that point: every clone of a
//! `DbId` sees the same slot, so resolving it once makes the real id visible
//! to every record holding it.
//!
//! A slot may point at one other placeholder (a duplicate collapsing onto the
//! first occurrence of its key). Deeper chains are rejected.

use crate::{Error, Result};
use rusqlite::types::Value;
use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Add, Deref};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Source of `local_id`s, unique for the lifetime of the process
static NEXT_LOCAL_ID: AtomicU64 = AtomicU64::new(0);

/// A value a placeholder can be resolved to
#[derive(Debug, Clone)]
pub enum IdValue {
    /// No identity yet
    Absent,
    /// A real primary key
    Concrete(i64),
    /// Whatever another placeholder resolves to
    Placeholder(DbId),
}

impl From<i64> for IdValue {
    fn from(id: i64) -> Self {
        IdValue::Concrete(id)
    }
}

impl From<Option<i64>> for IdValue {
    fn from(id: Option<i64>) -> Self {
        id.map_or(IdValue::Absent, IdValue::Concrete)
    }
}

impl From<&DbId> for IdValue {
    fn from(id: &DbId) -> Self {
        IdValue::Placeholder(id.clone())
    }
}

impl From<DbId> for IdValue {
    fn from(id: DbId) -> Self {
        IdValue::Placeholder(id)
    }
}

impl TryFrom<Value> for IdValue {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Integer(id) => Ok(IdValue::Concrete(id)),
            Value::Null => Ok(IdValue::Absent),
            other => Err(Error::TypeMismatch(format!(
                "identity expected to be an integer but was {}",
                other.data_type()
            ))),
        }
    }
}

enum Slot {
    Unset,
    Concrete(i64),
    Indirect(DbId),
}

impl Slot {
    fn is_unset(&self) -> bool {
        matches!(self, Slot::Unset)
    }

    fn same_as(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Unset, Slot::Unset) => true,
            (Slot::Concrete(a), Slot::Concrete(b)) => a == b,
            (Slot::Indirect(a), Slot::Indirect(b)) => a.local_id() == b.local_id(),
            _ => false,
        }
    }

    fn describe(&self) -> String {
        match self {
            Slot::Unset => "unset".to_string(),
            Slot::Concrete(id) => id.to_string(),
            Slot::Indirect(target) => format!("-> #{}", target.local_id()),
        }
    }
}

struct Shared {
    local_id: u64,
    slot: RefCell<Slot>,
    is_new: Cell<bool>,
}

/// Placeholder for a primary key that may not be known yet.
///
/// Equality and hashing use the `local_id`, never the resolved value, so a
/// `DbId` can key a map before it is resolved.
#[derive(Clone)]
pub struct DbId(Rc<Shared>);

impl DbId {
    /// Create an unresolved placeholder
    pub fn new() -> Self {
        let local_id = NEXT_LOCAL_ID.fetch_add(1, AtomicOrdering::Relaxed);
        Self(Rc::new(Shared {
            local_id,
            slot: RefCell::new(Slot::Unset),
            is_new: Cell::new(false),
        }))
    }

    /// Create a placeholder already resolved to a row that exists in storage
    pub fn existing(id: i64) -> Self {
        let db_id = Self::new();
        *db_id.0.slot.borrow_mut() = Slot::Concrete(id);
        db_id
    }

    /// Process-unique id assigned at construction
    pub fn local_id(&self) -> u64 {
        self.0.local_id
    }

    /// True if the identity was freshly allocated rather than matched
    pub fn is_new(&self) -> bool {
        self.0.is_new.get()
    }

    /// Check whether `resolved()` would succeed
    pub fn is_resolved(&self) -> bool {
        self.resolved().is_ok()
    }

    /// Fix this placeholder's identity.
    ///
    /// Pointing at another placeholder is allowed only if that placeholder
    /// does not itself point elsewhere. A slot that is already set can only
    /// be resolved again to the same value.
    pub fn resolve(&self, value: impl Into<IdValue>, is_new: bool) -> Result<&Self> {
        let slot = match value.into() {
            IdValue::Absent => Slot::Unset,
            IdValue::Concrete(id) => Slot::Concrete(id),
            IdValue::Placeholder(target) => {
                if Rc::ptr_eq(&self.0, &target.0) {
                    return Err(Error::TypeMismatch(format!(
                        "identity #{} cannot point at itself",
                        self.local_id()
                    )));
                }
                if matches!(*target.0.slot.borrow(), Slot::Indirect(_)) {
                    return Err(Error::TypeMismatch(format!(
                        "identity #{} points at another identity, #{} cannot point at it",
                        target.local_id(),
                        self.local_id()
                    )));
                }
                Slot::Indirect(target)
            }
        };

        {
            let mut current = self.0.slot.borrow_mut();
            if !current.is_unset() && !current.same_as(&slot) {
                return Err(Error::AlreadyResolved {
                    local_id: self.local_id(),
                    current: current.describe(),
                    requested: slot.describe(),
                });
            }
            *current = slot;
        }
        self.0.is_new.set(is_new);
        Ok(self)
    }

    /// The concrete primary key, following at most one indirection
    pub fn resolved(&self) -> Result<i64> {
        match &*self.0.slot.borrow() {
            Slot::Concrete(id) => Ok(*id),
            Slot::Unset => Err(Error::Unresolved(self.local_id())),
            Slot::Indirect(target) => match &*target.0.slot.borrow() {
                Slot::Concrete(id) => Ok(*id),
                Slot::Unset => Err(Error::Unresolved(self.local_id())),
                Slot::Indirect(next) => Err(Error::TypeMismatch(format!(
                    "identity #{} resolves through #{} to #{}, only one level of indirection is allowed",
                    self.local_id(),
                    target.local_id(),
                    next.local_id()
                ))),
            },
        }
    }

    /// Resolved id as a storage value
    pub fn sql_value(&self) -> Result<Value> {
        Ok(Value::Integer(self.resolved()?))
    }

    /// Compare two identities by their resolved values
    pub fn try_cmp(&self, other: &DbId) -> Result<Ordering> {
        Ok(self.resolved()?.cmp(&other.resolved()?))
    }
}

impl Default for DbId {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for DbId {
    fn eq(&self, other: &Self) -> bool {
        self.local_id() == other.local_id()
    }
}

impl Eq for DbId {}

impl Hash for DbId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.local_id().hash(state);
    }
}

impl Add<i64> for &DbId {
    type Output = Result<i64>;

    fn add(self, rhs: i64) -> Result<i64> {
        Ok(self.resolved()? + rhs)
    }
}

impl Add<&DbId> for &DbId {
    type Output = Result<i64>;

    fn add(self, rhs: &DbId) -> Result<i64> {
        Ok(self.resolved()? + rhs.resolved()?)
    }
}

impl fmt::Debug for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DbId(#{} {}, is_new={})",
            self.local_id(),
            self.0.slot.borrow().describe(),
            self.is_new()
        )
    }
}

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved() {
            Ok(id) => write!(f, "{}", id),
            Err(_) => write!(f, "<unresolved #{}>", self.local_id()),
        }
    }
}

/// Identity of an issue.
///
/// Carries `replace_assocs`, set by higher-level merge logic when an issue
/// reappears after having been collapsed as a duplicate. The flag is shared
/// between clones and plays no part in resolution.
#[derive(Clone, Debug, Default)]
pub struct IssueDbId {
    id: DbId,
    replace_assocs: Rc<Cell<bool>>,
}

impl IssueDbId {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn existing(id: i64) -> Self {
        Self {
            id: DbId::existing(id),
            replace_assocs: Rc::default(),
        }
    }

    pub fn replace_assocs(&self) -> bool {
        self.replace_assocs.get()
    }

    pub fn set_replace_assocs(&self, replace: bool) {
        self.replace_assocs.set(replace);
    }

    pub fn as_db_id(&self) -> &DbId {
        &self.id
    }
}

impl Deref for IssueDbId {
    type Target = DbId;

    fn deref(&self) -> &DbId {
        &self.id
    }
}

impl From<&IssueDbId> for IdValue {
    fn from(id: &IssueDbId) -> Self {
        IdValue::Placeholder(id.id.clone())
    }
}

impl fmt::Display for IssueDbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_unresolved() {
        let id = DbId::new();
        assert!(!id.is_resolved());
        assert!(matches!(id.resolved(), Err(Error::Unresolved(local)) if local == id.local_id()));
    }

    #[test]
    fn test_existing_is_concrete_and_not_new() {
        let id = DbId::existing(42);
        assert_eq!(id.resolved().unwrap(), 42);
        assert!(!id.is_new());
    }

    #[test]
    fn test_local_ids_are_unique() {
        let a = DbId::new();
        let b = DbId::new();
        assert_ne!(a.local_id(), b.local_id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_clones_share_resolution() {
        let id = DbId::new();
        let reference = id.clone();
        id.resolve(7_i64, true).unwrap();
        assert_eq!(reference.resolved().unwrap(), 7);
        assert!(reference.is_new());
    }

    #[test]
    fn test_one_level_of_indirection() {
        let first = DbId::new();
        let duplicate = DbId::new();
        duplicate.resolve(&first, false).unwrap();
        assert!(!duplicate.is_resolved());

        first.resolve(11_i64, true).unwrap();
        assert_eq!(duplicate.resolved().unwrap(), 11);
        assert!(!duplicate.is_new());
    }

    #[test]
    fn test_nested_indirection_is_rejected_at_resolve() {
        let a = DbId::new();
        let b = DbId::new();
        let c = DbId::new();
        b.resolve(&a, false).unwrap();
        let err = c.resolve(&b, false).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
    }

    #[test]
    fn test_nested_indirection_is_rejected_at_read() {
        let a = DbId::new();
        let b = DbId::new();
        let c = DbId::new();
        c.resolve(&b, false).unwrap();
        b.resolve(&a, false).unwrap();
        a.resolve(1_i64, true).unwrap();
        assert!(matches!(c.resolved(), Err(Error::TypeMismatch(_))));
        assert_eq!(b.resolved().unwrap(), 1);
    }

    #[test]
    fn test_self_reference_is_rejected() {
        let a = DbId::new();
        assert!(matches!(a.resolve(&a, false), Err(Error::TypeMismatch(_))));
    }

    #[test]
    fn test_resolution_is_not_reassigned() {
        let id = DbId::new();
        id.resolve(5_i64, true).unwrap();
        id.resolve(5_i64, true).unwrap();
        let err = id.resolve(6_i64, true).unwrap_err();
        assert!(matches!(err, Error::AlreadyResolved { .. }));
        assert_eq!(id.resolved().unwrap(), 5);
    }

    #[test]
    fn test_arithmetic_and_ordering() {
        let a = DbId::existing(3);
        let b = DbId::existing(4);
        assert_eq!((&a + 1_i64).unwrap(), 4);
        assert_eq!((&a + &b).unwrap(), 7);
        assert_eq!(a.try_cmp(&b).unwrap(), Ordering::Less);

        let unresolved = DbId::new();
        assert!((&unresolved + 1_i64).is_err());
        assert!(a.try_cmp(&unresolved).is_err());
    }

    #[test]
    fn test_value_conversion() {
        assert!(matches!(IdValue::try_from(Value::Integer(9)), Ok(IdValue::Concrete(9))));
        assert!(matches!(IdValue::try_from(Value::Null), Ok(IdValue::Absent)));
        assert!(matches!(
            IdValue::try_from(Value::Text("9".to_string())),
            Err(Error::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_display() {
        let id = DbId::new();
        assert!(id.to_string().starts_with("<unresolved"));
        id.resolve(12_i64, true).unwrap();
        assert_eq!(id.to_string(), "12");
    }

    #[test]
    fn test_issue_replace_assocs_is_shared() {
        let id = IssueDbId::new();
        let clone = id.clone();
        assert!(!clone.replace_assocs());
        id.set_replace_assocs(true);
        assert!(clone.replace_assocs());

        id.resolve(3_i64, false).unwrap();
        assert_eq!(clone.resolved().unwrap(), 3);
    }
}
