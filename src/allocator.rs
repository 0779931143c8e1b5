//! Primary-key range allocator
//!
//! Each allocator-managed kind has a durable counter row holding the last
//! identity handed out. Reserving `n` identities locks that row, advances it
//! by `n` and commits, so concurrent writers always get disjoint ranges. The
//! reserved ranges then live in the allocator, which is owned by one batch.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use crate::{Error, Result};
use crate::entity::EntityKind;
use crate::storage::BackingStore;

/// Lock attempts per kind before contention is surfaced
pub const LOCK_ATTEMPTS: u32 = 3;

const LOCK_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Identities `next..=max` reserved for one kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReservedRange {
    next: i64,
    max: i64,
}

#[derive(Debug, Default)]
pub struct PrimaryKeyAllocator {
    ranges: HashMap<EntityKind, ReservedRange>,
}

impl PrimaryKeyAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `count` identities for each listed kind.
    ///
    /// Kinds without an identity column and zero counts are skipped. With
    /// `use_lock`, every counter is first resynced to the largest identity
    /// already stored.
    pub fn reserve<S: BackingStore + ?Sized>(
        &mut self,
        store: &S,
        counts: &[(EntityKind, usize)],
        use_lock: bool,
    ) -> Result<&mut Self> {
        for &(kind, count) in counts {
            if !kind.is_allocator_managed() || count == 0 {
                continue;
            }
            let range = reserve_range(store, kind, count as i64, use_lock)?;
            tracing::debug!("Reserved {} ids {}..={}", kind, range.next, range.max);
            // Only a committed reservation replaces the previous range
            self.ranges.insert(kind, range);
        }
        Ok(self)
    }

    /// Reset `kind`'s counter to the largest identity stored for it
    pub fn resync<S: BackingStore + ?Sized>(store: &S, kind: EntityKind) -> Result<i64> {
        if !kind.is_allocator_managed() {
            return Err(Error::NotRegistered(kind));
        }
        with_counter_lock(store, kind, |_| {
            let current_id = store.max_existing_id(kind)?;
            store.store_counter(kind, current_id)?;
            Ok(current_id)
        })
    }

    /// Next reserved identity for `kind`
    pub fn get(&mut self, kind: EntityKind) -> Result<i64> {
        if !kind.is_allocator_managed() {
            return Err(Error::NotRegistered(kind));
        }
        let range = self.ranges.get_mut(&kind).ok_or(Error::NotReserved(kind))?;
        if range.next > range.max {
            return Err(Error::RangeExhausted(kind));
        }
        let id = range.next;
        range.next += 1;
        Ok(id)
    }

    /// Identities left in `kind`'s range
    pub fn remaining(&self, kind: EntityKind) -> usize {
        self.ranges
            .get(&kind)
            .map_or(0, |range| (range.max - range.next + 1).max(0) as usize)
    }
}

fn reserve_range<S: BackingStore + ?Sized>(
    store: &S,
    kind: EntityKind,
    count: i64,
    use_lock: bool,
) -> Result<ReservedRange> {
    with_counter_lock(store, kind, |counter| {
        let baseline = match counter {
            Some(current_id) if !use_lock => current_id,
            _ => store.max_existing_id(kind)?,
        };
        let max = baseline + count;
        store.store_counter(kind, max)?;
        Ok(ReservedRange {
            next: baseline + 1,
            max,
        })
    })
}

/// Run `update` holding `kind`'s counter lock, committing only on success
fn with_counter_lock<S, T, F>(store: &S, kind: EntityKind, update: F) -> Result<T>
where
    S: BackingStore + ?Sized,
    F: FnOnce(Option<i64>) -> Result<T>,
{
    let counter = lock_with_retry(store, kind)?;

    let result = update(counter).and_then(|value| {
        store.release_counter(true)?;
        Ok(value)
    });

    if result.is_err() {
        if let Err(e) = store.release_counter(false) {
            tracing::warn!("Failed to roll back {} counter: {}", kind, e);
        }
    }
    result
}

fn lock_with_retry<S: BackingStore + ?Sized>(store: &S, kind: EntityKind) -> Result<Option<i64>> {
    let mut attempt = 1;
    loop {
        match store.lock_counter(kind) {
            Err(Error::LockContention(msg)) if attempt < LOCK_ATTEMPTS => {
                tracing::debug!("{} counter is locked (attempt {}): {}", kind, attempt, msg);
                thread::sleep(LOCK_RETRY_DELAY * attempt);
                attempt += 1;
            }
            other => return other,
        }
    }
}
