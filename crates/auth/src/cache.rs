//! Nobody-has-access cache.
//!
//! Memoizes "no role currently holds permission P" so the hot authorization
//! path does not scan every grant record on each query. Entries are soft state:
//! losing one costs a recompute, never a wrong answer.
//!
//! Every grant/revoke must call [`NobodyHasAccessCache::invalidate`] for the
//! identifier it touches. Each key carries a generation counter; a recompute
//! only memoizes its answer if no invalidation happened while it was reading
//! the store, so an invalidation racing a lookup is never lost.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;

use crate::{Permission, PermissionStore, StoreError};

#[derive(Debug, Default, Clone, Copy)]
struct Slot {
    generation: u64,
    unassigned: Option<bool>,
}

/// Counters describing cache effectiveness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// Process-wide memo of permissions held by no role.
///
/// Initialized empty. A slot outlives its memoized answer so its generation
/// survives invalidation; the map is therefore bounded by the registered
/// identifiers plus withdrawn identifiers whose grants were revoked, since
/// [`AccessControl`](crate::AccessControl) only routes those here. Share it
/// between `AccessControl` instances through an `Arc`.
#[derive(Debug, Default)]
pub struct NobodyHasAccessCache {
    slots: RwLock<HashMap<Permission, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl NobodyHasAccessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no role holds `permission`, consulting `store` on a miss.
    pub fn is_unassigned<S>(&self, permission: &Permission, store: &S) -> Result<bool, StoreError>
    where
        S: PermissionStore + ?Sized,
    {
        let observed = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            match slots.get(permission) {
                Some(Slot {
                    unassigned: Some(unassigned),
                    ..
                }) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(*unassigned);
                }
                Some(slot) => slot.generation,
                None => 0,
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        let unassigned = !store.exists_for_permission(permission)?;

        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(permission.clone()).or_default();
        if slot.generation == observed {
            slot.unassigned = Some(unassigned);
        } else {
            tracing::debug!(%permission, "invalidated during recompute; not memoizing");
        }

        Ok(unassigned)
    }

    /// Drop any memoized answer for `permission`.
    pub fn invalidate(&self, permission: &Permission) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        let slot = slots.entry(permission.clone()).or_default();
        slot.generation = slot.generation.wrapping_add(1);
        slot.unassigned = None;
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn invalidate_many<'a, I>(&self, permissions: I)
    where
        I: IntoIterator<Item = &'a Permission>,
    {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for permission in permissions {
            let slot = slots.entry(permission.clone()).or_default();
            slot.generation = slot.generation.wrapping_add(1);
            slot.unassigned = None;
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Invalidate every entry.
    pub fn clear(&self) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        for slot in slots.values_mut() {
            slot.generation = slot.generation.wrapping_add(1);
            slot.unassigned = None;
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of identifiers with a memoized answer.
    pub fn len(&self) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots.values().filter(|s| s.unassigned.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}
