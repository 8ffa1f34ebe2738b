//! Region Module
//!
//! Insertion-ordered key sets backing the hot, warm and cold tiers, plus the
//! striped key locks that serialize work on a single key.

use std::collections::hash_map::RandomState;
use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::cache::Tier;

/// Default number of stripes in a [`KeyLocks`] table.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

// == Key Locks ==
/// Striped mutual exclusion for keys.
///
/// The table size is fixed at construction and independent of how many keys
/// a shard holds. Two keys may share a stripe; callers must never hold more
/// than one guard at a time.
#[derive(Debug)]
pub struct KeyLocks {
    stripes: Box<[Mutex<()>]>,
    hasher: RandomState,
}

/// Held stripe of a [`KeyLocks`] table. Released on drop.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    stripe: usize,
    _held: MutexGuard<'a, ()>,
}

impl KeyGuard<'_> {
    /// Whether this guard's stripe is the one owning `key`.
    pub fn covers(&self, key: &str) -> bool {
        self.locks.stripe_of(key) == self.stripe
    }
}

impl KeyLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    /// Blocks until the stripe owning `key` is free. Released when the guard drops.
    pub fn lock(&self, key: &str) -> KeyGuard<'_> {
        let stripe = self.stripe_of(key);
        KeyGuard {
            locks: self,
            stripe,
            _held: self.stripes[stripe].lock(),
        }
    }

    fn stripe_of(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) as usize) % self.stripes.len()
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_STRIPES)
    }
}

// == Members ==
/// Keys ordered by arrival. A monotonically increasing sequence number gives
/// O(log n) append, unlink and oldest lookups.
#[derive(Debug, Default)]
struct Members {
    order: BTreeMap<u64, String>,
    seq_of: HashMap<String, u64>,
    next_seq: u64,
}

// == Region ==
/// One tier of one shard.
///
/// `len()` reads an atomic counter that is only updated while the member
/// lock is held, so it never disagrees with the member set at a
/// synchronization point.
#[derive(Debug)]
pub struct Region {
    tier: Tier,
    max_size: usize,
    members: Mutex<Members>,
    size: AtomicUsize,
}

impl Region {
    // == Constructor ==
    pub fn new(tier: Tier, max_size: usize) -> Self {
        Self {
            tier,
            max_size,
            members: Mutex::new(Members::default()),
            size: AtomicUsize::new(0),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    // == Push ==
    /// Appends `key` as the newest member.
    ///
    /// A key that is already a member is moved to the newest position and the
    /// size is left unchanged. Returns true if the key was not a member.
    pub fn push(&self, key: &str) -> bool {
        let mut members = self.members.lock();
        let seq = members.next_seq;
        members.next_seq += 1;

        let inserted = match members.seq_of.insert(key.to_string(), seq) {
            Some(old) => {
                members.order.remove(&old);
                false
            }
            None => {
                self.size.fetch_add(1, Ordering::SeqCst);
                true
            }
        };
        members.order.insert(seq, key.to_string());
        inserted
    }

    // == Remove ==
    /// Unlinks `key`. The caller proves exclusive access to the key by passing
    /// the guard of its stripe.
    pub fn remove(&self, key: &str, held: &KeyGuard<'_>) -> bool {
        debug_assert!(held.covers(key), "guard does not cover key {}", key);
        let mut members = self.members.lock();
        match members.seq_of.remove(key) {
            Some(seq) => {
                members.order.remove(&seq);
                self.size.fetch_sub(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    // == Oldest ==
    /// Returns the earliest-arrived member without removing it.
    pub fn oldest(&self) -> Option<String> {
        self.members
            .lock()
            .order
            .first_key_value()
            .map(|(_, key)| key.clone())
    }

    // == Contains ==
    pub fn contains(&self, key: &str) -> bool {
        self.members.lock().seq_of.contains_key(key)
    }

    // == Snapshot ==
    /// Copies the current members, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.members.lock().order.values().cloned().collect()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while the region holds more members than its bound.
    pub fn is_over(&self) -> bool {
        self.len() > self.max_size
    }
}
