// SPDX-FileCopyrightText: 2023 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

//! A thin adapter over the underlying ordered index the transaction layer
//! is built on top of: `lookup`, `insert_if_absent`, `range_scan`.
//!
//! Implemented with [`scc::TreeIndex`], a lock-free ordered B+-tree.

use crate::cell::VersionedCell;
use crate::clock::Timestamp;
use scc::ebr::Guard;
use scc::TreeIndex;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

/// A byte-string key.
pub type Key = Vec<u8>;

/// The ordered index mapping keys to their [`VersionedCell`].
pub struct Index {
    tree: TreeIndex<Key, Arc<VersionedCell>>,
}

impl Default for Index {
    fn default() -> Self {
        Index {
            tree: TreeIndex::new(),
        }
    }
}

impl Index {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cell associated with `key`, if one has been created.
    pub fn lookup(&self, key: &[u8]) -> Option<Arc<VersionedCell>> {
        self.tree.peek_with(key, |_, cell| cell.clone())
    }

    /// Returns the cell associated with `key`, creating an empty one (with
    /// the sentinel `(MIN_TID, None)` entry) if none exists.
    ///
    /// If two callers race to create the same key, both attempt an insert
    /// and whichever loses simply adopts the cell the index now contains —
    /// the index, not the caller, is the arbiter of which cell is live.
    pub fn insert_if_absent(&self, key: Key) -> Arc<VersionedCell> {
        loop {
            if let Some(cell) = self.lookup(&key) {
                return cell;
            }
            let cell = Arc::new(VersionedCell::new());
            match self.tree.insert(key.clone(), cell.clone()) {
                Ok(()) => return cell,
                Err(_) => continue,
            }
        }
    }

    /// Enumerates `(key, cell)` pairs in key order within `[lo, hi)`.
    ///
    /// `hi = None` means the range is unbounded above.
    pub fn range_scan<F: FnMut(&[u8], &Arc<VersionedCell>)>(
        &self,
        lo: &[u8],
        hi: Option<&[u8]>,
        mut visitor: F,
    ) {
        let guard = Guard::new();
        let start = Bound::Included(lo.to_vec());
        for (key, cell) in self.tree.range((start, Bound::Unbounded), &guard) {
            if let Some(h) = hi {
                if key.as_slice() >= h {
                    break;
                }
            }
            visitor(key, cell);
        }
    }

    /// Returns `true` iff some key in `[lo, hi)` other than those in
    /// `write_set` now carries a version whose timestamp falls strictly
    /// inside `(snapshot_ts, commit_ts)` — a phantom committed by another
    /// transaction into a range this one scanned and found empty.
    pub fn range_has_intruder<T>(
        &self,
        lo: &[u8],
        hi: Option<&[u8]>,
        snapshot_ts: Timestamp,
        commit_ts: Timestamp,
        write_set: &BTreeMap<Vec<u8>, T>,
    ) -> bool {
        let mut intruder = false;
        self.range_scan(lo, hi, |key, cell| {
            if intruder || write_set.contains_key(key) {
                return;
            }
            let (newest, reference) = cell.stable_latest();
            if reference.is_some() && newest > snapshot_ts && newest < commit_ts {
                intruder = true;
            }
        });
        intruder
    }
}
