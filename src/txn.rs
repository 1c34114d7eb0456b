// SPDX-FileCopyrightText: 2023 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

//! Per-transaction state: the read set, write set, absent range set, and the
//! four-phase commit protocol that reconciles them against the index.

use crate::absent_range::AbsentRangeSet;
use crate::cell::{Record, RecordRef, VersionedCell};
use crate::clock::{Clock, Timestamp};
use crate::error::Error;
use crate::index::{Index, Key};
use crate::utils::successor;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// What a transaction observed the first time it read a key.
#[derive(Clone)]
struct ReadEntry {
    reference: RecordRef,
    cell: Arc<VersionedCell>,
}

/// The terminal/non-terminal states a transaction moves through.
///
/// `Active -> Committed` and `Active -> Aborted` are the only transitions;
/// both destinations are terminal.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    Active,
    Committed,
    Aborted,
}

/// A single in-flight (or resolved) transaction.
///
/// Borrows the [`Index`] and [`Clock`] of the [`Database`](crate::database::Database)
/// it was begun from; read/write/absent sets are exclusively owned by the
/// transaction and touched by no other thread.
pub struct Transaction<'db, C: Clock> {
    snapshot_ts: Timestamp,
    index: &'db Index,
    clock: &'db C,
    read_set: HashMap<Key, ReadEntry>,
    write_set: BTreeMap<Key, RecordRef>,
    absent_ranges: AbsentRangeSet,
    state: State,
}

impl<'db, C: Clock> Transaction<'db, C> {
    pub(crate) fn new(index: &'db Index, clock: &'db C) -> Self {
        Transaction {
            snapshot_ts: clock.peek(),
            index,
            clock,
            read_set: HashMap::new(),
            write_set: BTreeMap::new(),
            absent_ranges: AbsentRangeSet::new(),
            state: State::Active,
        }
    }

    /// The snapshot timestamp fixed when this transaction began.
    #[must_use]
    pub fn snapshot_ts(&self) -> Timestamp {
        self.snapshot_ts
    }

    /// Reads `key` as of this transaction's snapshot.
    ///
    /// A prior `put`/`delete` of the same key in this transaction takes
    /// precedence (read-own-write). Otherwise the key's cell is located (and
    /// materialized via existence locking if it has never been written), a
    /// stable read is taken, and the observation is cached so repeated reads
    /// of the same key are free and so commit can revalidate it.
    pub fn get(&mut self, key: &[u8]) -> RecordRef {
        debug_assert_eq!(self.state, State::Active, "get on a resolved transaction");

        if let Some(r) = self.write_set.get(key) {
            return r.clone();
        }
        if let Some(entry) = self.read_set.get(key) {
            return entry.reference.clone();
        }

        let cell = self.index.insert_if_absent(key.to_vec());
        let reference = match cell.stable_read(self.snapshot_ts) {
            Some((_, reference)) => reference,
            // History was truncated past our snapshot; we cannot prove what
            // the key held. Surface it as not-found — commit-time
            // validation independently re-derives this from the cell and
            // aborts, so no conflict is silently missed.
            None => None,
        };
        self.read_set.insert(
            key.to_vec(),
            ReadEntry {
                reference: reference.clone(),
                cell,
            },
        );
        reference
    }

    /// Buffers a write of `key`. Visible to this transaction's own reads
    /// immediately; not installed into the index until a successful commit.
    pub fn put(&mut self, key: &[u8], record: Record) {
        debug_assert_eq!(self.state, State::Active, "put on a resolved transaction");
        self.write_set.insert(key.to_vec(), Some(record));
    }

    /// Buffers a logical delete of `key` (a `null` record reference).
    pub fn delete(&mut self, key: &[u8]) {
        debug_assert_eq!(self.state, State::Active, "delete on a resolved transaction");
        self.write_set.insert(key.to_vec(), None);
    }

    /// Enumerates `(key, record)` pairs visible at the snapshot within
    /// `[lo, hi)`, `hi = None` meaning unbounded.
    ///
    /// Every visited key with a visible, non-deleted version is added to the
    /// read set; every stretch of the range found to contain no such key —
    /// including the span occupied by cells that exist but have no version
    /// visible at the snapshot — is recorded as an absent range, so that a
    /// concurrent insert anywhere in the scanned-but-empty space is caught
    /// as a phantom at commit.
    pub fn scan<F: FnMut(&[u8], &Record)>(&mut self, lo: &[u8], hi: Option<&[u8]>, mut visitor: F) {
        debug_assert_eq!(self.state, State::Active, "scan on a resolved transaction");

        let mut gap_start = lo.to_vec();
        let mut visible = Vec::new();
        self.index.range_scan(lo, hi, |key, cell| {
            if let Some((_, Some(record))) = cell.stable_read(self.snapshot_ts) {
                visible.push((key.to_vec(), record, cell.clone()));
            }
        });

        for (key, record, cell) in visible {
            if key.as_slice() > gap_start.as_slice() {
                self.absent_ranges.add_range(gap_start.clone(), Some(key.clone()));
            }
            self.read_set.entry(key.clone()).or_insert(ReadEntry {
                reference: Some(record.clone()),
                cell,
            });
            visitor(&key, &record);
            gap_start = successor(&key);
        }

        match hi {
            Some(h) if gap_start.as_slice() < h => {
                self.absent_ranges.add_range(gap_start, Some(h.to_vec()));
            }
            None => self.absent_ranges.add_range(gap_start, None),
            Some(_) => {}
        }
    }

    /// Runs the four-phase commit protocol.
    ///
    /// Consumes the transaction: on either outcome it is resolved and no
    /// further operations are possible.
    pub fn commit(mut self) -> Result<Timestamp, Error> {
        debug_assert_eq!(self.state, State::Active, "commit on a resolved transaction");

        // Phase 1: lock the write set in ascending key order.
        let mut locked = Vec::with_capacity(self.write_set.len());
        for key in self.write_set.keys() {
            let cell = self.index.insert_if_absent(key.clone());
            cell.lock();
            locked.push((key.clone(), cell));
        }

        // Phase 2: assign the commit timestamp.
        let commit_ts = self.clock.advance();

        // Phase 3: validate.
        //
        // Every read is revalidated, including keys this transaction also
        // writes: a read-modify-write is only safe if the value it read is
        // still current at commit_ts, so shadowing a read with a blind
        // overwrite of the same key must not exempt it from the check. A
        // key present in both sets was locked by this same thread in Phase
        // 1, so it must be validated with the non-spinning `is_snapshot_consistent`
        // — the `stable_*` wrapper spins on the lock bit until it clears,
        // which never happens before Phase 4, deadlocking against our own
        // lock. The cell cannot change under us while we hold the lock, so
        // the plain (non-retrying) read is exact, not merely an approximation.
        for (key, entry) in &self.read_set {
            let consistent = if self.write_set.contains_key(key) {
                entry.cell.is_snapshot_consistent(self.snapshot_ts, commit_ts)
            } else {
                entry
                    .cell
                    .stable_is_snapshot_consistent(self.snapshot_ts, commit_ts)
            };
            if !consistent {
                Self::release(locked);
                self.state = State::Aborted;
                return Err(Error::Conflict);
            }
        }
        for (lo, hi) in self.absent_ranges.iter() {
            if self
                .index
                .range_has_intruder(lo, hi.map(Vec::as_slice), self.snapshot_ts, commit_ts, &self.write_set)
            {
                Self::release(locked);
                self.state = State::Aborted;
                return Err(Error::Conflict);
            }
        }

        // Phase 4: install and unlock.
        for (key, cell) in locked {
            let record = self
                .write_set
                .remove(&key)
                .expect("locked key must still be in the write set");
            cell.write_record_at(commit_ts, record);
            cell.unlock();
        }

        self.state = State::Committed;
        Ok(commit_ts)
    }

    /// Discards the transaction's buffered state. Idempotent and infallible;
    /// safe to call from any point, including after a failed `commit`.
    pub fn abort(mut self) {
        self.state = State::Aborted;
    }

    fn release(locked: Vec<(Key, Arc<VersionedCell>)>) {
        for (_, cell) in locked {
            cell.unlock();
        }
    }
}
