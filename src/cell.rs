// SPDX-FileCopyrightText: 2023 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The versioned cell: a cache-aligned, lock-protected container of a key's
//! recent history.

use crate::clock::{Timestamp, MIN_TID};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering::Acquire, Ordering::Relaxed, Ordering::Release};
use std::sync::Arc;

/// The maximum number of historical versions a [`VersionedCell`] retains.
pub const CAPACITY: usize = 15;

/// An opaque, immutable record payload. `None` denotes a logically deleted
/// record.
pub type Record = Arc<Vec<u8>>;

/// A record reference as stored in a cell or a transaction's write set.
pub type RecordRef = Option<Record>;

const LOCK_BIT: u64 = 1;
const SIZE_SHIFT: u32 = 1;
const SIZE_BITS: u64 = 0xF;
const SIZE_MASK: u64 = SIZE_BITS << SIZE_SHIFT;
const VERSION_SHIFT: u32 = 5;

const fn unpack_size(word: u64) -> usize {
    ((word & SIZE_MASK) >> SIZE_SHIFT) as usize
}

const fn unpack_version(word: u64) -> u64 {
    word >> VERSION_SHIFT
}

const fn pack(locked: bool, size: usize, version: u64) -> u64 {
    debug_assert!(size >= 1 && size <= CAPACITY);
    (version << VERSION_SHIFT) | ((size as u64) << SIZE_SHIFT) | (locked as u64)
}

/// Per-key container of historical `(timestamp, record)` pairs.
///
/// The layout is bit-exact: an 8-byte control word packing `{locked: 1 bit,
/// size: 4 bits, version counter: 59 bits}` at offset 0, followed by a
/// struct-of-arrays pair of 15 ascending timestamps and 15 record-reference
/// pointers, the whole thing padded to a multiple of the cache-line size.
///
/// Mutation of the version arrays requires the cell to be locked; reads never
/// block, retrying instead when a concurrent writer is observed
/// (optimistic / "stable" reads — see [`VersionedCell::stable_read`]).
#[repr(C, align(64))]
pub struct VersionedCell {
    control: AtomicU64,
    timestamps: UnsafeCell<[Timestamp; CAPACITY]>,
    records: UnsafeCell<[RecordRef; CAPACITY]>,
}

// SAFETY: all mutation of `timestamps`/`records` happens while the control
// word's lock bit is held by exactly one thread (enforced by `lock`); all
// other access goes through the stable-read protocol, which re-validates the
// control word after reading and discards torn reads.
unsafe impl Sync for VersionedCell {}

impl Default for VersionedCell {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionedCell {
    /// Creates a freshly allocated cell containing the sentinel
    /// `(MIN_TID, None)` entry.
    #[must_use]
    pub fn new() -> Self {
        let mut timestamps = [MIN_TID; CAPACITY];
        timestamps[0] = MIN_TID;
        const NONE_RECORD: RecordRef = None;
        let records = [NONE_RECORD; CAPACITY];
        VersionedCell {
            control: AtomicU64::new(pack(false, 1, 0)),
            timestamps: UnsafeCell::new(timestamps),
            records: UnsafeCell::new(records),
        }
    }

    /// Acquires the cell's spinlock.
    ///
    /// Spins while the lock bit is set or the compare-and-swap races with
    /// another locker; never blocks on an OS primitive.
    pub fn lock(&self) {
        loop {
            let word = self.control.load(Relaxed);
            if word & LOCK_BIT == 0 {
                let locked_word = word | LOCK_BIT;
                if self
                    .control
                    .compare_exchange_weak(word, locked_word, Acquire, Relaxed)
                    .is_ok()
                {
                    return;
                }
            }
            std::hint::spin_loop();
        }
    }

    /// Releases a lock acquired by [`VersionedCell::lock`].
    ///
    /// Increments the version counter and clears the locked bit, publishing
    /// whatever size [`VersionedCell::write_record_at`] staged while the
    /// lock was held.
    pub fn unlock(&self) {
        let word = self.control.load(Relaxed);
        debug_assert!(word & LOCK_BIT != 0, "unlock of an unlocked cell");
        let size = unpack_size(word);
        let version = unpack_version(word).wrapping_add(1);
        self.control.store(pack(false, size, version), Release);
    }

    /// Returns a stable snapshot of the control word: spins while the cell
    /// is locked, then returns the observed word.
    pub fn stable_version(&self) -> u64 {
        loop {
            let word = self.control.load(Acquire);
            if word & LOCK_BIT == 0 {
                return word;
            }
            std::hint::spin_loop();
        }
    }

    /// Returns `true` iff the current control word still equals `v`.
    pub fn check_version(&self, v: u64) -> bool {
        self.control.load(Acquire) == v
    }

    fn is_locked(&self) -> bool {
        self.control.load(Relaxed) & LOCK_BIT != 0
    }

    /// Scans the version array (newest to oldest) for the first entry whose
    /// timestamp is `<= t`, using `size` entries of the array.
    ///
    /// # Safety
    ///
    /// The caller must have obtained `size` from a control word it intends
    /// to re-validate via [`VersionedCell::check_version`] after this call
    /// returns; the read may be torn by a concurrent writer and must be
    /// discarded if validation fails.
    unsafe fn record_at_raw(&self, size: usize, t: Timestamp) -> Option<(Timestamp, RecordRef)> {
        let timestamps = &*self.timestamps.get();
        let records = &*self.records.get();
        (0..size)
            .rev()
            .find(|&i| timestamps[i] <= t)
            .map(|i| (timestamps[i], records[i].clone()))
    }

    /// Point read at timestamp `t`, without retrying on concurrent writers.
    ///
    /// Returns the newest `(start_ts, reference)` pair with `start_ts <= t`,
    /// or `None` if even the oldest retained version postdates `t` (the
    /// pre-`t` entry has been evicted).
    pub fn record_at(&self, t: Timestamp) -> Option<(Timestamp, RecordRef)> {
        let word = self.control.load(Acquire);
        let size = unpack_size(word);
        // SAFETY: `size` comes from the control word just loaded; the
        // result is unused unless the caller revalidates it.
        unsafe { self.record_at_raw(size, t) }
    }

    /// An optimistic read that retries until it observes a result not torn
    /// by a concurrent writer.
    pub fn stable_read(&self, t: Timestamp) -> Option<(Timestamp, RecordRef)> {
        loop {
            let v = self.stable_version();
            let size = unpack_size(v);
            // SAFETY: revalidated below via `check_version`.
            let result = unsafe { self.record_at_raw(size, t) };
            if self.check_version(v) {
                return result;
            }
        }
    }

    /// Returns the cell's newest `(start_ts, reference)` pair.
    fn latest_raw(&self, size: usize) -> (Timestamp, RecordRef) {
        // SAFETY: revalidated by callers via `check_version`; `size >= 1`.
        let timestamps = unsafe { &*self.timestamps.get() };
        let records = unsafe { &*self.records.get() };
        (timestamps[size - 1], records[size - 1].clone())
    }

    /// Returns the cell's newest `(start_ts, reference)` pair, without
    /// retrying on concurrent writers.
    ///
    /// Safe to call while holding the cell's own lock (e.g. between `lock`
    /// and `write_record_at`): the control word cannot change under a
    /// locker it's already held by, so the one-shot read is exact, unlike
    /// [`VersionedCell::stable_latest`], which would spin forever waiting
    /// for a lock the caller itself holds.
    pub fn latest(&self) -> (Timestamp, RecordRef) {
        let word = self.control.load(Acquire);
        self.latest_raw(unpack_size(word))
    }

    /// Optimistic read of the cell's current (newest) value.
    pub fn stable_latest(&self) -> (Timestamp, RecordRef) {
        loop {
            let v = self.stable_version();
            let size = unpack_size(v);
            let result = self.latest_raw(size);
            if self.check_version(v) {
                return result;
            }
        }
    }

    fn is_latest_version_raw(&self, size: usize, t: Timestamp) -> bool {
        // SAFETY: revalidated by callers via `check_version`.
        let timestamps = unsafe { &*self.timestamps.get() };
        timestamps[size - 1] <= t
    }

    /// Returns `true` iff the newest timestamp in the cell is `<= t`,
    /// without retrying on concurrent writers.
    pub fn is_latest_version(&self, t: Timestamp) -> bool {
        let word = self.control.load(Acquire);
        self.is_latest_version_raw(unpack_size(word), t)
    }

    /// Optimistic, retrying wrapper around [`VersionedCell::is_latest_version`].
    pub fn stable_is_latest_version(&self, t: Timestamp) -> bool {
        loop {
            let v = self.stable_version();
            let size = unpack_size(v);
            let result = self.is_latest_version_raw(size, t);
            if self.check_version(v) {
                return result;
            }
        }
    }

    fn is_snapshot_consistent_raw(
        &self,
        size: usize,
        snapshot_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> bool {
        // SAFETY: revalidated by callers via `check_version`.
        let timestamps = unsafe { &*self.timestamps.get() };
        let newest = timestamps[size - 1];
        if newest <= snapshot_ts {
            // Fast path: no intervening write since the snapshot was taken.
            return true;
        }
        // Slow path: find the version that was current as of snapshot_ts and
        // check whether whatever superseded it did so strictly after
        // commit_ts.
        for i in (0..size).rev() {
            if timestamps[i] <= snapshot_ts {
                let next = timestamps[i + 1];
                debug_assert_ne!(
                    next,
                    commit_ts,
                    "commit_ts must not collide with an existing version"
                );
                return next > commit_ts;
            }
        }
        // History was truncated past the snapshot: the pre-snapshot version
        // is gone, so we cannot prove the read was consistent.
        false
    }

    /// Checks whether a read taken at `snapshot_ts` is still consistent as
    /// of `commit_ts`, without retrying on concurrent writers.
    pub fn is_snapshot_consistent(&self, snapshot_ts: Timestamp, commit_ts: Timestamp) -> bool {
        let word = self.control.load(Acquire);
        self.is_snapshot_consistent_raw(unpack_size(word), snapshot_ts, commit_ts)
    }

    /// Optimistic, retrying wrapper around
    /// [`VersionedCell::is_snapshot_consistent`].
    pub fn stable_is_snapshot_consistent(
        &self,
        snapshot_ts: Timestamp,
        commit_ts: Timestamp,
    ) -> bool {
        loop {
            let v = self.stable_version();
            let size = unpack_size(v);
            let result = self.is_snapshot_consistent_raw(size, snapshot_ts, commit_ts);
            if self.check_version(v) {
                return result;
            }
        }
    }

    /// Installs a new version at timestamp `t`.
    ///
    /// The caller must hold the cell's lock and `t` must strictly exceed the
    /// newest stored timestamp. Evicts the oldest version if the array is
    /// full. The new size is staged into the control word immediately (still
    /// hidden from readers behind the lock bit) and published by the next
    /// call to [`VersionedCell::unlock`].
    pub fn write_record_at(&self, t: Timestamp, r: RecordRef) {
        debug_assert!(self.is_locked(), "write_record_at on an unlocked cell");
        let word = self.control.load(Relaxed);
        let size = unpack_size(word);

        // SAFETY: the lock is held by the caller, so we have exclusive
        // access to the arrays; no reader observes this mutation until
        // `unlock` publishes the new control word.
        let (timestamps, records) =
            unsafe { (&mut *self.timestamps.get(), &mut *self.records.get()) };
        debug_assert!(t > timestamps[size - 1], "timestamps must strictly increase");

        let new_size = if size < CAPACITY {
            timestamps[size] = t;
            records[size] = r;
            size + 1
        } else {
            timestamps.copy_within(1.., 0);
            records.rotate_left(1);
            timestamps[CAPACITY - 1] = t;
            records[CAPACITY - 1] = r;
            CAPACITY
        };

        let version = unpack_version(word);
        self.control.store(pack(true, new_size, version), Relaxed);
    }
}
