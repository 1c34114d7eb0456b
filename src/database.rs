// SPDX-FileCopyrightText: 2023 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The top-level handle tying an [`Index`] to a [`Clock`] and minting
//! transactions against both.

use crate::clock::{AtomicClock, Clock, Timestamp};
use crate::index::Index;
use crate::txn::Transaction;

/// An in-memory, snapshot-isolated store of byte-string keys to opaque
/// record payloads.
///
/// `C` is the [`Clock`] implementation backing transaction ordering;
/// [`AtomicClock`] is the only production implementation and the default.
pub struct Database<C: Clock = AtomicClock> {
    index: Index,
    clock: C,
}

impl Default for Database<AtomicClock> {
    fn default() -> Self {
        Database::new()
    }
}

impl Database<AtomicClock> {
    /// Creates an empty database with the default process-wide atomic
    /// clock.
    #[must_use]
    pub fn new() -> Self {
        Database {
            index: Index::new(),
            clock: AtomicClock::default(),
        }
    }
}

impl<C: Clock> Database<C> {
    /// Creates an empty database using a caller-supplied clock.
    ///
    /// Intended for tests that need deterministic timestamp sequencing;
    /// production callers should use [`Database::new`].
    pub fn with_clock(clock: C) -> Self {
        Database {
            index: Index::new(),
            clock,
        }
    }

    /// Begins a new transaction, fixing its snapshot timestamp to the
    /// clock's current value.
    pub fn begin(&self) -> Transaction<'_, C> {
        Transaction::new(&self.index, &self.clock)
    }

    /// Returns the clock's current value, for diagnostics only — it is not
    /// itself a valid snapshot or commit timestamp for any transaction.
    #[must_use]
    pub fn current_tid(&self) -> Timestamp {
        self.clock.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn begin_get_put_commit_round_trip() {
        let db = Database::new();
        let mut t = db.begin();
        t.put(b"a", Arc::new(b"1".to_vec()));
        assert!(t.commit().is_ok());

        let mut reader = db.begin();
        assert_eq!(reader.get(b"a"), Some(Arc::new(b"1".to_vec())));
    }

    #[test]
    fn current_tid_tracks_commits() {
        let db = Database::new();
        assert_eq!(db.current_tid().get(), 0);

        let mut t = db.begin();
        t.put(b"a", Arc::new(b"1".to_vec()));
        let commit_ts = t.commit().unwrap();
        assert_eq!(db.current_tid(), commit_ts);
    }
}
