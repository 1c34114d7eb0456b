// SPDX-FileCopyrightText: 2021 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

#![deny(
    missing_docs,
    warnings,
    clippy::all,
    clippy::pedantic,
    clippy::undocumented_unsafe_blocks
)]

//! An in-memory, multi-version, optimistic concurrency control transaction
//! layer over an ordered byte-string key/value index.
//!
//! A [`Database`] owns the index and the global clock; [`Database::begin`]
//! starts a snapshot-isolated [`Transaction`] that buffers its reads and
//! writes locally and validates them against the live index in a four-phase
//! commit protocol.

mod absent_range;
mod cell;
mod clock;
mod database;
mod error;
mod index;
mod txn;
pub mod utils;

pub use cell::{Record, RecordRef, CAPACITY};
pub use clock::{AtomicClock, Clock, Timestamp, MIN_TID};
pub use database::Database;
pub use error::Error;
pub use txn::Transaction;

#[cfg(test)]
mod tests;
