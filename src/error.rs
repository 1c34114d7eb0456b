// SPDX-FileCopyrightText: 2021 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

/// [`Error`] defines all the error codes a transaction can return.
///
/// A commit either succeeds, producing a [`Timestamp`](crate::clock::Timestamp),
/// or fails with [`Error::Conflict`]. There is nothing else: no timeouts, no
/// retries, no allocator failure in the caller-visible surface — every other
/// failure mode is an invariant violation caught by `debug_assert!` in the
/// relevant module, not a recoverable condition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Error {
    /// The transaction's read set or absent range set was no longer
    /// consistent with the commit timestamp assigned to it.
    Conflict,
}
