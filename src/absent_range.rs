// SPDX-FileCopyrightText: 2023 Changgyoo Park <wvwwvwwv@me.com>
//
// SPDX-License-Identifier: Apache-2.0

//! The absent range set: the negative predicates a transaction accumulates
//! from range scans, used at commit time to detect phantoms.

use crate::index::Key;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};

/// The upper bound of an absent range, ordered so that "no upper bound"
/// (`+∞`) sorts after every finite bound.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum UpperBound {
    Finite(Key),
    Infinite,
}

impl UpperBound {
    fn from_option(hi: Option<Key>) -> Self {
        hi.map_or(UpperBound::Infinite, UpperBound::Finite)
    }

    fn as_option(&self) -> Option<&Key> {
        match self {
            UpperBound::Finite(k) => Some(k),
            UpperBound::Infinite => None,
        }
    }
}

/// An ordered, coalesced set of non-overlapping, non-touching, non-empty
/// half-open key ranges `[lo, hi)`, `hi = None` meaning `+∞`.
///
/// Stored as a `BTreeMap` keyed by upper bound, so that "find the first
/// range whose upper bound strictly exceeds a probe key" is a single
/// `range` query.
#[derive(Debug, Default, Clone)]
pub struct AbsentRangeSet {
    ranges: BTreeMap<UpperBound, Key>,
}

impl AbsentRangeSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` iff some stored range contains `key`.
    ///
    /// A range with no upper bound matches any `key >= lo`; this falls out
    /// naturally of the ordering (`UpperBound::Infinite` always sorts last),
    /// with no special-casing required.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.ranges
            .range((Excluded(UpperBound::Finite(key.to_vec())), Unbounded))
            .next()
            .is_some_and(|(_, lo)| lo.as_slice() <= key)
    }

    /// Merges `[lo, hi)` into the set, coalescing any overlapping or
    /// touching ranges and discarding the insert if the range is empty
    /// (`hi.is_some() && hi <= lo`).
    pub fn add_range(&mut self, mut lo: Key, mut hi: Option<Key>) {
        if let Some(h) = &hi {
            if h <= &lo {
                return;
            }
        }

        let mut to_remove = Vec::new();
        for (upper, lower) in &self.ranges {
            let upper_opt = upper.as_option();
            // [lower, upper) overlaps or touches [lo, hi) iff neither
            // starts strictly after the other ends.
            let left_ok = match &hi {
                Some(h) => lower <= h,
                None => true,
            };
            let right_ok = match upper_opt {
                Some(u) => &lo <= u,
                None => true,
            };
            if left_ok && right_ok {
                to_remove.push(upper.clone());
                if lower < &lo {
                    lo = lower.clone();
                }
                hi = match (hi.take(), upper_opt) {
                    (None, _) | (_, None) => None,
                    (Some(a), Some(b)) => Some(if b > &a { b.clone() } else { a }),
                };
            }
        }
        for upper in to_remove {
            self.ranges.remove(&upper);
        }
        self.ranges.insert(UpperBound::from_option(hi), lo);
    }

    /// Iterates the ranges in canonical (sorted, disjoint) form as
    /// `(lo, hi)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&Key, Option<&Key>)> {
        self.ranges.iter().map(|(u, l)| (l, u.as_option()))
    }

    /// Returns `true` iff the set contains no ranges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(ranges: &[(Key, Option<Key>)]) -> AbsentRangeSet {
        let mut set = AbsentRangeSet::new();
        for (lo, hi) in ranges {
            set.add_range(lo.clone(), hi.clone());
        }
        set
    }

    #[test]
    fn empty_range_is_discarded() {
        let mut set = AbsentRangeSet::new();
        set.add_range(b"b".to_vec(), Some(b"a".to_vec()));
        set.add_range(b"a".to_vec(), Some(b"a".to_vec()));
        assert!(set.is_empty());
    }

    #[test]
    fn disjoint_ranges_stay_separate() {
        let set = set_of(&[
            (b"a".to_vec(), Some(b"b".to_vec())),
            (b"c".to_vec(), Some(b"d".to_vec())),
        ]);
        let ranges: Vec<_> = set
            .iter()
            .map(|(l, h)| (l.clone(), h.cloned()))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (b"a".to_vec(), Some(b"b".to_vec())),
                (b"c".to_vec(), Some(b"d".to_vec())),
            ]
        );
    }

    #[test]
    fn overlapping_ranges_coalesce() {
        let set = set_of(&[
            (b"a".to_vec(), Some(b"c".to_vec())),
            (b"b".to_vec(), Some(b"d".to_vec())),
        ]);
        let ranges: Vec<_> = set.iter().map(|(l, h)| (l.clone(), h.cloned())).collect();
        assert_eq!(ranges, vec![(b"a".to_vec(), Some(b"d".to_vec()))]);
    }

    #[test]
    fn touching_ranges_coalesce() {
        let set = set_of(&[
            (b"a".to_vec(), Some(b"b".to_vec())),
            (b"b".to_vec(), Some(b"c".to_vec())),
        ]);
        let ranges: Vec<_> = set.iter().map(|(l, h)| (l.clone(), h.cloned())).collect();
        assert_eq!(ranges, vec![(b"a".to_vec(), Some(b"c".to_vec()))]);
    }

    #[test]
    fn unbounded_range_absorbs_everything_after() {
        let set = set_of(&[
            (b"a".to_vec(), Some(b"b".to_vec())),
            (b"b".to_vec(), None),
        ]);
        let ranges: Vec<_> = set.iter().map(|(l, h)| (l.clone(), h.cloned())).collect();
        assert_eq!(ranges, vec![(b"a".to_vec(), None)]);
    }

    #[test]
    fn containment_respects_half_open_bound() {
        let set = set_of(&[(b"a".to_vec(), Some(b"m".to_vec()))]);
        assert!(set.contains(b"a"));
        assert!(set.contains(b"f"));
        assert!(!set.contains(b"m"));
    }

    #[test]
    fn containment_with_unbounded_range() {
        let set = set_of(&[(b"m".to_vec(), None)]);
        assert!(!set.contains(b"a"));
        assert!(set.contains(b"m"));
        assert!(set.contains(b"zzzz"));
    }
}
