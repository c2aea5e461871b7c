//! Canonical interval sets over bounded integer domains.
//!
//! Ports (`u16`), IPv4 addresses (`u32`) and IPv6 addresses (`u128`) all use
//! the same representation: a sorted list of inclusive ranges in which no two
//! ranges overlap or touch. Every constructor and operation returns a set in
//! that form, so equal coverage always means equal values.

use std::fmt::Debug;

/// A bounded, totally ordered integer domain.
pub trait Domain: Copy + Ord + Debug + Send + Sync {
    const MIN: Self;
    const MAX: Self;

    /// The next value, or `None` at `MAX`.
    fn succ(self) -> Option<Self>;

    /// The previous value, or `None` at `MIN`.
    fn pred(self) -> Option<Self>;
}

macro_rules! impl_domain {
    ($($t:ty),*) => {
        $(
            impl Domain for $t {
                const MIN: Self = <$t>::MIN;
                const MAX: Self = <$t>::MAX;

                fn succ(self) -> Option<Self> {
                    self.checked_add(1)
                }

                fn pred(self) -> Option<Self> {
                    self.checked_sub(1)
                }
            }
        )*
    };
}

impl_domain!(u16, u32, u128);

/// A disjoint, sorted, minimal set of inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntervalSet<T: Domain> {
    ranges: Vec<(T, T)>,
}

impl<T: Domain> Default for IntervalSet<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Domain> IntervalSet<T> {
    pub fn empty() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn full() -> Self {
        Self {
            ranges: vec![(T::MIN, T::MAX)],
        }
    }

    pub fn single(value: T) -> Self {
        Self {
            ranges: vec![(value, value)],
        }
    }

    /// Build a canonical set from arbitrary ranges.
    ///
    /// Ranges with `lo > hi` are ignored. The rest are sorted by start and
    /// swept once, merging any range that overlaps or is adjacent to the
    /// range being accumulated.
    pub fn from_ranges(ranges: impl IntoIterator<Item = (T, T)>) -> Self {
        let mut input: Vec<(T, T)> = ranges.into_iter().filter(|(lo, hi)| lo <= hi).collect();
        input.sort_unstable();

        let mut merged: Vec<(T, T)> = Vec::with_capacity(input.len());
        for (lo, hi) in input {
            match merged.last_mut() {
                Some(last) if touches(last.1, lo) => {
                    if hi > last.1 {
                        last.1 = hi;
                    }
                }
                _ => merged.push((lo, hi)),
            }
        }

        Self { ranges: merged }
    }

    pub fn ranges(&self) -> &[(T, T)] {
        &self.ranges
    }

    /// Number of ranges in the canonical form.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ranges == [(T::MIN, T::MAX)]
    }

    pub fn contains(&self, value: T) -> bool {
        self.contains_range(value, value)
    }

    /// Whether every value in `[lo, hi]` is in the set.
    pub fn contains_range(&self, lo: T, hi: T) -> bool {
        // First range whose end is >= lo; canonical form means it is the only candidate.
        let idx = self.ranges.partition_point(|&(_, end)| end < lo);
        self.ranges
            .get(idx)
            .is_some_and(|&(start, end)| start <= lo && hi <= end)
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.ranges
            .iter()
            .all(|&(lo, hi)| other.contains_range(lo, hi))
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::from_ranges(self.ranges.iter().chain(other.ranges.iter()).copied())
    }

    pub fn intersect(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.ranges.len() && j < other.ranges.len() {
            let (a_lo, a_hi) = self.ranges[i];
            let (b_lo, b_hi) = other.ranges[j];
            let lo = a_lo.max(b_lo);
            let hi = a_hi.min(b_hi);
            if lo <= hi {
                out.push((lo, hi));
            }
            if a_hi < b_hi {
                i += 1;
            } else {
                j += 1;
            }
        }
        // Pieces of two canonical sets never touch each other.
        Self { ranges: out }
    }

    /// Set difference `self \ other`.
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Vec::new();
        let mut j = 0;

        for &(lo, hi) in &self.ranges {
            let mut cursor = Some(lo);
            while j < other.ranges.len() && other.ranges[j].1 < lo {
                j += 1;
            }

            let mut k = j;
            while let Some(start) = cursor {
                let Some(&(cut_lo, cut_hi)) = other.ranges.get(k) else {
                    out.push((start, hi));
                    break;
                };
                if cut_lo > hi {
                    out.push((start, hi));
                    break;
                }
                if cut_lo > start {
                    // cut_lo > start >= MIN, so pred exists.
                    if let Some(end) = cut_lo.pred() {
                        out.push((start, end));
                    }
                }
                cursor = if cut_hi >= hi { None } else { cut_hi.succ() };
                k += 1;
            }
        }

        Self { ranges: out }
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.ranges.iter().copied()
    }
}

/// Whether a range starting at `lo` overlaps or abuts a range ending at `end`.
fn touches<T: Domain>(end: T, lo: T) -> bool {
    match end.succ() {
        Some(next) => lo <= next,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(ranges: &[(u16, u16)]) -> IntervalSet<u16> {
        IntervalSet::from_ranges(ranges.iter().copied())
    }

    #[test]
    fn test_merge_overlapping_and_adjacent() {
        let s = set(&[(10, 20), (15, 30), (31, 40), (50, 60), (45, 49)]);
        assert_eq!(s.ranges(), &[(10, 40), (45, 60)]);
    }

    #[test]
    fn test_merge_keeps_gaps() {
        let s = set(&[(1, 2), (4, 5)]);
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_merge_at_domain_max() {
        let s = set(&[(65_000, u16::MAX), (65_535, 65_535), (100, 200)]);
        assert_eq!(s.ranges(), &[(100, 200), (65_000, u16::MAX)]);
        assert!(IntervalSet::<u16>::from_ranges([(0, 10), (11, u16::MAX)]).is_full());
    }

    #[test]
    fn test_invalid_ranges_ignored() {
        let s = set(&[(20, 10), (1, 1)]);
        assert_eq!(s.ranges(), &[(1, 1)]);
    }

    #[test]
    fn test_contains() {
        let s = set(&[(10, 20), (30, 40)]);
        assert!(s.contains(10));
        assert!(s.contains(40));
        assert!(!s.contains(25));
        assert!(s.contains_range(12, 18));
        assert!(!s.contains_range(15, 35));
    }

    #[test]
    fn test_subtract_splits_range() {
        let s = set(&[(0, 100)]).subtract(&set(&[(10, 20), (50, 50)]));
        assert_eq!(s.ranges(), &[(0, 9), (21, 49), (51, 100)]);
    }

    #[test]
    fn test_subtract_edges() {
        let full = IntervalSet::<u16>::full();
        assert!(full.subtract(&full).is_empty());
        let s = full.subtract(&set(&[(0, 0), (u16::MAX, u16::MAX)]));
        assert_eq!(s.ranges(), &[(1, u16::MAX - 1)]);
        let s = set(&[(5, 10)]).subtract(&set(&[(0, 4), (11, 20)]));
        assert_eq!(s.ranges(), &[(5, 10)]);
    }

    #[test]
    fn test_intersect() {
        let a = set(&[(0, 10), (20, 30)]);
        let b = set(&[(5, 25)]);
        assert_eq!(a.intersect(&b).ranges(), &[(5, 10), (20, 25)]);
        assert!(a.intersect(&IntervalSet::empty()).is_empty());
    }

    #[test]
    fn test_subset() {
        let a = set(&[(5, 6)]);
        let b = set(&[(0, 10)]);
        assert!(a.is_subset(&b));
        assert!(!b.is_subset(&a));
        assert!(IntervalSet::<u16>::empty().is_subset(&a));
    }

    #[test]
    fn test_u128_domain() {
        let s = IntervalSet::<u128>::from_ranges([(0, 9), (10, u128::MAX)]);
        assert!(s.is_full());
    }

    fn small_ranges() -> impl Strategy<Value = Vec<(u16, u16)>> {
        prop::collection::vec((0u16..500, 0u16..40), 0..20)
            .prop_map(|v| v.into_iter().map(|(lo, w)| (lo, lo + w)).collect())
    }

    proptest! {
        #[test]
        fn merged_ranges_never_touch(input in small_ranges()) {
            let s = set(&input);
            for pair in s.ranges().windows(2) {
                prop_assert!(pair[0].1 + 1 < pair[1].0, "ranges touch: {:?}", pair);
            }
        }

        #[test]
        fn merge_preserves_coverage(input in small_ranges()) {
            let s = set(&input);
            for v in 0u16..560 {
                let expected = input.iter().any(|&(lo, hi)| lo <= v && v <= hi);
                prop_assert_eq!(s.contains(v), expected, "value {}", v);
            }
        }

        #[test]
        fn subtract_matches_pointwise(a in small_ranges(), b in small_ranges()) {
            let (sa, sb) = (set(&a), set(&b));
            let diff = sa.subtract(&sb);
            let inter = sa.intersect(&sb);
            for v in 0u16..560 {
                prop_assert_eq!(diff.contains(v), sa.contains(v) && !sb.contains(v));
                prop_assert_eq!(inter.contains(v), sa.contains(v) && sb.contains(v));
            }
            prop_assert_eq!(diff.clone(), IntervalSet::from_ranges(diff.iter()));
        }
    }
}
