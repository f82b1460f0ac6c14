// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Unnormalized probability mass functions over population counts.

use crate::arithmetic::Decimal;
use crate::range::Range;
use num::traits::{One, Zero};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Key of a [`ProbabilityMassFunction`]: a set of contiguous population
/// counts that share one probability mass.
pub trait PmfKey: Copy + Ord + Debug {
    /// Number of population values this key stands for. Its mass counts once
    /// per value.
    fn weight(&self) -> u64;

    /// Smallest population value covered by this key.
    fn lower_bound(&self) -> u64;

    /// Largest population value covered by this key.
    fn upper_bound(&self) -> u64;
}

impl PmfKey for u64 {
    fn weight(&self) -> u64 {
        1
    }

    fn lower_bound(&self) -> u64 {
        *self
    }

    fn upper_bound(&self) -> u64 {
        *self
    }
}

impl PmfKey for Range {
    fn weight(&self) -> u64 {
        self.length()
    }

    fn lower_bound(&self) -> u64 {
        Range::lower_bound(self)
    }

    fn upper_bound(&self) -> u64 {
        Range::upper_bound(self)
    }
}

/// Mapping from keys to unnormalized, non-negative probability masses.
///
/// Keys must not overlap. The weighted sum of all masses is maintained
/// incrementally as entries are inserted.
#[derive(Clone, Debug)]
pub struct ProbabilityMassFunction<K> {
    masses: BTreeMap<K, Decimal>,
    probability_mass_sum: Decimal,
}

impl<K: PmfKey> Default for ProbabilityMassFunction<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: PmfKey> PartialEq for ProbabilityMassFunction<K> {
    fn eq(&self, other: &Self) -> bool {
        self.masses == other.masses
    }
}

impl<K: PmfKey> FromIterator<(K, Decimal)> for ProbabilityMassFunction<K> {
    fn from_iter<I: IntoIterator<Item = (K, Decimal)>>(iter: I) -> Self {
        let mut pmf = Self::new();
        for (key, mass) in iter {
            pmf.insert(key, mass);
        }
        pmf
    }
}

impl<K: PmfKey> ProbabilityMassFunction<K> {
    /// Creates an empty function.
    pub fn new() -> Self {
        ProbabilityMassFunction {
            masses: BTreeMap::new(),
            probability_mass_sum: Decimal::zero(),
        }
    }

    /// Evaluates the given mass function on each key, in parallel if requested.
    /// Masses are inserted in key order, so that the result doesn't depend on
    /// the parallelism.
    pub fn evaluate<F>(keys: &[K], parallel: bool, mass: F) -> Self
    where
        K: Send + Sync,
        F: Fn(&K) -> Decimal + Send + Sync,
    {
        let masses: Vec<Decimal> = if parallel {
            keys.par_iter().map(&mass).collect()
        } else {
            keys.iter().map(&mass).collect()
        };
        keys.iter().copied().zip(masses).collect()
    }

    /// Inserts a new entry.
    ///
    /// Panics if the mass is negative or if the key is already present.
    pub fn insert(&mut self, key: K, mass: Decimal) {
        assert!(!mass.is_negative(), "Negative mass {mass} for {key:?}");
        self.probability_mass_sum += &mass * key.weight();
        let previous = self.masses.insert(key, mass);
        assert!(previous.is_none(), "Duplicate key {key:?}");
    }

    /// Unnormalized mass of the given key, if present.
    pub fn probability_mass(&self, key: &K) -> Option<&Decimal> {
        self.masses.get(key)
    }

    /// Sum of all masses, each weighted by the number of values its key
    /// stands for.
    pub fn probability_mass_sum(&self) -> &Decimal {
        &self.probability_mass_sum
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.masses.len()
    }

    /// Whether there is no key.
    pub fn is_empty(&self) -> bool {
        self.masses.is_empty()
    }

    /// Iterates over the keys in ascending order.
    pub fn keys(&self) -> impl DoubleEndedIterator<Item = &K> + '_ {
        self.masses.keys()
    }

    /// Iterates over the entries in ascending key order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&K, &Decimal)> + '_ {
        self.masses.iter()
    }

    /// Key at which the cumulative weighted mass reaches half of the total.
    /// Returns [`None`] if there is no mass at all.
    pub fn median(&self) -> Option<K> {
        if self.probability_mass_sum.is_zero() {
            return None;
        }
        let half = &self.probability_mass_sum / 2u64;
        let mut cumulative = Decimal::zero();
        for (key, mass) in &self.masses {
            cumulative += mass * key.weight();
            if cumulative >= half {
                return Some(*key);
            }
        }
        self.masses.keys().next_back().copied()
    }

    /// Fraction of the total mass strictly above the given threshold. A key
    /// straddling the threshold contributes linearly, in proportion to the
    /// number of its values above the threshold.
    pub fn probability_mass_fraction_above(&self, threshold: i64) -> Decimal {
        if self.probability_mass_sum.is_zero() {
            return Decimal::zero();
        }
        // Both sides are accumulated in the same pass, so that the fraction is
        // exactly one below the domain and exactly zero above it.
        let mut above = Decimal::zero();
        let mut below = Decimal::zero();
        for (key, mass) in self.masses.iter().rev() {
            let lower = key.lower_bound() as i64;
            let upper = key.upper_bound() as i64;
            if lower > threshold {
                above += mass * key.weight();
            } else if upper > threshold {
                above += mass * (upper - threshold) as u64;
                below += mass * (threshold - lower + 1) as u64;
            } else {
                below += mass * key.weight();
            }
        }
        let total = &above + &below;
        above / total
    }

    /// Interval containing the given fraction of the total mass, leaving
    /// equal masses outside of it on each side.
    ///
    /// Panics unless `0 < coverage <= 1`.
    pub fn confidence_interval(&self, coverage: &Decimal) -> Option<Range> {
        assert!(
            !coverage.is_negative() && !coverage.is_zero() && *coverage <= Decimal::one(),
            "Invalid coverage {coverage}"
        );
        if self.probability_mass_sum.is_zero() {
            return None;
        }
        let tail = (Decimal::one() - coverage.clone()) * &self.probability_mass_sum / 2u64;
        let lower = Self::tail_key(self.masses.iter(), &tail)?;
        let upper = Self::tail_key(self.masses.iter().rev(), &tail)?;
        Some(Range::new(lower.lower_bound(), upper.upper_bound()))
    }

    /// First key at which the cumulative weighted mass exceeds the tail.
    fn tail_key<'a>(
        entries: impl Iterator<Item = (&'a K, &'a Decimal)>,
        tail: &Decimal,
    ) -> Option<K>
    where
        K: 'a,
    {
        let mut cumulative = Decimal::zero();
        for (key, mass) in entries {
            cumulative += mass * key.weight();
            if cumulative > *tail {
                return Some(*key);
            }
        }
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_pmf(masses: &[(u64, u64, u64)]) -> ProbabilityMassFunction<Range> {
        masses
            .iter()
            .map(|&(a, b, mass)| (Range::new(a, b), Decimal::from(mass)))
            .collect()
    }

    #[test]
    fn test_weighted_sum() {
        let pmf = make_pmf(&[(0, 1, 1), (2, 4, 2), (5, 5, 3)]);
        assert_eq!(pmf.probability_mass_sum(), &Decimal::from(11u64));
        assert_eq!(pmf.len(), 3);

        let points: ProbabilityMassFunction<u64> = [(0, 1u64), (1, 2), (2, 3)]
            .into_iter()
            .map(|(k, m)| (k, Decimal::from(m)))
            .collect();
        assert_eq!(points.probability_mass_sum(), &Decimal::from(6u64));
    }

    #[test]
    fn test_incremental_sum_matches_recomputation() {
        let pmf = make_pmf(&[(0, 3, 7), (4, 4, 0), (5, 10, 13), (11, 12, 5)]);
        let recomputed: Decimal = pmf.iter().map(|(k, m)| m * k.weight()).sum();
        assert_eq!(pmf.probability_mass_sum(), &recomputed);
    }

    #[test]
    fn test_equality() {
        let a = make_pmf(&[(0, 1, 1), (2, 3, 2)]);
        let b = make_pmf(&[(0, 1, 1), (2, 3, 2)]);
        let c = make_pmf(&[(0, 1, 1), (2, 3, 3)]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    #[should_panic(expected = "Duplicate key")]
    fn test_duplicate_key() {
        make_pmf(&[(0, 1, 1), (0, 1, 2)]);
    }

    #[test]
    fn test_median() {
        let pmf = make_pmf(&[(0, 1, 1), (2, 3, 1), (4, 5, 4), (6, 7, 1)]);
        assert_eq!(pmf.median(), Some(Range::new(4, 5)));

        let pmf = make_pmf(&[(0, 4, 1), (5, 9, 1)]);
        assert_eq!(pmf.median(), Some(Range::new(0, 4)));

        let empty = ProbabilityMassFunction::<Range>::new();
        assert_eq!(empty.median(), None);
        let zero = make_pmf(&[(0, 4, 0)]);
        assert_eq!(zero.median(), None);
    }

    #[test]
    fn test_fraction_above() {
        let pmf = make_pmf(&[(0, 4, 1), (5, 9, 1)]);
        assert_eq!(pmf.probability_mass_fraction_above(-1), Decimal::one());
        assert_eq!(pmf.probability_mass_fraction_above(9), Decimal::zero());
        assert_eq!(
            pmf.probability_mass_fraction_above(4),
            Decimal::ratio(1, 2)
        );
        // Range [5, 9] straddles 6: 3 of its values are above.
        assert_eq!(
            pmf.probability_mass_fraction_above(6),
            Decimal::ratio(3, 10)
        );
        assert_eq!(
            pmf.probability_mass_fraction_above(100),
            Decimal::zero()
        );
    }

    #[test]
    fn test_fraction_above_is_monotonic() {
        let pmf = make_pmf(&[(0, 2, 5), (3, 3, 9), (4, 8, 2), (9, 20, 1)]);
        let mut previous = Decimal::one();
        for threshold in -1..=20 {
            let fraction = pmf.probability_mass_fraction_above(threshold);
            assert!(fraction <= previous, "not monotonic at {threshold}");
            previous = fraction;
        }
        assert_eq!(previous, Decimal::zero());
    }

    #[test]
    fn test_confidence_interval() {
        let pmf = make_pmf(&[(0, 0, 1), (1, 1, 8), (2, 2, 80), (3, 3, 10), (4, 4, 1)]);
        assert_eq!(
            pmf.confidence_interval(&Decimal::ratio(98, 100)),
            Some(Range::new(1, 3))
        );
        assert_eq!(
            pmf.confidence_interval(&Decimal::ratio(80, 100)),
            Some(Range::new(2, 3))
        );
        assert_eq!(
            pmf.confidence_interval(&Decimal::ratio(50, 100)),
            Some(Range::new(2, 2))
        );
        assert_eq!(
            pmf.confidence_interval(&Decimal::one()),
            Some(Range::new(0, 4))
        );
        assert_eq!(
            pmf.confidence_interval(&Decimal::ratio(999, 1000)),
            Some(Range::new(0, 4))
        );
    }

    #[test]
    #[should_panic(expected = "Invalid coverage")]
    fn test_confidence_interval_invalid_coverage() {
        make_pmf(&[(0, 1, 1)]).confidence_interval(&Decimal::zero());
    }

    #[test]
    fn test_evaluate_parallel_matches_serial() {
        let keys = Range::tile(1_000, 37);
        let mass = |r: &Range| Decimal::from(r.midpoint() * r.midpoint() + 1);
        let serial = ProbabilityMassFunction::evaluate(&keys, false, mass);
        let parallel = ProbabilityMassFunction::evaluate(&keys, true, mass);
        assert_eq!(serial, parallel);
        assert_eq!(
            serial.probability_mass_sum().mantissa(),
            parallel.probability_mass_sum().mantissa()
        );
    }
}
