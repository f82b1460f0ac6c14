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

//! Exact hypergeometric distribution of a population count, given one sample
//! observation.

use crate::arithmetic::Decimal;
use crate::cache::UpgradableCache;
use crate::combinatorics::binomial_coefficient;
use crate::pmf::ProbabilityMassFunction;
use crate::range::Range;
use log::debug;
use num::traits::Zero;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

/// Observation from which a population distribution is inferred: `value`
/// members sharing a characteristic were found in a sample of `sample_size`
/// drawn without replacement from `population_size` members.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DistributionKey {
    value: u64,
    sample_size: u64,
    population_size: u64,
}

impl DistributionKey {
    /// Creates a new key.
    ///
    /// Panics unless `value <= sample_size <= population_size`.
    pub fn new(value: u64, sample_size: u64, population_size: u64) -> Self {
        assert!(
            value <= sample_size && sample_size <= population_size,
            "Invalid observation of {value} in a sample of {sample_size} among {population_size}"
        );
        DistributionKey {
            value,
            sample_size,
            population_size,
        }
    }

    /// Number of members sharing the characteristic in the sample.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Size of the sample.
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    /// Size of the population.
    pub fn population_size(&self) -> u64 {
        self.population_size
    }

    /// Unnormalized likelihood of the observation, if exactly `count`
    /// members of the population share the characteristic, i.e.
    /// `C(count, value) * C(population_size - count, sample_size - value)`.
    ///
    /// This is zero when the observation is impossible for this count.
    pub fn mass_at(&self, count: u64) -> Decimal {
        assert!(
            count <= self.population_size,
            "Count {count} is outside of the population {}",
            self.population_size
        );
        let others = self.population_size - count;
        let missed = self.sample_size - self.value;
        if count < self.value || others < missed {
            return Decimal::zero();
        }
        binomial_coefficient(count, self.value) * binomial_coefficient(others, missed)
    }

    /// Interval of counts for which the observation is possible.
    pub fn support(&self) -> Range {
        Range::new(
            self.value,
            self.population_size - (self.sample_size - self.value),
        )
    }
}

impl Display for DistributionKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}/{} among {}",
            self.value, self.sample_size, self.population_size
        )
    }
}

/// Probability mass function of the population count, evaluated at every
/// count in `[0, population_size]`.
#[derive(Debug, PartialEq)]
pub struct HypergeometricDistribution {
    key: DistributionKey,
    pmf: ProbabilityMassFunction<u64>,
}

impl HypergeometricDistribution {
    /// Computes the distribution for the given observation.
    pub fn new(key: DistributionKey, parallel: bool) -> Self {
        let counts: Vec<u64> = (0..=key.population_size).collect();
        let pmf = ProbabilityMassFunction::evaluate(&counts, parallel, |&count| key.mass_at(count));
        HypergeometricDistribution { key, pmf }
    }

    /// Observation that this distribution was computed from.
    pub fn key(&self) -> &DistributionKey {
        &self.key
    }

    /// Underlying unnormalized probability mass function.
    pub fn probability_mass_function(&self) -> &ProbabilityMassFunction<u64> {
        &self.pmf
    }

    /// Unnormalized mass of the given population count.
    pub fn probability_mass(&self, count: u64) -> Decimal {
        self.pmf
            .probability_mass(&count)
            .cloned()
            .unwrap_or_else(Decimal::zero)
    }

    /// Sum of all masses.
    pub fn probability_mass_sum(&self) -> &Decimal {
        self.pmf.probability_mass_sum()
    }

    /// Median population count.
    pub fn median(&self) -> Option<u64> {
        self.pmf.median()
    }

    /// Probability that the population count is strictly above the
    /// threshold.
    pub fn probability_mass_fraction_above(&self, threshold: i64) -> Decimal {
        self.pmf.probability_mass_fraction_above(threshold)
    }

    /// Interval of population counts with the given probability.
    pub fn confidence_interval(&self, coverage: &Decimal) -> Option<Range> {
        self.pmf.confidence_interval(coverage)
    }
}

/// Memoization of exact distributions, returning one shared instance per
/// observation.
#[derive(Default)]
pub struct HypergeometricCache {
    cache: UpgradableCache<DistributionKey, HypergeometricDistribution>,
}

impl HypergeometricCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the distribution for the given observation, computing it on
    /// first use.
    pub fn get(&self, key: DistributionKey, parallel: bool) -> Arc<HypergeometricDistribution> {
        let fetched = self.cache.get_or_build(
            &key,
            |_| true,
            || {
                let start = Instant::now();
                let distribution = HypergeometricDistribution::new(key, parallel);
                debug!(
                    "Computed exact distribution for {key} in {:?}",
                    start.elapsed()
                );
                distribution
            },
        );
        fetched.value
    }

    /// Number of cached distributions.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no distribution is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Removes all cached distributions.
    pub fn clear(&self) {
        self.cache.clear()
    }
}
