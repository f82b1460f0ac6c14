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

//! Approximation of the hypergeometric distribution over a bounded number of
//! ranges of population counts, and a cache of such approximations that only
//! ever gets more precise.

use crate::arithmetic::Decimal;
use crate::cache::{Fetched, UpgradableCache};
use crate::hypergeometric::DistributionKey;
use crate::pmf::ProbabilityMassFunction;
use crate::range::Range;
use log::{debug, info, log_enabled, trace, Level::Trace};
use std::cell::Cell;
use std::time::Instant;

/// Hypergeometric distribution binned into ranges that tile
/// `[0, population_size]`. The mass of each range is the exact mass at its
/// midpoint, and counts once per value of the range.
#[derive(Clone, Debug, PartialEq)]
pub struct SampledHypergeometricDistribution {
    key: DistributionKey,
    pmf: ProbabilityMassFunction<Range>,
}

/// Location and spread of a distribution, as fractions of the population.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ShareSummary {
    /// Share at the median range.
    pub median: f64,
    /// Lower end of the confidence interval.
    pub lower: f64,
    /// Upper end of the confidence interval.
    pub upper: f64,
}

impl SampledHypergeometricDistribution {
    /// Computes the distribution for the given observation, with at least
    /// `minimal_number_of_samples` ranges (or one range per population
    /// value, if there are fewer values).
    pub fn new(key: DistributionKey, minimal_number_of_samples: u64, parallel: bool) -> Self {
        let ranges = Range::tile(key.population_size(), minimal_number_of_samples);
        let pmf = ProbabilityMassFunction::evaluate(&ranges, parallel, |range| {
            key.mass_at(range.midpoint())
        });
        SampledHypergeometricDistribution { key, pmf }
    }

    /// Assembles a distribution from previously computed masses. Returns
    /// [`None`] if the ranges don't exactly tile the population.
    pub fn from_masses(key: DistributionKey, masses: Vec<(Range, Decimal)>) -> Option<Self> {
        let mut next = 0;
        for (range, _) in &masses {
            if range.lower_bound() != next {
                return None;
            }
            next = range.upper_bound() + 1;
        }
        if next != key.population_size() + 1 {
            return None;
        }
        Some(SampledHypergeometricDistribution {
            key,
            pmf: masses.into_iter().collect(),
        })
    }

    /// Observation that this distribution was computed from.
    pub fn key(&self) -> &DistributionKey {
        &self.key
    }

    /// Underlying unnormalized probability mass function.
    pub fn probability_mass_function(&self) -> &ProbabilityMassFunction<Range> {
        &self.pmf
    }

    /// Number of ranges.
    pub fn number_of_samples(&self) -> u64 {
        self.pmf.len() as u64
    }

    /// Whether this distribution has enough ranges to serve a request for
    /// `minimal_number_of_samples`. A distribution with one range per
    /// population value is always precise enough.
    pub fn is_at_least(&self, minimal_number_of_samples: u64) -> bool {
        let full_resolution = self.key.population_size() + 1;
        self.number_of_samples() >= minimal_number_of_samples.min(full_resolution)
    }

    /// Sum of all masses, each weighted by the length of its range.
    pub fn probability_mass_sum(&self) -> &Decimal {
        self.pmf.probability_mass_sum()
    }

    /// Range containing the median population count.
    pub fn median(&self) -> Option<Range> {
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

    /// Probability that more than the given fraction of the population
    /// shares the characteristic.
    pub fn probability_above_share(&self, share: f64) -> f64 {
        let threshold = (share * self.key.population_size() as f64).floor() as i64;
        self.probability_mass_fraction_above(threshold).to_f64()
    }

    /// Median and confidence interval, as fractions of the population.
    pub fn share_summary(&self, coverage: &Decimal) -> Option<ShareSummary> {
        let median = self.median()?;
        let interval = self.confidence_interval(coverage)?;
        let population_size = self.key.population_size().max(1) as f64;
        Some(ShareSummary {
            median: median.midpoint() as f64 / population_size,
            lower: interval.lower_bound() as f64 / population_size,
            upper: interval.upper_bound() as f64 / population_size,
        })
    }
}

/// Cache of sampled distributions, keyed by observation. Each entry is the
/// most precise distribution built so far for its observation.
#[derive(Default)]
pub struct SampledDistributionCache {
    cache: UpgradableCache<DistributionKey, SampledHypergeometricDistribution>,
}

impl SampledDistributionCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a distribution for the given observation with at least
    /// `minimal_number_of_samples` ranges. A cached distribution is returned
    /// as is if it is precise enough, otherwise a finer one is computed and
    /// replaces it. The caller is told about rebuilds, so that it can persist
    /// them.
    pub fn get(
        &self,
        key: DistributionKey,
        minimal_number_of_samples: u64,
        parallel: bool,
    ) -> Fetched<SampledHypergeometricDistribution> {
        let previous = Cell::new(None);
        let fetched = self.cache.get_or_build(
            &key,
            |cached| {
                previous.set(Some(cached.number_of_samples()));
                cached.is_at_least(minimal_number_of_samples)
            },
            || {
                match previous.get() {
                    Some(old) => info!(
                        "Upgrading distribution of {key} from {old} to {minimal_number_of_samples} samples"
                    ),
                    None => debug!(
                        "Computing distribution of {key} with {minimal_number_of_samples} samples"
                    ),
                }
                let start = Instant::now();
                let distribution =
                    SampledHypergeometricDistribution::new(key, minimal_number_of_samples, parallel);
                debug!(
                    "Computed distribution of {key} with {} samples in {:?}",
                    distribution.number_of_samples(),
                    start.elapsed()
                );
                distribution
            },
        );
        if !fetched.rebuilt {
            trace!(
                "Reusing distribution of {key} with {} samples",
                fetched.value.number_of_samples()
            );
        }
        if log_enabled!(Trace) && fetched.rebuilt {
            if let Some(median) = fetched.value.median() {
                trace!("Median of {key} is in {median}");
            }
        }
        fetched
    }

    /// Stores a distribution computed elsewhere (e.g. read from disk), unless
    /// the cache already holds one at least as precise. Returns whether it
    /// was stored.
    pub fn preload(&self, distribution: SampledHypergeometricDistribution) -> bool {
        let key = *distribution.key();
        self.cache.insert_if_finer(&key, distribution, |new, cached| {
            new.number_of_samples() > cached.number_of_samples()
        })
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

#[cfg(test)]
mod test {
    use super::*;
    use crate::hypergeometric::HypergeometricDistribution;
    use crate::util::log_tester::ThreadLocalLogger;
    use log::Level::{Debug, Info};
    use num::traits::{One, Zero};
    use std::sync::Arc;

    #[test]
    fn test_ranges_tile_population() {
        let key = DistributionKey::new(30, 100, 10_001);
        let distribution = SampledHypergeometricDistribution::new(key, 37, false);
        assert_eq!(distribution.number_of_samples(), 37);
        assert!(distribution.is_at_least(37));
        assert!(!distribution.is_at_least(38));

        let mut next = 0;
        for range in distribution.probability_mass_function().keys() {
            assert_eq!(range.lower_bound(), next);
            next = range.upper_bound() + 1;
        }
        assert_eq!(next, 10_002);
    }

    #[test]
    fn test_full_resolution_matches_exact() {
        let key = DistributionKey::new(3, 10, 50);
        let sampled = SampledHypergeometricDistribution::new(key, 1_000, false);
        let exact = HypergeometricDistribution::new(key, false);
        assert_eq!(sampled.number_of_samples(), 51);
        assert!(sampled.is_at_least(1_000_000));

        for (range, mass) in sampled.probability_mass_function().iter() {
            assert_eq!(range.length(), 1);
            assert_eq!(mass, &exact.probability_mass(range.lower_bound()));
        }
        assert_eq!(sampled.probability_mass_sum(), exact.probability_mass_sum());
        assert_eq!(
            sampled.median().map(|r| r.lower_bound()),
            exact.median()
        );
    }

    #[test]
    fn test_midpoint_mass_weighted_by_length() {
        let key = DistributionKey::new(2, 4, 10);
        let sampled = SampledHypergeometricDistribution::new(key, 5, false);
        // Ranges are [0, 1], [2, 3], [4, 5], [6, 7], [8, 10].
        let pmf = sampled.probability_mass_function();
        assert_eq!(pmf.probability_mass(&Range::new(0, 1)), Some(&Decimal::zero()));
        assert_eq!(
            pmf.probability_mass(&Range::new(2, 3)),
            Some(&key.mass_at(2))
        );
        assert_eq!(
            pmf.probability_mass(&Range::new(8, 10)),
            Some(&key.mass_at(9))
        );
        // 2 * (28 + 90 + 90) + 3 * 0
        assert_eq!(sampled.probability_mass_sum(), &Decimal::from(416u64));
    }

    #[test]
    fn test_fraction_above_bounds_and_monotonicity() {
        let key = DistributionKey::new(40, 100, 1_000);
        let sampled = SampledHypergeometricDistribution::new(key, 100, true);
        assert_eq!(sampled.probability_mass_fraction_above(-1), Decimal::one());
        assert_eq!(
            sampled.probability_mass_fraction_above(1_000),
            Decimal::zero()
        );
        let mut previous = Decimal::one();
        for threshold in (-1..=1_000).step_by(7) {
            let fraction = sampled.probability_mass_fraction_above(threshold);
            assert!(fraction <= previous, "not monotonic at {threshold}");
            previous = fraction;
        }
    }

    #[test]
    fn test_converges_to_exact() {
        let key = DistributionKey::new(40, 100, 1_000);
        let exact = HypergeometricDistribution::new(key, true);
        let coarse = SampledHypergeometricDistribution::new(key, 50, true);
        let fine = SampledHypergeometricDistribution::new(key, 500, true);

        let expected = exact.probability_mass_fraction_above(400).to_f64();
        let coarse_error = (coarse.probability_mass_fraction_above(400).to_f64() - expected).abs();
        let fine_error = (fine.probability_mass_fraction_above(400).to_f64() - expected).abs();
        assert!(coarse_error < 0.05, "coarse error = {coarse_error}");
        assert!(fine_error < 0.01, "fine error = {fine_error}");
    }

    #[test]
    fn test_share_summary() {
        let key = DistributionKey::new(500, 1_000, 10_001);
        let sampled = SampledHypergeometricDistribution::new(key, 200, true);
        let summary = sampled.share_summary(&Decimal::ratio(95, 100)).unwrap();
        assert!((summary.median - 0.5).abs() < 0.01, "{summary:?}");
        assert!(summary.lower < summary.median && summary.median < summary.upper);
        assert!(summary.lower > 0.45 && summary.upper < 0.55, "{summary:?}");

        let above = sampled.probability_above_share(0.5);
        assert!((above - 0.5).abs() < 0.02, "above = {above}");
        assert!(sampled.probability_above_share(0.6) < 1e-6);
    }

    #[test]
    fn test_from_masses() {
        let key = DistributionKey::new(2, 4, 10);
        let original = SampledHypergeometricDistribution::new(key, 5, false);
        let masses: Vec<(Range, Decimal)> = original
            .probability_mass_function()
            .iter()
            .map(|(range, mass)| (*range, mass.clone()))
            .collect();
        assert_eq!(
            SampledHypergeometricDistribution::from_masses(key, masses.clone()),
            Some(original)
        );

        let mut gap = masses.clone();
        gap.remove(1);
        assert_eq!(SampledHypergeometricDistribution::from_masses(key, gap), None);

        let mut short = masses;
        short.pop();
        assert_eq!(
            SampledHypergeometricDistribution::from_masses(key, short),
            None
        );
    }

    #[test]
    fn test_cache_idempotence_and_upgrade() {
        let cache = SampledDistributionCache::new();
        let key = DistributionKey::new(10, 50, 2_000);

        let first = cache.get(key, 100, false);
        assert!(first.rebuilt);
        assert_eq!(first.value.number_of_samples(), 100);

        for samples in [100, 50, 1] {
            let again = cache.get(key, samples, false);
            assert!(!again.rebuilt);
            assert!(Arc::ptr_eq(&first.value, &again.value));
        }

        let upgraded = cache.get(key, 300, false);
        assert!(upgraded.rebuilt);
        assert!(upgraded.value.number_of_samples() >= 300);

        let coarser = cache.get(key, 200, false);
        assert!(!coarser.rebuilt);
        assert!(Arc::ptr_eq(&upgraded.value, &coarser.value));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_full_resolution_is_never_rebuilt() {
        let cache = SampledDistributionCache::new();
        let key = DistributionKey::new(1, 2, 9);
        let first = cache.get(key, 10, false);
        assert_eq!(first.value.number_of_samples(), 10);
        let second = cache.get(key, 1_000, false);
        assert!(!second.rebuilt);
        assert!(Arc::ptr_eq(&first.value, &second.value));
    }

    #[test]
    fn test_cache_preload() {
        let cache = SampledDistributionCache::new();
        let key = DistributionKey::new(10, 50, 2_000);
        assert!(cache.preload(SampledHypergeometricDistribution::new(key, 200, false)));
        assert!(!cache.preload(SampledHypergeometricDistribution::new(key, 100, false)));

        let fetched = cache.get(key, 150, false);
        assert!(!fetched.rebuilt);
        assert_eq!(fetched.value.number_of_samples(), 200);
    }

    #[test]
    fn test_cache_logs() {
        let cache = SampledDistributionCache::new();
        let key = DistributionKey::new(1, 4, 100);

        let logger = ThreadLocalLogger::start();
        cache.get(key, 10, false);
        cache.get(key, 5, false);
        cache.get(key, 20, false);
        let messages: Vec<(log::Level, String)> = logger
            .target_messages("poll_stats::sampled")
            .into_iter()
            .filter(|(level, _)| *level <= Debug)
            .collect();

        assert_eq!(messages.len(), 4);
        assert_eq!(
            messages[0],
            (
                Debug,
                "Computing distribution of 1/4 among 100 with 10 samples".to_owned()
            )
        );
        assert!(messages[1]
            .1
            .starts_with("Computed distribution of 1/4 among 100 with 10 samples in "));
        assert_eq!(
            messages[2],
            (
                Info,
                "Upgrading distribution of 1/4 among 100 from 10 to 20 samples".to_owned()
            )
        );
        assert!(messages[3]
            .1
            .starts_with("Computed distribution of 1/4 among 100 with 20 samples in "));
    }
}
