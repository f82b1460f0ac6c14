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

//! Simulation of the joint outcome of several candidates, to estimate the
//! probability that each candidate comes first, and that each pair of
//! candidates occupies the first two positions.
//!
//! Every iteration draws one population count per candidate, independently
//! from the candidate's sampled distribution: a range is picked with
//! probability proportional to its weighted mass, then a count uniformly
//! within the range. Ties are broken uniformly at random.
//!
//! Candidates with the same observation have identical distributions. They
//! are merged into one group with a cardinality: the simulation still draws
//! once per candidate, but tallies per group, and the cardinality is used to
//! split group probabilities evenly among the group's members.

use crate::arithmetic::Decimal;
use crate::cache::{Fetched, UpgradableCache};
use crate::hypergeometric::DistributionKey;
use crate::range::Range;
use crate::sampled::SampledHypergeometricDistribution;
use log::{debug, info, trace, warn};
use num::traits::Zero;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, WeightedAliasIndex};
use rayon::prelude::*;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Instant;

/// Number of iterations simulated with one random stream.
const CHUNK_SIZE: u64 = 8192;

/// Coverage of the confidence intervals used to exclude candidates that
/// cannot reach the first two positions.
fn filter_coverage() -> Decimal {
    Decimal::ratio(999_999, 1_000_000)
}

/// Canonical identity of a set of candidate distributions: the distinct
/// observations with their cardinalities, sorted by median and then by
/// observation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MultivariateKey {
    groups: Vec<(DistributionKey, usize)>,
    population_size: u64,
    sample_size: u64,
}

impl MultivariateKey {
    /// Computes the key of the given candidate distributions. The order of
    /// the candidates doesn't matter.
    ///
    /// Panics if the list is empty, or if the distributions don't share the
    /// same population and sample sizes.
    pub fn new(distributions: &[Arc<SampledHypergeometricDistribution>]) -> Self {
        Self::from_groups(&group_distributions(distributions))
    }

    fn from_groups(groups: &[Group]) -> Self {
        let first = groups[0].distribution.key();
        MultivariateKey {
            groups: groups
                .iter()
                .map(|group| (*group.distribution.key(), group.cardinality))
                .collect(),
            population_size: first.population_size(),
            sample_size: first.sample_size(),
        }
    }

    /// Distinct observations and their cardinalities.
    pub fn groups(&self) -> &[(DistributionKey, usize)] {
        &self.groups
    }

    /// Number of candidates with the given observation.
    pub fn cardinality(&self, key: &DistributionKey) -> usize {
        self.groups
            .iter()
            .find(|(k, _)| k == key)
            .map_or(0, |&(_, cardinality)| cardinality)
    }

    /// Total number of candidates.
    pub fn number_of_candidates(&self) -> usize {
        self.groups.iter().map(|&(_, cardinality)| cardinality).sum()
    }

    /// Size of the population.
    pub fn population_size(&self) -> u64 {
        self.population_size
    }

    /// Size of the sample.
    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }
}

impl Display for MultivariateKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, (key, cardinality)) in self.groups.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", key.value())?;
            if *cardinality != 1 {
                write!(f, " x{cardinality}")?;
            }
        }
        write!(f, "]/{} among {}", self.sample_size, self.population_size)
    }
}

/// Candidates sharing one distribution.
struct Group {
    distribution: Arc<SampledHypergeometricDistribution>,
    median: Option<Range>,
    cardinality: usize,
}

/// Merges equal observations and sorts the resulting groups by median.
fn group_distributions(distributions: &[Arc<SampledHypergeometricDistribution>]) -> Vec<Group> {
    assert!(!distributions.is_empty(), "No distribution to simulate");
    let first = *distributions[0].key();

    let mut groups: BTreeMap<DistributionKey, Group> = BTreeMap::new();
    for distribution in distributions {
        let key = *distribution.key();
        assert!(
            key.population_size() == first.population_size()
                && key.sample_size() == first.sample_size(),
            "Inconsistent observations {first} and {key}"
        );
        groups
            .entry(key)
            .and_modify(|group| group.cardinality += 1)
            .or_insert_with(|| Group {
                distribution: distribution.clone(),
                median: distribution.median(),
                cardinality: 1,
            });
    }

    let mut groups: Vec<Group> = groups.into_values().collect();
    groups.sort_by_key(|group| (group.median, *group.distribution.key()));
    groups
}

/// Sampler of population counts for the candidates of one group.
struct Contender {
    group: usize,
    ranges: Vec<Range>,
    sampler: WeightedAliasIndex<f64>,
}

impl Contender {
    fn new(group: usize, distribution: &SampledHypergeometricDistribution) -> Option<Self> {
        let pmf = distribution.probability_mass_function();
        let sum = pmf.probability_mass_sum();
        if sum.is_zero() {
            return None;
        }
        let (ranges, weights): (Vec<Range>, Vec<f64>) = pmf
            .iter()
            .map(|(range, mass)| (*range, (mass * range.length() / sum).to_f64()))
            .unzip();
        let sampler = WeightedAliasIndex::new(weights).ok()?;
        Some(Contender {
            group,
            ranges,
            sampler,
        })
    }

    fn draw(&self, rng: &mut impl Rng) -> u64 {
        let range = self.ranges[self.sampler.sample(rng)];
        rng.gen_range(range.lower_bound()..=range.upper_bound())
    }
}

/// Simulated population count of one candidate.
#[derive(Clone, Copy)]
struct Draw {
    count: u64,
    tie_breaker: u64,
    group: usize,
}

impl Draw {
    fn beats(&self, other: &Option<Draw>) -> bool {
        match other {
            None => true,
            Some(other) => (self.count, self.tie_breaker) > (other.count, other.tie_breaker),
        }
    }
}

/// Number of wins per group, and of first-two finishes per pair of groups.
#[derive(Clone)]
struct Tally {
    num_groups: usize,
    singles: Vec<u64>,
    /// Indexed by `first * num_groups + second`, with `first <= second`.
    pairs: Vec<u64>,
}

impl Tally {
    fn new(num_groups: usize) -> Self {
        Tally {
            num_groups,
            singles: vec![0; num_groups],
            pairs: vec![0; num_groups * num_groups],
        }
    }

    fn add(&mut self, first: usize, second: Option<usize>) {
        self.singles[first] += 1;
        if let Some(second) = second {
            let (a, b) = if first <= second {
                (first, second)
            } else {
                (second, first)
            };
            self.pairs[a * self.num_groups + b] += 1;
        }
    }

    fn reduce(self, other: Self) -> Self {
        Tally {
            num_groups: self.num_groups,
            singles: std::iter::zip(self.singles, other.singles)
                .map(|(a, b)| a + b)
                .collect(),
            pairs: std::iter::zip(self.pairs, other.pairs)
                .map(|(a, b)| a + b)
                .collect(),
        }
    }
}

/// Candidates taking part in the simulation.
struct Simulation {
    contenders: Vec<Contender>,
    /// Index of the contender of each simulated candidate.
    candidates: Vec<usize>,
    num_groups: usize,
    seed: u64,
}

impl Simulation {
    fn new(groups: &[Group], seed: u64) -> Self {
        let mut contenders = Vec::new();
        let mut candidates = Vec::new();
        for i in select_groups(groups) {
            let group = &groups[i];
            match Contender::new(i, &group.distribution) {
                Some(contender) => {
                    candidates.extend(std::iter::repeat(contenders.len()).take(group.cardinality));
                    contenders.push(contender);
                }
                None => warn!(
                    "Excluding {} from the simulation, as it cannot be sampled",
                    group.distribution.key()
                ),
            }
        }
        Simulation {
            contenders,
            candidates,
            num_groups: groups.len(),
            seed,
        }
    }

    /// Runs the given chunk of iterations, with a random stream that only
    /// depends on the seed and the chunk index.
    fn run_chunk(&self, chunk: u64, iterations: u64) -> Tally {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(chunk);

        let mut tally = Tally::new(self.num_groups);
        for _ in 0..iterations {
            let mut first: Option<Draw> = None;
            let mut second: Option<Draw> = None;
            for &c in &self.candidates {
                let contender = &self.contenders[c];
                let draw = Draw {
                    count: contender.draw(&mut rng),
                    tie_breaker: rng.gen(),
                    group: contender.group,
                };
                if draw.beats(&first) {
                    second = first;
                    first = Some(draw);
                } else if draw.beats(&second) {
                    second = Some(draw);
                }
            }
            if let Some(first) = first {
                tally.add(first.group, second.map(|draw| draw.group));
            }
        }
        tally
    }
}

/// Selects the groups that can reach the first two positions: those whose
/// confidence interval reaches the interval of the runner-up, i.e. of the
/// candidate with the second highest median.
fn select_groups(groups: &[Group]) -> Vec<usize> {
    let coverage = filter_coverage();
    let mut intervals = Vec::with_capacity(groups.len());
    for (i, group) in groups.iter().enumerate() {
        match group.distribution.confidence_interval(&coverage) {
            Some(interval) => intervals.push((i, interval)),
            None => warn!(
                "Excluding {}, whose distribution has no mass",
                group.distribution.key()
            ),
        }
    }

    // Groups are sorted by ascending median.
    let runner_up = match intervals.as_slice() {
        [] => return Vec::new(),
        [.., (top, interval)] if groups[*top].cardinality >= 2 => *interval,
        [.., (_, interval), _] => *interval,
        [_] => return intervals.iter().map(|&(i, _)| i).collect(),
    };

    intervals
        .into_iter()
        .filter(|&(i, interval)| {
            let selected = interval.upper_bound() >= runner_up.lower_bound();
            if !selected {
                debug!(
                    "Excluding {} from the simulation, its interval {interval} doesn't reach the runner-up's {runner_up}",
                    groups[i].distribution.key()
                );
            }
            selected
        })
        .map(|(i, _)| i)
        .collect()
}

/// Smallest number of ranges among the given distributions.
fn min_number_of_samples(distributions: &[Arc<SampledHypergeometricDistribution>]) -> u64 {
    distributions
        .iter()
        .map(|distribution| distribution.number_of_samples())
        .min()
        .unwrap_or(0)
}

/// Estimated probabilities of the first-round winners among a set of
/// candidates.
#[derive(Debug, PartialEq)]
pub struct SampledMultivariateHypergeometricDistribution {
    key: MultivariateKey,
    number_of_iterations: u64,
    /// Smallest number of ranges among the simulated distributions.
    number_of_samples: u64,
    /// Observations whose candidates took part in the simulation.
    simulated: Vec<DistributionKey>,
    /// Number of iterations won by a member of each group.
    singles: BTreeMap<DistributionKey, u64>,
    /// Number of iterations where members of both groups (possibly the same
    /// one) came first and second. Keys are in ascending order.
    pairs: BTreeMap<(DistributionKey, DistributionKey), u64>,
}

impl SampledMultivariateHypergeometricDistribution {
    /// Simulates the given candidate distributions.
    ///
    /// The result only depends on the candidates (not on their order), the
    /// number of iterations and the seed, whether or not the computation is
    /// parallel.
    pub fn new(
        distributions: &[Arc<SampledHypergeometricDistribution>],
        number_of_iterations: u64,
        seed: u64,
        parallel: bool,
    ) -> Self {
        assert!(
            number_of_iterations > 0,
            "The number of iterations must be positive"
        );
        let groups = group_distributions(distributions);
        let key = MultivariateKey::from_groups(&groups);
        let number_of_samples = min_number_of_samples(distributions);
        let simulation = Simulation::new(&groups, seed);

        let num_groups = groups.len();
        let num_chunks = number_of_iterations.div_ceil(CHUNK_SIZE);
        let run = |chunk: u64| {
            let iterations = CHUNK_SIZE.min(number_of_iterations - chunk * CHUNK_SIZE);
            simulation.run_chunk(chunk, iterations)
        };
        let tally = if parallel {
            (0..num_chunks)
                .into_par_iter()
                .map(run)
                .reduce(|| Tally::new(num_groups), Tally::reduce)
        } else {
            (0..num_chunks)
                .map(run)
                .fold(Tally::new(num_groups), Tally::reduce)
        };

        let group_key = |i: usize| *groups[i].distribution.key();
        let simulated = simulation
            .contenders
            .iter()
            .map(|contender| group_key(contender.group))
            .collect();
        let singles = (0..num_groups)
            .filter(|&i| tally.singles[i] != 0)
            .map(|i| (group_key(i), tally.singles[i]))
            .collect();
        let mut pairs = BTreeMap::new();
        for a in 0..num_groups {
            for b in a..num_groups {
                let count = tally.pairs[a * num_groups + b];
                if count != 0 {
                    let (ka, kb) = (group_key(a), group_key(b));
                    pairs.insert((ka.min(kb), ka.max(kb)), count);
                }
            }
        }

        SampledMultivariateHypergeometricDistribution {
            key,
            number_of_iterations,
            number_of_samples,
            simulated,
            singles,
            pairs,
        }
    }

    /// Identity of the simulated candidates.
    pub fn key(&self) -> &MultivariateKey {
        &self.key
    }

    /// Number of simulated iterations.
    pub fn number_of_iterations(&self) -> u64 {
        self.number_of_iterations
    }

    /// Smallest number of ranges among the candidate distributions that were
    /// simulated.
    pub fn number_of_samples(&self) -> u64 {
        self.number_of_samples
    }

    /// Observations whose candidates took part in the simulation. The other
    /// candidates were found to have no chance of reaching the first two
    /// positions.
    pub fn simulated(&self) -> &[DistributionKey] {
        &self.simulated
    }

    /// Probability that a given candidate with this observation comes first.
    pub fn probability_mass_single(&self, key: &DistributionKey) -> f64 {
        let Some(&count) = self.singles.get(key) else {
            return 0.0;
        };
        let cardinality = self.key.cardinality(key);
        count as f64 / self.number_of_iterations as f64 / cardinality as f64
    }

    /// Probability that two given candidates with these observations come
    /// first and second, in any order. The observations may be equal, in
    /// which case two distinct candidates sharing it are meant.
    pub fn probability_mass_pair(&self, a: &DistributionKey, b: &DistributionKey) -> f64 {
        let Some(&count) = self.pairs.get(&(*a.min(b), *a.max(b))) else {
            return 0.0;
        };
        let combinations = if a == b {
            let cardinality = self.key.cardinality(a);
            cardinality * (cardinality - 1) / 2
        } else {
            self.key.cardinality(a) * self.key.cardinality(b)
        };
        count as f64 / self.number_of_iterations as f64 / combinations as f64
    }
}

/// Cache of simulations, keyed by the identity of the simulated candidates.
/// An entry is only reused if it has at least as many iterations as
/// requested and was built on distributions with at least as many ranges as
/// the given ones.
#[derive(Default)]
pub struct MultivariateCache {
    cache: UpgradableCache<MultivariateKey, SampledMultivariateHypergeometricDistribution>,
}

impl MultivariateCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a simulation of the given candidates with at least
    /// `number_of_iterations` iterations, running it if no precise enough
    /// simulation is cached. A cached simulation of coarser distributions is
    /// replaced, keeping at least its number of iterations.
    pub fn get(
        &self,
        distributions: &[Arc<SampledHypergeometricDistribution>],
        number_of_iterations: u64,
        seed: u64,
        parallel: bool,
    ) -> Fetched<SampledMultivariateHypergeometricDistribution> {
        let key = MultivariateKey::new(distributions);
        let number_of_samples = min_number_of_samples(distributions);
        let previous = Cell::new(None);
        let fetched = self.cache.get_or_build(
            &key,
            |cached| {
                previous.set(Some((
                    cached.number_of_iterations(),
                    cached.number_of_samples(),
                )));
                cached.number_of_iterations() >= number_of_iterations
                    && cached.number_of_samples() >= number_of_samples
            },
            || {
                let number_of_iterations = match previous.get() {
                    Some((old_iterations, old_samples)) => {
                        let iterations = number_of_iterations.max(old_iterations);
                        info!(
                            "Upgrading simulation of {key} from {old_iterations} to {iterations} iterations, on {old_samples} to {number_of_samples} samples"
                        );
                        iterations
                    }
                    None => {
                        debug!("Simulating {key} with {number_of_iterations} iterations");
                        number_of_iterations
                    }
                };
                let start = Instant::now();
                let distribution = SampledMultivariateHypergeometricDistribution::new(
                    distributions,
                    number_of_iterations,
                    seed,
                    parallel,
                );
                debug!(
                    "Simulated {key} with {number_of_iterations} iterations in {:?}",
                    start.elapsed()
                );
                distribution
            },
        );
        if !fetched.rebuilt {
            trace!(
                "Reusing simulation of {key} with {} iterations",
                fetched.value.number_of_iterations()
            );
        }
        fetched
    }

    /// Number of cached simulations.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether no simulation is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Removes all cached simulations.
    pub fn clear(&self) {
        self.cache.clear()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const POPULATION_SIZE: u64 = 10_001;
    const SAMPLE_SIZE: u64 = 1_000;

    fn make_distribution(value: u64) -> Arc<SampledHypergeometricDistribution> {
        Arc::new(SampledHypergeometricDistribution::new(
            DistributionKey::new(value, SAMPLE_SIZE, POPULATION_SIZE),
            100,
            true,
        ))
    }

    fn key(value: u64) -> DistributionKey {
        DistributionKey::new(value, SAMPLE_SIZE, POPULATION_SIZE)
    }

    #[test]
    fn test_key_is_order_independent() {
        let a = make_distribution(450);
        let b = make_distribution(100);
        let key = MultivariateKey::new(&[a.clone(), b.clone(), a.clone()]);
        assert_eq!(key, MultivariateKey::new(&[b.clone(), a.clone(), a.clone()]));
        assert_eq!(key.groups(), &[(*b.key(), 1), (*a.key(), 2)]);
        assert_eq!(key.cardinality(a.key()), 2);
        assert_eq!(key.cardinality(&self::key(7)), 0);
        assert_eq!(key.number_of_candidates(), 3);
        assert_eq!(key.to_string(), "[100, 450 x2]/1000 among 10001");
        assert_ne!(key, MultivariateKey::new(&[a, b]));
    }

    #[test]
    #[should_panic(expected = "Inconsistent observations 10/20 among 100 and 10/30 among 100")]
    fn test_key_inconsistent_observations() {
        let a = Arc::new(SampledHypergeometricDistribution::new(
            DistributionKey::new(10, 20, 100),
            10,
            false,
        ));
        let b = Arc::new(SampledHypergeometricDistribution::new(
            DistributionKey::new(10, 30, 100),
            10,
            false,
        ));
        MultivariateKey::new(&[a, b]);
    }

    #[test]
    #[should_panic(expected = "No distribution to simulate")]
    fn test_key_empty() {
        MultivariateKey::new(&[]);
    }

    #[test]
    fn test_two_symmetric_candidates() {
        let a = make_distribution(500);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[a.clone(), a.clone()],
            20_000,
            42,
            true,
        );
        assert_eq!(distribution.probability_mass_single(a.key()), 0.5);
        assert_eq!(distribution.probability_mass_pair(a.key(), a.key()), 1.0);
        assert_eq!(distribution.simulated(), &[*a.key()]);
    }

    #[test]
    fn test_three_symmetric_candidates() {
        let a = make_distribution(333);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[a.clone(), a.clone(), a.clone()],
            20_000,
            42,
            true,
        );
        assert!((distribution.probability_mass_single(a.key()) - 1.0 / 3.0).abs() < 1e-12);
        assert!((distribution.probability_mass_pair(a.key(), a.key()) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_clear_leader() {
        let leader = make_distribution(700);
        let trailer = make_distribution(100);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[leader.clone(), trailer.clone()],
            20_000,
            42,
            true,
        );
        assert_eq!(distribution.probability_mass_single(leader.key()), 1.0);
        assert_eq!(distribution.probability_mass_single(trailer.key()), 0.0);
        assert_eq!(
            distribution.probability_mass_pair(leader.key(), trailer.key()),
            1.0
        );
        assert_eq!(
            distribution.probability_mass_pair(trailer.key(), leader.key()),
            1.0
        );
        assert_eq!(distribution.probability_mass_pair(leader.key(), leader.key()), 0.0);
    }

    #[test]
    fn test_close_race() {
        let a = make_distribution(510);
        let b = make_distribution(490);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[a.clone(), b.clone()],
            20_000,
            42,
            true,
        );
        let p_a = distribution.probability_mass_single(a.key());
        let p_b = distribution.probability_mass_single(b.key());
        assert!(0.7 < p_a && p_a < 0.95, "p_a = {p_a}");
        assert!((p_a + p_b - 1.0).abs() < 1e-12);
        assert_eq!(distribution.probability_mass_pair(a.key(), b.key()), 1.0);
    }

    #[test]
    fn test_minor_candidates_are_excluded() {
        let a = make_distribution(400);
        let b = make_distribution(380);
        let c = make_distribution(50);
        let d = make_distribution(30);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[c.clone(), a.clone(), d.clone(), b.clone()],
            20_000,
            42,
            true,
        );
        assert_eq!(distribution.simulated(), &[*b.key(), *a.key()]);
        assert_eq!(distribution.probability_mass_single(c.key()), 0.0);
        assert_eq!(distribution.probability_mass_single(d.key()), 0.0);
        assert_eq!(distribution.probability_mass_pair(a.key(), c.key()), 0.0);
        assert_eq!(distribution.probability_mass_pair(a.key(), b.key()), 1.0);

        let p_a = distribution.probability_mass_single(a.key());
        let p_b = distribution.probability_mass_single(b.key());
        assert!(p_a > p_b);
        assert!((p_a + p_b - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_mixed_cardinalities() {
        let a = make_distribution(450);
        let c = make_distribution(100);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[a.clone(), c.clone(), a.clone()],
            20_000,
            42,
            true,
        );
        assert_eq!(distribution.simulated(), &[*a.key()]);
        assert_eq!(distribution.probability_mass_single(a.key()), 0.5);
        assert_eq!(distribution.probability_mass_single(c.key()), 0.0);
        assert_eq!(distribution.probability_mass_pair(a.key(), a.key()), 1.0);
        assert_eq!(distribution.probability_mass_pair(a.key(), c.key()), 0.0);
    }

    #[test]
    fn test_pairs_among_several_groups() {
        let a = make_distribution(340);
        let b = make_distribution(330);
        let c = make_distribution(320);
        let distribution = SampledMultivariateHypergeometricDistribution::new(
            &[a.clone(), b.clone(), c.clone()],
            20_000,
            42,
            true,
        );
        let singles: f64 = [&a, &b, &c]
            .iter()
            .map(|d| distribution.probability_mass_single(d.key()))
            .sum();
        assert!((singles - 1.0).abs() < 1e-12);
        let pairs = distribution.probability_mass_pair(a.key(), b.key())
            + distribution.probability_mass_pair(a.key(), c.key())
            + distribution.probability_mass_pair(b.key(), c.key());
        assert!((pairs - 1.0).abs() < 1e-12);
        assert!(
            distribution.probability_mass_pair(a.key(), b.key())
                > distribution.probability_mass_pair(b.key(), c.key())
        );
    }

    #[test]
    fn test_parallel_matches_serial() {
        let candidates = [make_distribution(510), make_distribution(490)];
        // Not a multiple of the chunk size.
        let serial =
            SampledMultivariateHypergeometricDistribution::new(&candidates, 10_000, 7, false);
        let parallel =
            SampledMultivariateHypergeometricDistribution::new(&candidates, 10_000, 7, true);
        assert_eq!(serial, parallel);
        assert_eq!(serial.number_of_iterations(), 10_000);
    }

    #[test]
    fn test_single_candidate() {
        let a = make_distribution(300);
        let distribution =
            SampledMultivariateHypergeometricDistribution::new(&[a.clone()], 100, 42, false);
        assert_eq!(distribution.probability_mass_single(a.key()), 1.0);
        assert_eq!(distribution.probability_mass_pair(a.key(), a.key()), 0.0);
    }

    #[test]
    fn test_cache_idempotence_and_upgrade() {
        let cache = MultivariateCache::new();
        let a = make_distribution(510);
        let b = make_distribution(490);

        let first = cache.get(&[a.clone(), b.clone()], 1_000, 42, false);
        assert!(first.rebuilt);
        let again = cache.get(&[b.clone(), a.clone()], 500, 42, false);
        assert!(!again.rebuilt);
        assert!(Arc::ptr_eq(&first.value, &again.value));

        let upgraded = cache.get(&[a.clone(), b.clone()], 5_000, 42, false);
        assert!(upgraded.rebuilt);
        assert_eq!(upgraded.value.number_of_iterations(), 5_000);
        let coarser = cache.get(&[a, b], 2_000, 42, false);
        assert!(!coarser.rebuilt);
        assert!(Arc::ptr_eq(&upgraded.value, &coarser.value));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_rebuilds_on_finer_distributions() {
        let sampled = |value: u64, number_of_samples: u64| {
            Arc::new(SampledHypergeometricDistribution::new(
                key(value),
                number_of_samples,
                false,
            ))
        };
        let cache = MultivariateCache::new();

        let coarse = cache.get(&[sampled(510, 10), sampled(490, 10)], 1_000, 42, false);
        assert!(coarse.rebuilt);
        assert_eq!(coarse.value.number_of_samples(), 10);

        let fine = cache.get(&[sampled(510, 200), sampled(490, 200)], 1_000, 42, false);
        assert!(fine.rebuilt);
        assert!(!Arc::ptr_eq(&coarse.value, &fine.value));
        assert_eq!(fine.value.number_of_samples(), 200);
        assert_eq!(fine.value.number_of_iterations(), 1_000);

        // Coarser distributions and fewer iterations reuse the finer simulation.
        let reused = cache.get(&[sampled(510, 10), sampled(490, 10)], 500, 42, false);
        assert!(!reused.rebuilt);
        assert!(Arc::ptr_eq(&fine.value, &reused.value));

        // Finer distributions keep the iterations of the replaced simulation.
        let finer = cache.get(&[sampled(510, 400), sampled(490, 400)], 100, 42, false);
        assert!(finer.rebuilt);
        assert_eq!(finer.value.number_of_samples(), 400);
        assert_eq!(finer.value.number_of_iterations(), 1_000);
        assert_eq!(cache.len(), 1);
    }
}
