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

//! Engine running the analyses of a set of opinion polls.

use crate::analysis::{FirstRoundWinnersAnalysis, VoteSharesAnalysis};
use crate::arithmetic::Decimal;
use crate::hypergeometric::DistributionKey;
use crate::multivariate::MultivariateCache;
use crate::poll::{OpinionPoll, PollDate, ResponseScenario, Scope};
use crate::sampled::SampledDistributionCache;
use crate::store::DistributionStore;
use log::{debug, info, log_enabled, warn, Level::Info};
use std::collections::BTreeMap;
use std::io;

/// Seed of the simulations, unless configured otherwise.
pub const DEFAULT_SEED: u64 = 0x5eed_f00d;

/// Parameters of an [`AnalysisEngine`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimal number of ranges of the sampled distributions.
    pub number_of_samples: u64,
    /// Minimal number of iterations of the first-round simulations.
    pub number_of_iterations: u64,
    /// Whether to compute masses and simulations on the rayon thread pool.
    pub parallel: bool,
    /// Seed of the first-round simulations.
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            number_of_samples: 10_000,
            number_of_iterations: 2_000_000,
            parallel: true,
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    /// Sets the minimal number of ranges of the sampled distributions.
    pub fn number_of_samples(mut self, number_of_samples: u64) -> Self {
        self.number_of_samples = number_of_samples;
        self
    }

    /// Sets the minimal number of iterations of the first-round simulations.
    pub fn number_of_iterations(mut self, number_of_iterations: u64) -> Self {
        self.number_of_iterations = number_of_iterations;
        self
    }

    /// Enables or disables parallel computation.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Sets the seed of the first-round simulations.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Identifies a response scenario: the index of its poll among the polls
/// given to the engine, and its index within the poll (0 for the main
/// scenario).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScenarioId {
    /// Index of the poll.
    pub poll_id: usize,
    /// Index of the scenario within the poll.
    pub index: usize,
}

/// Engine computing the vote shares of the most recent polls, and the
/// first-round winners of presidential polls.
pub struct AnalysisEngine<'p> {
    polls: &'p [OpinionPoll],
    population_size: u64,
    store: &'p dyn DistributionStore,
    config: EngineConfig,
    sampled_cache: SampledDistributionCache,
    multivariate_cache: MultivariateCache,
    vote_shares: BTreeMap<ScenarioId, VoteSharesAnalysis>,
    first_round_winners: BTreeMap<ScenarioId, FirstRoundWinnersAnalysis>,
}

impl<'p> AnalysisEngine<'p> {
    /// Creates an engine for the given polls, taken among a population of
    /// `population_size` voters. Distributions that get computed are written
    /// to the given store.
    pub fn new(
        polls: &'p [OpinionPoll],
        population_size: u64,
        store: &'p dyn DistributionStore,
    ) -> Self {
        AnalysisEngine {
            polls,
            population_size,
            store,
            config: EngineConfig::default(),
            sampled_cache: SampledDistributionCache::new(),
            multivariate_cache: MultivariateCache::new(),
            vote_shares: BTreeMap::new(),
            first_round_winners: BTreeMap::new(),
        }
    }

    /// Replaces the configuration of this engine.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration of this engine.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Cache of the sampled distributions computed so far.
    pub fn sampled_cache(&self) -> &SampledDistributionCache {
        &self.sampled_cache
    }

    /// Cache of the first-round simulations run so far.
    pub fn multivariate_cache(&self) -> &MultivariateCache {
        &self.multivariate_cache
    }

    /// Loads the distributions persisted in the store into the cache, and
    /// returns how many of them were kept.
    pub fn preload(&self) -> io::Result<usize> {
        let mut count = 0;
        for distribution in self.store.load()? {
            if self.sampled_cache.preload(distribution) {
                count += 1;
            }
        }
        debug!("Preloaded {count} distributions");
        Ok(count)
    }

    /// Returns the indices of the most recent polls of each polling firm, in
    /// increasing order. Polls of the same firm that share the most recent
    /// date are all kept.
    pub fn most_recent_polls(&self) -> Vec<usize> {
        let mut latest: BTreeMap<&str, PollDate> = BTreeMap::new();
        for poll in self.polls {
            let Some(date) = poll.end_date() else {
                continue;
            };
            latest
                .entry(poll.polling_firm.as_str())
                .and_modify(|d| *d = (*d).max(date))
                .or_insert(date);
        }

        let selected: Vec<usize> = self
            .polls
            .iter()
            .enumerate()
            .filter(|(_, poll)| {
                poll.end_date().is_some()
                    && poll.end_date() == latest.get(poll.polling_firm.as_str()).copied()
            })
            .map(|(i, _)| i)
            .collect();
        for (firm, date) in &latest {
            debug!("Most recent poll(s) by {firm} ended on {date}");
        }
        selected
    }

    /// Runs the analyses, with the given numbers of samples and iterations or
    /// the configured ones. Previous results are discarded, but the caches
    /// are kept so that distributions precise enough are not recomputed.
    pub fn run(
        &mut self,
        number_of_samples: Option<u64>,
        number_of_iterations: Option<u64>,
    ) -> io::Result<()> {
        let number_of_samples = number_of_samples.unwrap_or(self.config.number_of_samples);
        let number_of_iterations =
            number_of_iterations.unwrap_or(self.config.number_of_iterations);

        self.vote_shares.clear();
        self.first_round_winners.clear();

        let polls = self.polls;
        for poll_id in self.most_recent_polls() {
            let poll = &polls[poll_id];
            let Some(effective_sample_size) = poll.effective_sample_size else {
                debug!(
                    "Skipping poll by {} without effective sample size",
                    poll.polling_firm
                );
                continue;
            };
            if effective_sample_size > self.population_size {
                warn!(
                    "Skipping poll by {}: effective sample size {effective_sample_size} exceeds the population of {}",
                    poll.polling_firm, self.population_size
                );
                continue;
            }

            for (index, scenario) in poll.scenarios() {
                let id = ScenarioId { poll_id, index };
                let vote_shares =
                    self.analyze_vote_shares(scenario, effective_sample_size, number_of_samples)?;
                if log_enabled!(Info) {
                    log_summary(poll, index, &vote_shares);
                }

                if poll.scenario_scope(scenario) == Some(Scope::PresidentialFirstRound)
                    && !vote_shares.is_empty()
                {
                    let distributions: Vec<_> =
                        vote_shares.iter().map(|(_, d)| d.clone()).collect();
                    let simulation = self.multivariate_cache.get(
                        &distributions,
                        number_of_iterations,
                        self.config.seed,
                        self.config.parallel,
                    );
                    self.first_round_winners.insert(
                        id,
                        FirstRoundWinnersAnalysis::new(&vote_shares, &simulation.value),
                    );
                }
                self.vote_shares.insert(id, vote_shares);
            }
        }
        Ok(())
    }

    fn analyze_vote_shares(
        &self,
        scenario: &ResponseScenario,
        effective_sample_size: u64,
        number_of_samples: u64,
    ) -> io::Result<VoteSharesAnalysis> {
        let mut analysis = VoteSharesAnalysis::new();
        for (list, &percentage) in &scenario.results {
            let value = observed_count(percentage, effective_sample_size);
            let key = DistributionKey::new(value, effective_sample_size, self.population_size);
            let fetched = self
                .sampled_cache
                .get(key, number_of_samples, self.config.parallel);
            if fetched.rebuilt {
                self.store.write(&key, &fetched.value)?;
            }
            analysis.add(list.clone(), fetched.value);
        }
        Ok(analysis)
    }

    /// Identifiers of the analyzed scenarios, in increasing order.
    pub fn scenario_ids(&self) -> impl Iterator<Item = &ScenarioId> + '_ {
        self.vote_shares.keys()
    }

    /// Poll of the given scenario.
    pub fn poll(&self, id: &ScenarioId) -> &'p OpinionPoll {
        &self.polls[id.poll_id]
    }

    /// Vote shares of the given scenario, if it was analyzed.
    pub fn vote_shares_analysis(&self, id: &ScenarioId) -> Option<&VoteSharesAnalysis> {
        self.vote_shares.get(id)
    }

    /// First-round winners of the given scenario, if it was analyzed and is
    /// about the first round of a presidential election.
    pub fn first_round_winners_analysis(
        &self,
        id: &ScenarioId,
    ) -> Option<&FirstRoundWinnersAnalysis> {
        self.first_round_winners.get(id)
    }
}

/// Number of respondents corresponding to a percentage of the effective
/// sample.
fn observed_count(percentage: f64, effective_sample_size: u64) -> u64 {
    let count = (percentage * effective_sample_size as f64 / 100.0).round() as u64;
    count.min(effective_sample_size)
}

fn log_summary(poll: &OpinionPoll, index: usize, vote_shares: &VoteSharesAnalysis) {
    let coverage = Decimal::ratio(95, 100);
    for (list, distribution) in vote_shares.iter() {
        if let Some(summary) = distribution.share_summary(&coverage) {
            info!(
                "[{} #{index}] {list}: {:.1}% [{:.1}%, {:.1}%]",
                poll.polling_firm,
                summary.median * 100.0,
                summary.lower * 100.0,
                summary.upper * 100.0
            );
        }
    }
}
