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

//! Results of the analysis of one response scenario.

use crate::multivariate::SampledMultivariateHypergeometricDistribution;
use crate::poll::ElectoralList;
use crate::sampled::SampledHypergeometricDistribution;
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

/// Distribution of the vote share of each electoral list.
#[derive(Clone, Debug, Default)]
pub struct VoteSharesAnalysis {
    distributions: BTreeMap<ElectoralList, Arc<SampledHypergeometricDistribution>>,
}

impl VoteSharesAnalysis {
    /// Creates an empty analysis.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the distribution of the given electoral list, replacing any
    /// previous one.
    pub fn add(
        &mut self,
        list: ElectoralList,
        distribution: Arc<SampledHypergeometricDistribution>,
    ) {
        self.distributions.insert(list, distribution);
    }

    /// Distribution of the given electoral list, if any.
    pub fn probability_mass_function(
        &self,
        list: &ElectoralList,
    ) -> Option<&Arc<SampledHypergeometricDistribution>> {
        self.distributions.get(list)
    }

    /// Iterates over the electoral lists and their distributions, in
    /// alphabetical order.
    pub fn iter(
        &self,
    ) -> impl Iterator<Item = (&ElectoralList, &Arc<SampledHypergeometricDistribution>)> + '_ {
        self.distributions.iter()
    }

    /// Number of electoral lists.
    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    /// Whether there is no electoral list.
    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

/// Set of one or two electoral lists, whose members advance to the second
/// round together.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectoralListSet {
    lists: Vec<ElectoralList>,
}

impl ElectoralListSet {
    /// Set containing only the given list.
    pub fn single(list: ElectoralList) -> Self {
        ElectoralListSet { lists: vec![list] }
    }

    /// Set containing both given lists, which must be distinct.
    pub fn pair(a: ElectoralList, b: ElectoralList) -> Self {
        assert!(a != b, "Pair of identical electoral lists {a}");
        let lists = if a < b { vec![a, b] } else { vec![b, a] };
        ElectoralListSet { lists }
    }

    /// Members of this set, in alphabetical order.
    pub fn lists(&self) -> &[ElectoralList] {
        &self.lists
    }
}

impl Display for ElectoralListSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, list) in self.lists.iter().enumerate() {
            if i != 0 {
                write!(f, " + ")?;
            }
            write!(f, "{list}")?;
        }
        Ok(())
    }
}

/// Probabilities that each electoral list wins the first round, and that
/// each pair of lists advances to the second round.
///
/// Sets with a zero probability are omitted.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FirstRoundWinnersAnalysis {
    probabilities: BTreeMap<ElectoralListSet, f64>,
}

impl FirstRoundWinnersAnalysis {
    /// Derives the probabilities of the electoral lists of a vote shares
    /// analysis from a simulation of their distributions.
    pub fn new(
        vote_shares: &VoteSharesAnalysis,
        simulation: &SampledMultivariateHypergeometricDistribution,
    ) -> Self {
        let lists: Vec<_> = vote_shares.iter().collect();
        let mut probabilities = BTreeMap::new();
        for (i, (list, distribution)) in lists.iter().enumerate() {
            let p = simulation.probability_mass_single(distribution.key());
            if p > 0.0 {
                probabilities.insert(ElectoralListSet::single((*list).clone()), p);
            }
            for (other, other_distribution) in &lists[i + 1..] {
                let p = simulation
                    .probability_mass_pair(distribution.key(), other_distribution.key());
                if p > 0.0 {
                    probabilities.insert(
                        ElectoralListSet::pair((*list).clone(), (*other).clone()),
                        p,
                    );
                }
            }
        }
        FirstRoundWinnersAnalysis { probabilities }
    }

    /// Probability of the given set, which is zero for unknown sets.
    pub fn probability_mass(&self, set: &ElectoralListSet) -> f64 {
        self.probabilities.get(set).copied().unwrap_or(0.0)
    }

    /// Sets with a non-zero probability.
    pub fn electoral_list_sets(&self) -> impl Iterator<Item = &ElectoralListSet> + '_ {
        self.probabilities.keys()
    }
}
