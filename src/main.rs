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

//! Command-line program estimating vote shares from an opinion poll.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

use clap::Parser;
use poll_stats::{
    analysis::ElectoralListSet,
    arithmetic::Decimal,
    engine::{AnalysisEngine, EngineConfig, ScenarioId, DEFAULT_SEED},
    poll::{OpinionPoll, PollDate, ResponseScenario, Scope},
    store::{DistributionStore, FileStore, NoopStore},
};
use std::io::{self, Write};
use std::path::PathBuf;

/// Hypergeometric estimation of vote shares and first-round winners.
#[derive(Parser, Debug, PartialEq)]
struct Cli {
    /// Number of voters in the population.
    #[arg(long)]
    population_size: u64,

    /// Effective sample size of the poll.
    #[arg(long)]
    sample_size: u64,

    /// Last day of fieldwork of the poll, as YYYY-MM-DD.
    #[arg(long)]
    date: PollDate,

    /// Result of an electoral list, as NAME=PERCENT. May be repeated.
    #[arg(long = "result", value_name = "NAME=PERCENT", value_parser = parse_result, required = true)]
    results: Vec<(String, f64)>,

    /// Kind of election.
    #[arg(long, value_enum, default_value = "national")]
    scope: CliScope,

    /// Minimal number of ranges of each vote-share distribution.
    #[arg(long, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    samples: u64,

    /// Minimal number of iterations of the first-round simulation.
    #[arg(long, default_value_t = 2_000_000, value_parser = clap::value_parser!(u64).range(1..))]
    iterations: u64,

    /// Seed of the first-round simulation.
    #[arg(long, default_value_t = DEFAULT_SEED)]
    seed: u64,

    /// Enable parallel computations based on the rayon crate.
    #[arg(long, action = clap::ArgAction::Set, default_value = "true")]
    parallel: bool,

    /// Directory where computed distributions are persisted, and reloaded
    /// from on later runs.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

/// Kind of election.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum CliScope {
    /// European parliament election.
    European,
    /// Local election.
    Local,
    /// National parliament election.
    National,
    /// First round of a presidential election.
    PresidentialFirstRound,
    /// Second round of a presidential election.
    PresidentialSecondRound,
}

impl From<CliScope> for Scope {
    fn from(scope: CliScope) -> Self {
        match scope {
            CliScope::European => Scope::European,
            CliScope::Local => Scope::Local,
            CliScope::National => Scope::National,
            CliScope::PresidentialFirstRound => Scope::PresidentialFirstRound,
            CliScope::PresidentialSecondRound => Scope::PresidentialSecondRound,
        }
    }
}

/// Parses a `NAME=PERCENT` result.
fn parse_result(s: &str) -> Result<(String, f64), String> {
    let (name, percentage) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid result {s:?}, expected NAME=PERCENT"))?;
    if name.is_empty() {
        return Err(format!("Missing name in result {s:?}"));
    }
    let percentage: f64 = percentage
        .parse()
        .map_err(|_| format!("Invalid percentage in result {s:?}"))?;
    if !(0.0..=100.0).contains(&percentage) {
        return Err(format!("Percentage out of range in result {s:?}"));
    }
    Ok((name.to_owned(), percentage))
}

impl Cli {
    /// Analyzes the poll given by the command-line parameters, and writes a
    /// report to the given output.
    fn run(self, output: &mut impl Write) -> io::Result<()> {
        if self.sample_size > self.population_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Sample size {} exceeds the population size {}",
                    self.sample_size, self.population_size
                ),
            ));
        }

        let scenario = self
            .results
            .iter()
            .fold(ResponseScenario::new(), |scenario, (name, percentage)| {
                scenario.result(name, *percentage)
            });
        let poll = OpinionPoll::builder()
            .polling_firm("Command line")
            .fieldwork_end(self.date)
            .effective_sample_size(self.sample_size)
            .scope(self.scope.into())
            .main_scenario(scenario)
            .build();
        let polls = [poll];

        let file_store;
        let store: &dyn DistributionStore = match &self.cache_dir {
            Some(directory) => {
                file_store = FileStore::new(directory);
                &file_store
            }
            None => &NoopStore,
        };

        let config = EngineConfig::default()
            .number_of_samples(self.samples)
            .number_of_iterations(self.iterations)
            .seed(self.seed)
            .parallel(self.parallel);
        let mut engine =
            AnalysisEngine::new(&polls, self.population_size, store).with_config(config);
        if self.cache_dir.is_some() {
            engine.preload()?;
        }
        engine.run(None, None)?;

        write_report(
            output,
            &engine,
            &ScenarioId {
                poll_id: 0,
                index: 0,
            },
        )
    }
}

/// Writes the vote shares and first-round winners of a scenario.
fn write_report(
    output: &mut impl Write,
    engine: &AnalysisEngine,
    id: &ScenarioId,
) -> io::Result<()> {
    let Some(vote_shares) = engine.vote_shares_analysis(id) else {
        return writeln!(output, "No analysis");
    };

    let coverage = Decimal::ratio(95, 100);
    writeln!(output, "Vote shares (median, 95% confidence interval):")?;
    for (list, distribution) in vote_shares.iter() {
        match distribution.share_summary(&coverage) {
            Some(summary) => writeln!(
                output,
                "  {list}: {:.1}% [{:.1}%, {:.1}%]",
                summary.median * 100.0,
                summary.lower * 100.0,
                summary.upper * 100.0
            )?,
            None => writeln!(output, "  {list}: undefined")?,
        }
    }

    if let Some(winners) = engine.first_round_winners_analysis(id) {
        writeln!(output, "First-round winners:")?;
        let sets: Vec<&ElectoralListSet> = winners.electoral_list_sets().collect();
        for set in sets.iter().filter(|set| set.lists().len() == 1) {
            writeln!(output, "  {set}: {:.2}%", winners.probability_mass(set) * 100.0)?;
        }
        writeln!(output, "Second-round pairs:")?;
        for set in sets.iter().filter(|set| set.lists().len() == 2) {
            writeln!(output, "  {set}: {:.2}%", winners.probability_mass(set) * 100.0)?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    cli.run(&mut io::stdout().lock()).unwrap();
}
