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

//! Types to represent opinion polls.

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::str::FromStr;

/// Calendar date, ordered chronologically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PollDate {
    year: i32,
    month: u32,
    day: u32,
}

impl PollDate {
    /// Creates a new date.
    ///
    /// Panics if the month or the day is out of range.
    pub fn new(year: i32, month: u32, day: u32) -> Self {
        assert!(
            (1..=12).contains(&month) && (1..=31).contains(&day),
            "Invalid date {year:04}-{month:02}-{day:02}"
        );
        PollDate { year, month, day }
    }
}

impl Display for PollDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl FromStr for PollDate {
    type Err = String;

    /// Parses a date in the `YYYY-MM-DD` format.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid date {s:?}, expected YYYY-MM-DD");
        let mut parts = s.splitn(3, '-');
        let year = parts.next().and_then(|x| x.parse().ok()).ok_or_else(invalid)?;
        let month = parts.next().and_then(|x| x.parse().ok()).ok_or_else(invalid)?;
        let day = parts.next().and_then(|x| x.parse().ok()).ok_or_else(invalid)?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(invalid());
        }
        Ok(PollDate { year, month, day })
    }
}

/// Kind of election that a poll is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// European parliament election.
    European,
    /// Local election.
    Local,
    /// National parliament election.
    National,
    /// First round of a presidential election, of which the two leading
    /// candidates advance to the second round.
    PresidentialFirstRound,
    /// Second round of a presidential election.
    PresidentialSecondRound,
}

/// Party or candidate appearing in the results of a poll.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElectoralList {
    name: String,
}

impl ElectoralList {
    /// Creates an electoral list with the given name.
    pub fn new(name: &str) -> Self {
        ElectoralList {
            name: name.to_owned(),
        }
    }

    /// Name of this electoral list.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for ElectoralList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Results of a poll for one set of answer options.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponseScenario {
    /// Scope of this scenario, if it differs from the poll's scope.
    pub scope: Option<Scope>,
    /// Percentage of the sample that chose each electoral list.
    pub results: BTreeMap<ElectoralList, f64>,
}

impl ResponseScenario {
    /// Creates an empty scenario.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the scope of the poll for this scenario.
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Adds the percentage of one electoral list.
    pub fn result(mut self, list: &str, percentage: f64) -> Self {
        assert!(
            (0.0..=100.0).contains(&percentage),
            "Invalid percentage {percentage} for {list}"
        );
        self.results.insert(ElectoralList::new(list), percentage);
        self
    }
}

/// Opinion poll published by a polling firm.
#[derive(Clone, Debug, PartialEq)]
pub struct OpinionPoll {
    /// Name of the polling firm.
    pub polling_firm: String,
    /// Last day of fieldwork.
    pub fieldwork_end: Option<PollDate>,
    /// Day of publication.
    pub publication_date: Option<PollDate>,
    /// Number of respondents that the percentages refer to.
    pub effective_sample_size: Option<u64>,
    /// Kind of election.
    pub scope: Option<Scope>,
    /// Main results.
    pub main_scenario: ResponseScenario,
    /// Results for other sets of answer options.
    pub alternative_scenarios: Vec<ResponseScenario>,
}

impl OpinionPoll {
    /// Returns a new builder.
    pub fn builder() -> OpinionPollBuilder {
        OpinionPollBuilder::default()
    }

    /// Date at which this poll is considered to have been taken: the end of
    /// fieldwork, or the publication date if the former is unknown.
    pub fn end_date(&self) -> Option<PollDate> {
        self.fieldwork_end.or(self.publication_date)
    }

    /// Iterates over the response scenarios, the main one coming first with
    /// index 0.
    pub fn scenarios(&self) -> impl Iterator<Item = (usize, &ResponseScenario)> + '_ {
        std::iter::once(&self.main_scenario)
            .chain(self.alternative_scenarios.iter())
            .enumerate()
    }

    /// Scope of the given scenario, which defaults to the poll's scope.
    pub fn scenario_scope(&self, scenario: &ResponseScenario) -> Option<Scope> {
        scenario.scope.or(self.scope)
    }
}

/// Builder for the [`OpinionPoll`] type.
#[derive(Default)]
pub struct OpinionPollBuilder {
    polling_firm: Option<String>,
    fieldwork_end: Option<PollDate>,
    publication_date: Option<PollDate>,
    effective_sample_size: Option<u64>,
    scope: Option<Scope>,
    main_scenario: ResponseScenario,
    alternative_scenarios: Vec<ResponseScenario>,
}

impl OpinionPollBuilder {
    /// Build the [`OpinionPoll`] object.
    ///
    /// Panics if the polling firm is missing, or if neither the fieldwork end
    /// nor the publication date is set.
    pub fn build(self) -> OpinionPoll {
        let polling_firm = self.polling_firm.expect("Poll without a polling firm");
        assert!(
            self.fieldwork_end.is_some() || self.publication_date.is_some(),
            "Poll by {polling_firm} without an end date"
        );
        OpinionPoll {
            polling_firm,
            fieldwork_end: self.fieldwork_end,
            publication_date: self.publication_date,
            effective_sample_size: self.effective_sample_size,
            scope: self.scope,
            main_scenario: self.main_scenario,
            alternative_scenarios: self.alternative_scenarios,
        }
    }

    /// Sets the name of the polling firm.
    pub fn polling_firm(mut self, polling_firm: &str) -> Self {
        self.polling_firm = Some(polling_firm.to_owned());
        self
    }

    /// Sets the last day of fieldwork.
    pub fn fieldwork_end(mut self, date: PollDate) -> Self {
        self.fieldwork_end = Some(date);
        self
    }

    /// Sets the day of publication.
    pub fn publication_date(mut self, date: PollDate) -> Self {
        self.publication_date = Some(date);
        self
    }

    /// Sets the number of respondents that the percentages refer to.
    pub fn effective_sample_size(mut self, effective_sample_size: u64) -> Self {
        self.effective_sample_size = Some(effective_sample_size);
        self
    }

    /// Sets the kind of election.
    pub fn scope(mut self, scope: Scope) -> Self {
        self.scope = Some(scope);
        self
    }

    /// Sets the main results.
    pub fn main_scenario(mut self, scenario: ResponseScenario) -> Self {
        self.main_scenario = scenario;
        self
    }

    /// Adds results for another set of answer options.
    pub fn alternative_scenario(mut self, scenario: ResponseScenario) -> Self {
        self.alternative_scenarios.push(scenario);
        self
    }
}
