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

//! Integer intervals used to bin the population axis.

use std::fmt::{self, Display};

/// Inclusive integer interval `[lower_bound, upper_bound]`.
///
/// Ranges are plain values: two ranges with the same bounds are equal and
/// hash identically. They are ordered by lower bound first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    lower_bound: u64,
    upper_bound: u64,
}

impl Range {
    /// Creates the range `[lower_bound, upper_bound]`.
    pub fn new(lower_bound: u64, upper_bound: u64) -> Self {
        assert!(
            lower_bound <= upper_bound,
            "Invalid range [{lower_bound}, {upper_bound}]"
        );
        Range {
            lower_bound,
            upper_bound,
        }
    }

    /// Smallest value in this range.
    pub fn lower_bound(&self) -> u64 {
        self.lower_bound
    }

    /// Largest value in this range.
    pub fn upper_bound(&self) -> u64 {
        self.upper_bound
    }

    /// Middle of the range, rounded down.
    pub fn midpoint(&self) -> u64 {
        self.lower_bound + (self.upper_bound - self.lower_bound) / 2
    }

    /// Number of values in this range.
    pub fn length(&self) -> u64 {
        self.upper_bound - self.lower_bound + 1
    }

    /// Whether the given value belongs to this range.
    pub fn contains(&self, value: u64) -> bool {
        self.lower_bound <= value && value <= self.upper_bound
    }

    /// Splits `[0, population_size]` into `number_of_samples` contiguous
    /// ranges. The leading ranges have length `population_size /
    /// number_of_samples`, and the trailing ranges are one unit longer to
    /// absorb the remainder.
    ///
    /// The number of ranges is capped at `population_size + 1`, in which case
    /// every value gets its own range.
    pub fn tile(population_size: u64, number_of_samples: u64) -> Vec<Range> {
        assert!(number_of_samples > 0, "Cannot tile with zero ranges");
        let count = number_of_samples.min(population_size + 1);
        let base_length = population_size / count;
        let num_longer = population_size + 1 - base_length * count;
        let num_shorter = count - num_longer;

        let mut ranges = Vec::with_capacity(count as usize);
        let mut start = 0;
        for i in 0..count {
            let length = if i < num_shorter {
                base_length
            } else {
                base_length + 1
            };
            ranges.push(Range::new(start, start + length - 1));
            start += length;
        }
        debug_assert_eq!(start, population_size + 1);
        ranges
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower_bound, self.upper_bound)
    }
}
