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

//! Estimation of vote shares and first-round winners from opinion polls.
//!
//! Each poll result is treated as an observation drawn without replacement
//! from a finite population of voters, which yields a hypergeometric
//! distribution of the true vote share. These distributions are binned into
//! ranges to keep them tractable, cached and upgraded on demand, and combined
//! by simulation to estimate which candidates advance to the second round of
//! a presidential election.

#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod analysis;
pub mod arithmetic;
pub mod cache;
pub mod combinatorics;
pub mod engine;
pub mod hypergeometric;
pub mod multivariate;
pub mod pmf;
pub mod poll;
pub mod range;
pub mod sampled;
pub mod store;
mod util;
