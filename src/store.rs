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

//! Persistence of sampled distributions across runs.
//!
//! A distribution is serialized as a text file. The header line contains the
//! observed value, the sample size, the population size and the number of
//! ranges. Each following line contains one range and its mass, written as
//! `lower upper mantissa exponent`, where the mass is
//! `mantissa * 10^exponent`.

use crate::arithmetic::Decimal;
use crate::hypergeometric::DistributionKey;
use crate::range::Range;
use crate::sampled::SampledHypergeometricDistribution;
use log::{debug, warn};
use num::BigInt;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Destination of the sampled distributions that get (re)computed.
pub trait DistributionStore: Sync {
    /// Persists the given distribution, replacing any previous one for the
    /// same observation.
    fn write(
        &self,
        key: &DistributionKey,
        distribution: &SampledHypergeometricDistribution,
    ) -> io::Result<()>;

    /// Returns all the distributions persisted so far.
    fn load(&self) -> io::Result<Vec<SampledHypergeometricDistribution>> {
        Ok(Vec::new())
    }
}

/// Store that discards everything.
pub struct NoopStore;

impl DistributionStore for NoopStore {
    fn write(&self, _: &DistributionKey, _: &SampledHypergeometricDistribution) -> io::Result<()> {
        Ok(())
    }
}

/// Store that writes one file per observation into a directory.
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Creates a store backed by the given directory, which is created on the
    /// first write if it doesn't exist.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileStore {
            directory: directory.into(),
        }
    }

    /// Directory containing the persisted distributions.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the file persisting the distribution of the given observation.
    pub fn path(&self, key: &DistributionKey) -> PathBuf {
        self.directory.join(format!(
            "hypergeometric-{}-{}-{}.txt",
            key.value(),
            key.sample_size(),
            key.population_size()
        ))
    }

    /// Reads the persisted distribution of the given observation, if any.
    pub fn read(
        &self,
        key: &DistributionKey,
    ) -> io::Result<Option<SampledHypergeometricDistribution>> {
        let file = match File::open(self.path(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let distribution = read_distribution(BufReader::new(file))?;
        if distribution.key() != key {
            return Err(invalid_data(format!(
                "File for {key} contains the distribution of {}",
                distribution.key()
            )));
        }
        Ok(Some(distribution))
    }
}

impl DistributionStore for FileStore {
    fn write(
        &self,
        key: &DistributionKey,
        distribution: &SampledHypergeometricDistribution,
    ) -> io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.path(key);
        let tmp = path.with_extension(format!("{}.tmp", std::process::id()));
        {
            let mut output = BufWriter::new(File::create(&tmp)?);
            write_distribution(&mut output, distribution)?;
            output.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        debug!("Wrote distribution of {key} to {}", path.display());
        Ok(())
    }

    /// Reads every distribution file of the directory. Files that cannot be
    /// parsed are skipped with a warning.
    fn load(&self) -> io::Result<Vec<SampledHypergeometricDistribution>> {
        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if file_name_regex().is_match(name) {
                    paths.push(entry.path());
                }
            }
        }
        paths.sort();

        let mut distributions = Vec::with_capacity(paths.len());
        for path in paths {
            match read_distribution(BufReader::new(File::open(&path)?)) {
                Ok(distribution) => distributions.push(distribution),
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!("Skipping invalid distribution file {}: {e}", path.display())
                }
                Err(e) => return Err(e),
            }
        }
        debug!(
            "Loaded {} distributions from {}",
            distributions.len(),
            self.directory.display()
        );
        Ok(distributions)
    }
}

/// Serializes a distribution.
pub fn write_distribution(
    output: &mut impl Write,
    distribution: &SampledHypergeometricDistribution,
) -> io::Result<()> {
    let key = distribution.key();
    writeln!(
        output,
        "{} {} {} {}",
        key.value(),
        key.sample_size(),
        key.population_size(),
        distribution.number_of_samples()
    )?;
    for (range, mass) in distribution.probability_mass_function().iter() {
        let (mantissa, exponent) = mass.normalized_parts();
        writeln!(
            output,
            "{} {} {mantissa} {exponent}",
            range.lower_bound(),
            range.upper_bound(),
        )?;
    }
    output.flush()
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn file_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^hypergeometric-[0-9]+-[0-9]+-[0-9]+\.txt$").unwrap())
}

fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+) ([0-9]+) ([0-9]+) ([0-9]+)$").unwrap())
}

fn mass_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9]+) ([0-9]+) ([0-9]+) (-?[0-9]+)$").unwrap())
}

fn parse_number<T: std::str::FromStr>(text: &str, line: &str) -> io::Result<T> {
    text.parse()
        .map_err(|_| invalid_data(format!("Invalid number {text:?} in line {line:?}")))
}

/// Parses a serialized distribution. Malformed input results in an error of
/// kind [`io::ErrorKind::InvalidData`].
pub fn read_distribution(input: impl BufRead) -> io::Result<SampledHypergeometricDistribution> {
    let mut lines = input.lines();

    let header = lines
        .next()
        .ok_or_else(|| invalid_data("Missing header".to_owned()))??;
    let captures = header_regex()
        .captures(&header)
        .ok_or_else(|| invalid_data(format!("Invalid header {header:?}")))?;
    let value: u64 = parse_number(&captures[1], &header)?;
    let sample_size: u64 = parse_number(&captures[2], &header)?;
    let population_size: u64 = parse_number(&captures[3], &header)?;
    let count: usize = parse_number(&captures[4], &header)?;
    if value > sample_size || sample_size > population_size {
        return Err(invalid_data(format!("Invalid observation in header {header:?}")));
    }
    let key = DistributionKey::new(value, sample_size, population_size);

    let mut masses = Vec::with_capacity(count.min(1 << 20));
    for line in lines {
        let line = line?;
        let captures = mass_regex()
            .captures(&line)
            .ok_or_else(|| invalid_data(format!("Invalid line {line:?}")))?;
        let lower: u64 = parse_number(&captures[1], &line)?;
        let upper: u64 = parse_number(&captures[2], &line)?;
        let mantissa: BigInt = parse_number(&captures[3], &line)?;
        let exponent: i64 = parse_number(&captures[4], &line)?;
        if lower > upper {
            return Err(invalid_data(format!("Invalid range in line {line:?}")));
        }
        masses.push((Range::new(lower, upper), Decimal::new(mantissa, exponent)));
    }
    if masses.len() != count {
        return Err(invalid_data(format!(
            "Expected {count} ranges for {key}, found {}",
            masses.len()
        )));
    }

    SampledHypergeometricDistribution::from_masses(key, masses)
        .ok_or_else(|| invalid_data(format!("Ranges don't tile the population of {key}")))
}

/// Store keeping the written distributions in memory.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryStore {
    /// Distributions written so far, in order.
    pub written: std::sync::Mutex<Vec<SampledHypergeometricDistribution>>,
}

#[cfg(test)]
impl DistributionStore for MemoryStore {
    fn write(
        &self,
        _: &DistributionKey,
        distribution: &SampledHypergeometricDistribution,
    ) -> io::Result<()> {
        self.written.lock().unwrap().push(distribution.clone());
        Ok(())
    }

    fn load(&self) -> io::Result<Vec<SampledHypergeometricDistribution>> {
        Ok(self.written.lock().unwrap().clone())
    }
}
