// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::experiments::ExperimentVariant;
use anyhow::Result;
use serde::Serialize;
use std::{collections::BTreeMap, fmt, fs::File, path::Path};

/// Where a trial's throughput figure came from, if anywhere. A run that
/// finishes cleanly prints a final transactions-per-second line; a truncated
/// run only leaves periodic progress lines; some leave nothing usable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "source", content = "txns_per_sec", rename_all = "snake_case")]
pub enum Throughput {
    Measured(f64),
    Partial(f64),
    Unknown,
}

impl Throughput {
    pub fn rate(&self) -> Option<f64> {
        match self {
            Throughput::Measured(rate) | Throughput::Partial(rate) => Some(*rate),
            Throughput::Unknown => None,
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Throughput::Measured(rate) => write!(f, "{:.2} txn/s", rate),
            Throughput::Partial(rate) => write!(f, "{:.2} txn/s (partial run)", rate),
            Throughput::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct TrialResult {
    pub partitions: u32,
    pub trial: u32,
    #[serde(flatten)]
    pub throughput: Throughput,
}

/// All trial results of one sweep, in execution order.
#[derive(Debug, Serialize)]
pub struct SuiteReport {
    pub benchmark: String,
    pub experiment: ExperimentVariant,
    pub results: Vec<TrialResult>,
}

impl SuiteReport {
    pub fn new(benchmark: String, experiment: ExperimentVariant) -> Self {
        Self {
            benchmark,
            experiment,
            results: vec![],
        }
    }

    pub fn record(&mut self, partitions: u32, trial: u32, throughput: Throughput) {
        self.results.push(TrialResult {
            partitions,
            trial,
            throughput,
        });
    }

    /// Average over trials that produced a rate, per partition count.
    pub fn average_rates(&self) -> BTreeMap<u32, f64> {
        let mut sums: BTreeMap<u32, (f64, u32)> = BTreeMap::new();
        for result in &self.results {
            if let Some(rate) = result.throughput.rate() {
                let entry = sums.entry(result.partitions).or_insert((0.0, 0));
                entry.0 += rate;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(partitions, (sum, count))| (partitions, sum / f64::from(count)))
            .collect()
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(
            f,
            "{} experiment {}",
            self.benchmark.to_uppercase(),
            self.experiment
        )?;
        let averages = self.average_rates();
        for result in &self.results {
            writeln!(
                f,
                "  {}p trial #{}: {}",
                result.partitions, result.trial, result.throughput
            )?;
        }
        for (partitions, avg) in averages {
            writeln!(f, "  {}p average: {:.2} txn/s", partitions, avg)?;
        }
        Ok(())
    }
}
