// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use anyhow::Result;
use markov_bench::{
    cluster::{Cluster, NodePool},
    experiments::ExperimentVariant,
    runner::{BenchmarkRunner, RunnerConfig},
};
use slog::{o, Drain};
use slog_scope::info;
use std::{env, path::PathBuf, process};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "markov-bench", about = "Distributed benchmark trial driver")]
struct Args {
    /// Benchmark project to build and run
    #[structopt(long, default_value = "tpcc")]
    benchmark: String,
    /// Experiment variant index (0..=4)
    #[structopt(long, default_value = "0")]
    experiment: ExperimentVariant,
    /// Partition counts to sweep
    #[structopt(long, use_delimiter = true, default_value = "4,8,16,32,64")]
    partitions: Vec<u32>,
    /// Trials per partition count
    #[structopt(long, default_value = "3")]
    trials: u32,
    /// Loader threads for the data generator
    #[structopt(long, default_value = "8")]
    load_threads: u32,
    /// Benchmark scale factor
    #[structopt(long, default_value = "10")]
    scale_factor: u32,
    /// Dump a workload trace per trial
    #[structopt(long)]
    trace: bool,
    /// Directory cluster descriptor files are written to
    #[structopt(long, default_value = "/tmp", parse(from_os_str))]
    work_dir: PathBuf,
    /// Write the suite report as JSON to this path
    #[structopt(long, parse(from_os_str))]
    report_json: Option<PathBuf>,
    /// Print commands instead of executing them
    #[structopt(long)]
    dry_run: bool,
}

fn main() {
    let _logger_guard = setup_log();
    let args = Args::from_args();
    if let Err(e) = run(&args) {
        // Straight to stderr: the async drain may never flush before exit.
        eprintln!("{}", fatal_message(&e));
        process::exit(1);
    }
}

fn fatal_message(e: &anyhow::Error) -> String {
    format!("markov-bench failed: {:#}", e)
}

fn run(args: &Args) -> Result<()> {
    let cluster = Cluster::new(NodePool::default());
    let runner = BenchmarkRunner::new(
        cluster,
        RunnerConfig {
            benchmark: args.benchmark.clone(),
            variant: args.experiment,
            partition_counts: args.partitions.clone(),
            trials: args.trials,
            load_threads: args.load_threads,
            scale_factor: args.scale_factor,
            trace: args.trace,
            work_dir: args.work_dir.clone(),
            dry_run: args.dry_run,
        },
    );
    let report = runner.run()?;
    print!("{}", report);
    if let Some(path) = &args.report_json {
        report.save_json(path)?;
        info!("Wrote report to '{}'", path.display());
    }
    Ok(())
}

fn setup_log() -> slog_scope::GlobalLoggerGuard {
    if env::var("RUST_LOG").is_err() {
        env::set_var("RUST_LOG", "info");
    }
    let decorator = slog_term::PlainDecorator::new(std::io::stdout());
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain);
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!());
    slog_scope::set_global_logger(logger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_fatal_message_keeps_the_cause_chain() {
        let err = anyhow::anyhow!("exit code 1")
            .context("`ant hstore-jar` failed")
            .context("sweep aborted");
        let msg = fatal_message(&err);
        assert_eq!(
            msg,
            "markov-bench failed: sweep aborted: `ant hstore-jar` failed: exit code 1"
        );
    }
}
