// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::{
    cluster::{Allocation, Cluster},
    effects::{self, Action, KillProcesses},
    experiments::{ExperimentVariant, OptionMap},
    report::{SuiteReport, Throughput},
    util,
};
use anyhow::{ensure, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use slog_scope::{debug, info, warn};
use std::path::{Path, PathBuf};
use threadpool::ThreadPool;

const COORDINATOR_DELAY: u32 = 10;
const CLIENT_DURATION_MS: u32 = 120_000;
const CLIENT_WARMUP_MS: u32 = 60_000;
const CLIENT_PROCESSES_PER_NODE: u32 = 4;
const KILL_PROCESS: &str = "java";
const SSH_POOL_SIZE: usize = 10;

static FULL_RUN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Transactions per second: ([\d]+\.[\d]+)").expect("failed to build regex")
});
static PARTIAL_RUN_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Completed [\d]+ txns at a rate of ([\d]+\.[\d]+) txns/s")
        .expect("failed to build regex")
});

/// Extracts a throughput figure from benchmark console output. A clean run
/// prints one final transactions-per-second line; otherwise the last periodic
/// progress line wins; otherwise the figure is unknown.
pub fn scrape_throughput(output: &str) -> Throughput {
    if let Some(cap) = FULL_RUN_REGEX.captures(output) {
        if let Ok(rate) = cap[1].parse() {
            return Throughput::Measured(rate);
        }
    }
    for line in output.lines().rev() {
        if let Some(cap) = PARTIAL_RUN_REGEX.captures(line) {
            if let Ok(rate) = cap[1].parse() {
                return Throughput::Partial(rate);
            }
        }
    }
    Throughput::Unknown
}

/// Client submission rate backs off at higher partition counts, where the
/// same offered load would saturate the coordinator.
pub fn txn_rate_for(partitions: u32) -> u32 {
    match partitions {
        32 => 250,
        64 => 200,
        _ => 500,
    }
}

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub benchmark: String,
    pub variant: ExperimentVariant,
    pub partition_counts: Vec<u32>,
    pub trials: u32,
    pub load_threads: u32,
    pub scale_factor: u32,
    pub trace: bool,
    pub work_dir: PathBuf,
    pub dry_run: bool,
}

/// Drives the partition sweep: per partition count it renders the cluster
/// file, re-initializes the project jar against it, runs the configured
/// number of trials, and kills leftover remote processes after every trial.
pub struct BenchmarkRunner {
    cluster: Cluster,
    config: RunnerConfig,
    ssh_pool: ThreadPool,
}

impl BenchmarkRunner {
    pub fn new(cluster: Cluster, config: RunnerConfig) -> Self {
        let ssh_pool = threadpool::Builder::new()
            .num_threads(SSH_POOL_SIZE)
            .thread_name("ssh-pool".to_string())
            .build();
        Self {
            cluster,
            config,
            ssh_pool,
        }
    }

    pub fn run(&self) -> Result<SuiteReport> {
        let mut report = SuiteReport::new(self.config.benchmark.clone(), self.config.variant);
        self.ensure_project_jar()?;
        for &partitions in &self.config.partition_counts {
            self.run_partition_count(partitions, &mut report)?;
        }
        Ok(report)
    }

    fn run_partition_count(&self, partitions: u32, report: &mut SuiteReport) -> Result<()> {
        let alloc = self.cluster.allocate(partitions)?;
        let cluster_file = self.cluster_file_path(partitions);
        alloc.write_cluster_file(&cluster_file)?;
        info!("Wrote cluster configuration to '{}'", cluster_file.display());

        let base = self.base_options(&cluster_file);
        self.execute_checked(&self.jar_init_command(&base))?;
        info!(
            "Initialized {} project jar [hosts={}, sites={}, partitions={}]",
            self.config.benchmark.to_uppercase(),
            alloc.num_hosts(),
            alloc.num_sites(),
            partitions
        );

        let markov = self.markov_model(partitions)?;
        let flags = self.assemble_flags(&base, &alloc, partitions, markov.as_deref());

        info!(
            "{} experiment {} - {} partitions",
            self.config.benchmark.to_uppercase(),
            self.config.variant,
            partitions
        );
        for trial in 0..self.config.trials {
            let cmd = self.trial_command(&flags, partitions, trial);
            if trial == 0 {
                debug!("{}", cmd);
            }
            let throughput = self.run_trial(&cmd)?;
            info!("Trial #{}: {}", trial, throughput);
            report.record(partitions, trial, throughput);
            self.cleanup(&alloc);
        }
        Ok(())
    }

    /// Builds the project jar once up front if it is not already present.
    fn ensure_project_jar(&self) -> Result<()> {
        let jar = format!("{}.jar", self.config.benchmark);
        if Path::new(&jar).exists() {
            return Ok(());
        }
        info!(
            "Building {} project jar",
            self.config.benchmark.to_uppercase()
        );
        self.execute_checked(&format!(
            "ant compile hstore-prepare -Dproject={}",
            self.config.benchmark
        ))
    }

    fn cluster_file_path(&self, partitions: u32) -> PathBuf {
        self.config
            .work_dir
            .join(format!("{}-{}p.cluster", self.config.benchmark, partitions))
    }

    fn base_options(&self, cluster_file: &Path) -> OptionMap {
        let mut opts = OptionMap::default();
        opts.set("project", &self.config.benchmark);
        opts.set("cluster", cluster_file.display());
        opts
    }

    fn engine_options(&self, alloc: &Allocation, partitions: u32) -> OptionMap {
        let client_hosts = alloc
            .clients
            .iter()
            .map(|c| c.host())
            .collect::<Vec<_>>()
            .join(",");
        let mut opts = OptionMap::default();
        opts.set("coordinator.host", self.cluster.coordinator().host());
        opts.set("coordinator.delay", COORDINATOR_DELAY);
        opts.set("client.duration", CLIENT_DURATION_MS);
        opts.set("client.warmup", CLIENT_WARMUP_MS);
        opts.set("client.host", client_hosts);
        opts.set("client.count", alloc.clients.len());
        opts.set("client.processesperclient", CLIENT_PROCESSES_PER_NODE);
        opts.set("client.txnrate", txn_rate_for(partitions));
        opts.set("client.blocking", false);
        opts.set("client.scalefactor", self.config.scale_factor);
        opts
    }

    fn benchmark_options(&self, partitions: u32) -> OptionMap {
        let mut opts = OptionMap::default();
        opts.set("benchmark.neworder_only", true);
        opts.set("benchmark.neworder_abort", true);
        opts.set("benchmark.neworder_multip", true);
        opts.set("benchmark.warehouses", partitions);
        opts.set("benchmark.loadthreads", self.config.load_threads);
        opts
    }

    /// Pre-trained model file for the speculative-execution variant; a
    /// missing model is fatal before any trial starts.
    fn markov_model(&self, partitions: u32) -> Result<Option<PathBuf>> {
        if !self.config.variant.requires_markov_model() {
            return Ok(None);
        }
        let path = self.markov_model_path(partitions);
        ensure!(
            self.config.dry_run || path.exists(),
            "missing Markov model file: {}",
            path.display()
        );
        Ok(Some(path))
    }

    fn markov_model_path(&self, partitions: u32) -> PathBuf {
        PathBuf::from(format!(
            "files/markovs/vldb-feb2011/{}.{}p.markovs.gz",
            self.config.benchmark.to_lowercase(),
            partitions
        ))
    }

    fn assemble_flags(
        &self,
        base: &OptionMap,
        alloc: &Allocation,
        partitions: u32,
        markov: Option<&Path>,
    ) -> String {
        let mut engine = self.engine_options(alloc, partitions);
        engine.overlay(&self.config.variant.routing_overrides());
        let mut flags = vec![
            base.render(""),
            engine.render("hstore."),
            self.benchmark_options(partitions).render(""),
        ];
        if let Some(markov) = markov {
            flags.push(format!("-Dmarkov={}", markov.display()));
        }
        flags.join(" ")
    }

    fn jar_init_command(&self, base: &OptionMap) -> String {
        format!("ant hstore-jar {}", base.render(""))
    }

    fn trial_command(&self, flags: &str, partitions: u32, trial: u32) -> String {
        let mut cmd = format!("ant hstore-benchmark {}", flags);
        if self.config.trace {
            cmd.push_str(&format!(
                " -Dtrace=traces/{}-{}p-{}",
                self.config.benchmark.to_lowercase(),
                partitions,
                trial
            ));
        }
        cmd.push_str(" | tee client.log");
        cmd
    }

    /// Runs a setup command whose failure aborts the whole sweep.
    fn execute_checked(&self, cmd: &str) -> Result<()> {
        if self.config.dry_run {
            info!("[dry-run] {}", cmd);
            return Ok(());
        }
        debug!("{}", cmd);
        util::run_cmd(cmd)?;
        Ok(())
    }

    /// Runs one trial. The pipe through `tee` masks the benchmark's exit
    /// status, so the output is scraped regardless; a non-zero exit is only
    /// worth a warning.
    fn run_trial(&self, cmd: &str) -> Result<Throughput> {
        if self.config.dry_run {
            info!("[dry-run] {}", cmd);
            return Ok(Throughput::Unknown);
        }
        let (ok, code, output) = util::run_cmd_unchecked(cmd)?;
        if !ok {
            warn!("benchmark command exited with code {}", code);
        }
        let throughput = scrape_throughput(&output);
        if let Throughput::Partial(_) = throughput {
            warn!("Failed to complete full execution time");
        }
        Ok(throughput)
    }

    /// Kills leftover engine processes on every host the trial touched.
    /// Per-host failures are logged and do not abort the sweep.
    fn cleanup(&self, alloc: &Allocation) {
        let hosts = alloc.all_hosts();
        if self.config.dry_run {
            info!("[dry-run] kill {} on {} hosts", KILL_PROCESS, hosts.len());
            return;
        }
        let actions: Vec<Box<dyn Action>> = hosts
            .into_iter()
            .map(|instance| Box::new(KillProcesses::new(instance, KILL_PROCESS)) as Box<dyn Action>)
            .collect();
        for (name, result) in effects::apply_all(&self.ssh_pool, actions) {
            if let Err(e) = result {
                warn!("{} failed: {}", name, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::NodePool;

    fn test_runner(variant: ExperimentVariant, work_dir: PathBuf, dry_run: bool) -> BenchmarkRunner {
        let pool = NodePool::new(
            "h-{}.test".to_string(),
            20,
            vec![3, 5].into_iter().collect(),
        );
        BenchmarkRunner::new(
            Cluster::new(pool),
            RunnerConfig {
                benchmark: "tpcc".to_string(),
                variant,
                partition_counts: vec![4, 8],
                trials: 2,
                load_threads: 8,
                scale_factor: 10,
                trace: false,
                work_dir,
                dry_run,
            },
        )
    }

    #[test]
    fn test_txn_rate_backs_off_with_partitions() {
        assert_eq!(txn_rate_for(4), 500);
        assert_eq!(txn_rate_for(16), 500);
        assert_eq!(txn_rate_for(32), 250);
        assert_eq!(txn_rate_for(64), 200);
    }

    #[test]
    fn test_scrape_prefers_full_run_figure() {
        let output = "Completed 100 txns at a rate of 50.00 txns/s\n\
                      Transactions per second: 1234.56\n";
        assert_eq!(scrape_throughput(output), Throughput::Measured(1234.56));
    }

    #[test]
    fn test_scrape_takes_last_partial_line() {
        let output = "Completed 100 txns at a rate of 50.00 txns/s\n\
                      some other noise\n\
                      Completed 200 txns at a rate of 75.25 txns/s\n\
                      shutting down\n";
        assert_eq!(scrape_throughput(output), Throughput::Partial(75.25));
    }

    #[test]
    fn test_scrape_without_match_is_unknown() {
        assert_eq!(scrape_throughput("BUILD FAILED\n"), Throughput::Unknown);
        assert_eq!(
            scrape_throughput("Transactions per second: notanumber\n"),
            Throughput::Unknown
        );
    }

    #[test]
    fn test_trial_command_flags() {
        let dir = tempfile::tempdir().unwrap();
        let runner = test_runner(
            ExperimentVariant::SinglePartition,
            dir.path().to_path_buf(),
            true,
        );
        let alloc = runner.cluster.allocate(4).unwrap();
        let base = runner.base_options(&runner.cluster_file_path(4));
        let flags = runner.assemble_flags(&base, &alloc, 4, None);
        let cmd = runner.trial_command(&flags, 4, 0);

        assert!(cmd.starts_with("ant hstore-benchmark "));
        assert!(cmd.ends_with(" | tee client.log"));
        assert!(cmd.contains("-Dproject=tpcc"));
        assert!(cmd.contains(&format!(
            "-Dcluster={}",
            runner.cluster_file_path(4).display()
        )));
        assert!(cmd.contains("-Dhstore.coordinator.host=h-01.test"));
        assert!(cmd.contains("-Dhstore.client.host=h-06.test,h-07.test"));
        assert!(cmd.contains("-Dhstore.client.count=2"));
        assert!(cmd.contains("-Dhstore.client.txnrate=500"));
        assert!(cmd.contains("-Dhstore.node.force_singlepartition=true"));
        assert!(cmd.contains("-Dhstore.node.enable_db2_redirects=true"));
        assert!(cmd.contains("-Dbenchmark.warehouses=4"));
        assert!(cmd.contains("-Dbenchmark.loadthreads=8"));
        assert!(!cmd.contains("-Dtrace="));
        assert!(!cmd.contains("-Dmarkov="));
    }

    #[test]
    fn test_trace_and_markov_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = test_runner(
            ExperimentVariant::MarkovSpeculative,
            dir.path().to_path_buf(),
            true,
        );
        runner.config.trace = true;
        let alloc = runner.cluster.allocate(4).unwrap();
        let base = runner.base_options(&runner.cluster_file_path(4));
        let markov = runner.markov_model(4).unwrap();
        let flags = runner.assemble_flags(&base, &alloc, 4, markov.as_deref());
        let cmd = runner.trial_command(&flags, 4, 1);

        assert!(cmd.contains("-Dmarkov=files/markovs/vldb-feb2011/tpcc.4p.markovs.gz"));
        assert!(cmd.contains("-Dtrace=traces/tpcc-4p-1"));
        assert!(cmd.contains("-Dhstore.node.enable_speculative_execution=true"));
    }

    #[test]
    fn test_markov_model_missing_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = test_runner(
            ExperimentVariant::MarkovSpeculative,
            dir.path().to_path_buf(),
            false,
        );
        // Not a dry run and the model file does not exist.
        assert!(runner.markov_model(4).is_err());
        runner.config.dry_run = true;
        assert!(runner.markov_model(4).unwrap().is_some());
    }

    #[test]
    fn test_dry_run_sweep_writes_cluster_files_and_records_trials() {
        let dir = tempfile::tempdir().unwrap();
        let runner = test_runner(
            ExperimentVariant::MultiPartition,
            dir.path().to_path_buf(),
            true,
        );
        let report = runner.run().unwrap();
        assert!(dir.path().join("tpcc-4p.cluster").exists());
        assert!(dir.path().join("tpcc-8p.cluster").exists());
        // 2 partition counts x 2 trials, all unknown in a dry run.
        assert_eq!(report.results.len(), 4);
        assert!(report
            .results
            .iter()
            .all(|r| r.throughput == Throughput::Unknown));
    }
}
