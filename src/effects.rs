// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::instance::Instance;
use anyhow::Result;
use std::{fmt, fmt::Display, sync::mpsc};
use threadpool::ThreadPool;

/// A one-shot remote action against a single host.
pub trait Action: Display + Send + 'static {
    fn apply(&self) -> Result<()>;
}

/// Kills every process with the given name on one host. Applied to all hosts
/// of a trial after each run so nothing survives into the next one.
pub struct KillProcesses {
    instance: Instance,
    process: String,
}

impl KillProcesses {
    pub fn new(instance: Instance, process: &str) -> Self {
        Self {
            instance,
            process: process.to_string(),
        }
    }
}

impl Action for KillProcesses {
    fn apply(&self) -> Result<()> {
        // pkill exits 1 when nothing matched, which is fine here.
        self.instance
            .run_cmd(&format!("pkill -9 {} || true", self.process))
    }
}

impl fmt::Display for KillProcesses {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "kill {} on {}", self.process, self.instance)
    }
}

/// Applies actions in parallel on the pool and waits for all of them.
/// Results do not preserve input order; each carries the action's display
/// name for logging.
pub fn apply_all(pool: &ThreadPool, actions: Vec<Box<dyn Action>>) -> Vec<(String, Result<()>)> {
    let (sender, receiver) = mpsc::channel();
    let count = actions.len();
    for action in actions {
        let sender = sender.clone();
        pool.execute(move || {
            let name = action.to_string();
            let result = action.apply();
            let _ = sender.send((name, result));
        });
    }
    // Only the workers hold senders now; a worker that panics drops its
    // sender without sending, so the loop below ends instead of blocking.
    drop(sender);
    let mut results = Vec::with_capacity(count);
    while let Ok(result) = receiver.recv() {
        results.push(result);
    }
    if results.len() != count {
        panic!(
            "{} action workers terminated before sending a result",
            count - results.len()
        );
    }
    results
}
