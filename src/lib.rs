// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

pub mod cluster;
pub mod effects;
pub mod experiments;
pub mod instance;
pub mod report;
pub mod runner;

pub mod util {
    use anyhow::{ensure, Result};
    use std::process::Command;

    /// Runs a shell command and returns its combined stdout/stderr.
    /// Fails if the command exits non-zero, carrying the output in the error.
    pub fn run_cmd(cmd: &str) -> Result<String> {
        let (status_ok, code, output) = run_cmd_unchecked(cmd)?;
        ensure!(
            status_ok,
            "`{}` failed with code {}:\n{}",
            cmd,
            code,
            output
        );
        Ok(output)
    }

    /// Runs a shell command and returns (success, exit code, combined output)
    /// without treating a non-zero exit as an error. Trial commands are piped
    /// through `tee`, so callers scrape output regardless of status.
    pub fn run_cmd_unchecked(cmd: &str) -> Result<(bool, i32, String)> {
        // The redirect has to wrap the whole pipeline, not just its last
        // stage, so stderr from every stage ends up in the scraped text.
        let shell = format!("{{ {} ; }} 2>&1", cmd);
        let output = Command::new("bash").arg("-c").arg(shell).output()?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        Ok((
            output.status.success(),
            output.status.code().unwrap_or(-1),
            text,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::util::{run_cmd, run_cmd_unchecked};

    #[test]
    fn test_run_cmd_captures_output() {
        let out = run_cmd("printf 'a\\nb\\n'").unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_run_cmd_propagates_failure() {
        let err = run_cmd("printf oops; exit 3").unwrap_err();
        let msg = format!("{}", err);
        assert!(msg.contains("code 3"), "unexpected error: {}", msg);
        assert!(msg.contains("oops"), "unexpected error: {}", msg);
    }

    #[test]
    fn test_run_cmd_unchecked_reports_status() {
        let (ok, code, out) = run_cmd_unchecked("printf partial; exit 1").unwrap();
        assert!(!ok);
        assert_eq!(code, 1);
        assert_eq!(out, "partial");
    }

    #[test]
    fn test_run_cmd_unchecked_captures_stderr_across_pipeline_stages() {
        // Benchmark figures sometimes land on stderr upstream of the tee
        // stage; the capture must see them anyway.
        let (ok, _, out) = run_cmd_unchecked(
            "printf 'Transactions per second: 10.00\\n' 1>&2; printf body | tee /dev/null",
        )
        .unwrap();
        assert!(ok);
        assert!(out.contains("Transactions per second: 10.00"), "got: {}", out);
        assert!(out.contains("body"), "got: {}", out);
    }
}
