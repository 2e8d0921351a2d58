// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use anyhow::{ensure, Result};
use std::{
    fmt,
    process::{Command, Stdio},
};

/// One remote host taking part in a benchmark run, either as a site host or
/// as a load-generator host.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Instance {
    host: String,
}

impl Instance {
    pub fn new(host: String) -> Instance {
        Instance { host }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Runs a command on this host over ssh, streaming stderr through.
    pub fn run_cmd(&self, cmd: &str) -> Result<()> {
        let mut ssh_cmd = Command::new("timeout");
        ssh_cmd
            .arg("60")
            .args(&[
                "ssh",
                "-oStrictHostKeyChecking=no",
                "-oConnectTimeout=3",
                "-oConnectionAttempts=10",
                self.host.as_str(),
            ])
            .arg(cmd)
            .stdout(Stdio::null());
        let status = ssh_cmd.status()?;
        ensure!(
            status.success(),
            "ssh to {} failed with code {}",
            self.host,
            status.code().unwrap_or(-1)
        );
        Ok(())
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.host)
    }
}
