// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use crate::instance::Instance;
use anyhow::{bail, ensure, Result};
use std::{
    collections::HashSet,
    fs::File,
    io::Write,
    path::Path,
};

pub const DEFAULT_HOST_FORMAT: &str = "d-{}.cs.wisc.edu";
pub const DEFAULT_NODE_MAX: u32 = 199;
pub const DEFAULT_NODES_TO_SKIP: &[u32] = &[20, 21, 45, 77, 101, 114];
pub const COORDINATOR_NODE: u32 = 1;

pub const SITES_PER_HOST: u32 = 1;
pub const PARTITIONS_PER_SITE: u32 = 2;

/// The pool of physical nodes experiments may draw hosts from. Node ids map
/// to hostnames through a format string with a `{}` placeholder; ids on the
/// skip list are never eligible. The coordinator node is reserved and site
/// allocation starts right after it.
#[derive(Clone, Debug)]
pub struct NodePool {
    host_format: String,
    node_max: u32,
    skip: HashSet<u32>,
}

impl Default for NodePool {
    fn default() -> Self {
        Self::new(
            DEFAULT_HOST_FORMAT.to_string(),
            DEFAULT_NODE_MAX,
            DEFAULT_NODES_TO_SKIP.iter().copied().collect(),
        )
    }
}

impl NodePool {
    pub fn new(host_format: String, node_max: u32, skip: HashSet<u32>) -> Self {
        Self {
            host_format,
            node_max,
            skip,
        }
    }

    /// Hostname for a node id, zero-padded to two digits like the physical
    /// cluster names its machines.
    pub fn host_name(&self, node_id: u32) -> String {
        self.host_format
            .replacen("{}", &format!("{:02}", node_id), 1)
    }

    pub fn coordinator(&self) -> Instance {
        Instance::new(self.host_name(COORDINATOR_NODE))
    }

    /// Node ids eligible for sites and clients, in allocation order.
    fn eligible_ids(&self) -> impl Iterator<Item = u32> + '_ {
        (COORDINATOR_NODE + 1..self.node_max).filter(move |id| !self.skip.contains(id))
    }
}

/// One line of the cluster descriptor: a partition pinned to a site on a host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TopologyEntry {
    pub host: String,
    pub site_id: u32,
    pub partition_id: u32,
}

/// Site/partition placement for one partition count, plus the client hosts
/// that generate load against it.
#[derive(Clone, Debug)]
pub struct Allocation {
    pub entries: Vec<TopologyEntry>,
    pub clients: Vec<Instance>,
    num_hosts: u32,
    num_sites: u32,
}

impl Allocation {
    pub fn num_hosts(&self) -> u32 {
        self.num_hosts
    }

    pub fn num_sites(&self) -> u32 {
        self.num_sites
    }

    pub fn num_partitions(&self) -> u32 {
        self.entries.len() as u32
    }

    /// Site hosts, deduplicated, in placement order.
    pub fn site_hosts(&self) -> Vec<Instance> {
        let mut seen = HashSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(e.host.clone()))
            .map(|e| Instance::new(e.host.clone()))
            .collect()
    }

    /// All hosts a trial touches: site hosts then client hosts.
    pub fn all_hosts(&self) -> Vec<Instance> {
        let mut hosts = self.site_hosts();
        hosts.extend(self.clients.iter().cloned());
        hosts
    }

    /// Renders the cluster descriptor, one `host:site_id:partition_id` line
    /// per partition.
    pub fn render_cluster_file(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&format!(
                "{}:{}:{}\n",
                entry.host, entry.site_id, entry.partition_id
            ));
        }
        out
    }

    pub fn write_cluster_file(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(self.render_cluster_file().as_bytes())?;
        Ok(())
    }
}

/// Assigns hosts to sites and partitions for a partition sweep. Placement is
/// round-robin over the eligible node list with a fixed number of sites per
/// host and partitions per site, matching what the deploy tool expects.
#[derive(Clone, Debug)]
pub struct Cluster {
    pool: NodePool,
}

impl Cluster {
    pub fn new(pool: NodePool) -> Self {
        Self { pool }
    }

    pub fn coordinator(&self) -> Instance {
        self.pool.coordinator()
    }

    /// Builds the placement for `num_partitions` partitions and picks the
    /// next `num_partitions / 2` eligible nodes as client hosts.
    pub fn allocate(&self, num_partitions: u32) -> Result<Allocation> {
        ensure!(
            num_partitions >= PARTITIONS_PER_SITE
                && num_partitions % PARTITIONS_PER_SITE == 0,
            "partition count {} is not a multiple of {} partitions per site",
            num_partitions,
            PARTITIONS_PER_SITE
        );
        let num_sites = num_partitions / PARTITIONS_PER_SITE;
        ensure!(
            num_sites % SITES_PER_HOST == 0,
            "site count {} is not a multiple of {} sites per host",
            num_sites,
            SITES_PER_HOST
        );
        let num_hosts = num_sites / SITES_PER_HOST;

        let mut ids = self.pool.eligible_ids();
        let mut entries = Vec::with_capacity(num_partitions as usize);
        let mut site_id = 0;
        let mut partition_id = 0;
        for _ in 0..num_hosts {
            let node_id = match ids.next() {
                Some(id) => id,
                None => bail!(
                    "node pool exhausted: {} hosts needed for {} partitions",
                    num_hosts,
                    num_partitions
                ),
            };
            let host = self.pool.host_name(node_id);
            for _ in 0..SITES_PER_HOST {
                for _ in 0..PARTITIONS_PER_SITE {
                    entries.push(TopologyEntry {
                        host: host.clone(),
                        site_id,
                        partition_id,
                    });
                    partition_id += 1;
                }
                site_id += 1;
            }
        }

        let client_count = (num_partitions / 2) as usize;
        let mut clients = Vec::with_capacity(client_count);
        while clients.len() < client_count {
            let node_id = match ids.next() {
                Some(id) => id,
                None => bail!(
                    "node pool exhausted: {} client hosts needed after {} site hosts",
                    client_count,
                    num_hosts
                ),
            };
            clients.push(Instance::new(self.pool.host_name(node_id)));
        }

        Ok(Allocation {
            entries,
            clients,
            num_hosts,
            num_sites,
        })
    }
}
