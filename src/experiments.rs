// Copyright (c) The Diem Core Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]

use anyhow::{bail, Error, Result};
use serde::Serialize;
use std::{collections::BTreeMap, fmt, str::FromStr};

/// The five transaction-routing configurations the sweep can exercise,
/// selected by index on the command line. Each one pins all five routing
/// flags of the external engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentVariant {
    /// #0 - every transaction forced single-partition, DB2-style redirects
    /// pick up the mispredicted ones.
    SinglePartition,
    /// #1 - NewOrder inspection decides multi-partition vs not, nothing else.
    NewOrderInspect,
    /// #2 - NewOrder inspection also picks partitions and marks them done.
    NewOrderInspectDone,
    /// #3 - everything runs multi-partition, the worst case.
    MultiPartition,
    /// #4 - speculative execution driven by Markov models.
    MarkovSpeculative,
}

pub const ALL_VARIANTS: &[ExperimentVariant] = &[
    ExperimentVariant::SinglePartition,
    ExperimentVariant::NewOrderInspect,
    ExperimentVariant::NewOrderInspectDone,
    ExperimentVariant::MultiPartition,
    ExperimentVariant::MarkovSpeculative,
];

impl ExperimentVariant {
    pub fn index(self) -> usize {
        match self {
            ExperimentVariant::SinglePartition => 0,
            ExperimentVariant::NewOrderInspect => 1,
            ExperimentVariant::NewOrderInspectDone => 2,
            ExperimentVariant::MultiPartition => 3,
            ExperimentVariant::MarkovSpeculative => 4,
        }
    }

    pub fn from_index(index: usize) -> Result<Self> {
        match ALL_VARIANTS.get(index) {
            Some(variant) => Ok(*variant),
            None => bail!(
                "experiment index {} out of range, expected 0..={}",
                index,
                ALL_VARIANTS.len() - 1
            ),
        }
    }

    /// The routing flag settings this variant overlays onto the engine
    /// option map.
    pub fn routing_overrides(self) -> OptionMap {
        let (single, inspect, inspect_done, redirects, speculative) = match self {
            ExperimentVariant::SinglePartition => (true, false, false, true, false),
            ExperimentVariant::NewOrderInspect => (false, true, false, false, false),
            ExperimentVariant::NewOrderInspectDone => (false, true, true, false, false),
            ExperimentVariant::MultiPartition => (false, false, false, false, false),
            ExperimentVariant::MarkovSpeculative => (false, false, false, false, true),
        };
        let mut opts = OptionMap::default();
        opts.set("node.force_singlepartition", single);
        opts.set("node.force_neworderinspect", inspect);
        opts.set("node.force_neworderinspect_done", inspect_done);
        opts.set("node.enable_db2_redirects", redirects);
        opts.set("node.enable_speculative_execution", speculative);
        opts
    }

    /// Whether this variant needs a pre-trained Markov model file before any
    /// trial can start.
    pub fn requires_markov_model(self) -> bool {
        matches!(self, ExperimentVariant::MarkovSpeculative)
    }
}

impl FromStr for ExperimentVariant {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let index: usize = s
            .parse()
            .map_err(|_| Error::msg(format!("invalid experiment index `{}`", s)))?;
        Self::from_index(index)
    }
}

impl fmt::Display for ExperimentVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ExperimentVariant::SinglePartition => "single-partition",
            ExperimentVariant::NewOrderInspect => "neworder-inspect",
            ExperimentVariant::NewOrderInspectDone => "neworder-inspect-done",
            ExperimentVariant::MultiPartition => "multi-partition",
            ExperimentVariant::MarkovSpeculative => "markov-speculative",
        };
        write!(f, "#{} {}", self.index(), name)
    }
}

/// An ordered option map rendered into `-D<key>=<value>` build-tool flags.
/// Keys are kept sorted so rendered commands are deterministic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OptionMap {
    opts: BTreeMap<String, String>,
}

impl OptionMap {
    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.opts.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.opts.get(key).map(String::as_str)
    }

    /// Merges `other` over this map; `other` wins on key collision.
    pub fn overlay(&mut self, other: &OptionMap) {
        for (key, value) in &other.opts {
            self.opts.insert(key.clone(), value.clone());
        }
    }

    /// Renders `-D<prefix><key>=<value>` flags joined by single spaces.
    pub fn render(&self, prefix: &str) -> String {
        self.opts
            .iter()
            .map(|(key, value)| format!("-D{}{}={}", prefix, key, value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_round_trips_through_index() {
        for &variant in ALL_VARIANTS {
            assert_eq!(
                ExperimentVariant::from_index(variant.index()).unwrap(),
                variant
            );
        }
        assert!(ExperimentVariant::from_index(5).is_err());
        assert!("4".parse::<ExperimentVariant>().is_ok());
        assert!("banana".parse::<ExperimentVariant>().is_err());
    }

    #[test]
    fn test_every_variant_pins_all_routing_flags() {
        for &variant in ALL_VARIANTS {
            let opts = variant.routing_overrides();
            for key in &[
                "node.force_singlepartition",
                "node.force_neworderinspect",
                "node.force_neworderinspect_done",
                "node.enable_db2_redirects",
                "node.enable_speculative_execution",
            ] {
                assert!(opts.get(key).is_some(), "{} missing {}", variant, key);
            }
        }
    }

    #[test]
    fn test_baseline_and_markov_variants() {
        let baseline = ExperimentVariant::SinglePartition.routing_overrides();
        assert_eq!(baseline.get("node.force_singlepartition"), Some("true"));
        assert_eq!(baseline.get("node.enable_db2_redirects"), Some("true"));
        assert_eq!(
            baseline.get("node.enable_speculative_execution"),
            Some("false")
        );

        let markov = ExperimentVariant::MarkovSpeculative.routing_overrides();
        assert_eq!(markov.get("node.force_singlepartition"), Some("false"));
        assert_eq!(
            markov.get("node.enable_speculative_execution"),
            Some("true")
        );
        assert!(ExperimentVariant::MarkovSpeculative.requires_markov_model());
        assert!(!ExperimentVariant::MultiPartition.requires_markov_model());
    }

    #[test]
    fn test_overlay_wins_on_collision() {
        let mut base = OptionMap::default();
        base.set("client.txnrate", 500);
        base.set("client.duration", 120000);
        let mut over = OptionMap::default();
        over.set("client.txnrate", 250);
        base.overlay(&over);
        assert_eq!(base.get("client.txnrate"), Some("250"));
        assert_eq!(base.get("client.duration"), Some("120000"));
    }

    #[test]
    fn test_render_is_sorted_and_prefixed() {
        let mut opts = OptionMap::default();
        opts.set("b.two", 2);
        opts.set("a.one", true);
        assert_eq!(opts.render("hstore."), "-Dhstore.a.one=true -Dhstore.b.two=2");
        assert_eq!(opts.render(""), "-Da.one=true -Db.two=2");
    }
}
