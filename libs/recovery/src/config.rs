//! Scenario configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! describes the canonical four-validator scenario.
use crate::{
    controller::{FlagValue, NodeFlags},
    stall::StallConfig,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Build artifacts the scenario needs before anything is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Artifacts {
    /// Node binary.
    pub binary: PathBuf,
    /// Runtime substituted at the stalled block.
    pub fixing_payload: PathBuf,
    /// Runtime the chain is upgraded to. Only its presence is checked.
    pub new_payload: PathBuf,
}

impl Default for Artifacts {
    fn default() -> Self {
        let build = PathBuf::from("test-code-substitute/build");
        Self {
            binary: build.join("aleph-node"),
            fixing_payload: build.join("fixing_runtime.wasm"),
            new_payload: build.join("new_runtime.wasm"),
        }
    }
}

impl Artifacts {
    /// All artifact paths, in a fixed order.
    pub fn paths(&self) -> [&PathBuf; 3] {
        [&self.binary, &self.fixing_payload, &self.new_payload]
    }
}

/// Shape of the validator cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClusterConfig {
    /// Seed phrases, one validator each. The first one holds sudo.
    pub phrases: Vec<String>,
    /// Chain type passed to the chain bootstrap.
    pub chain_type: String,
    /// Target block time.
    pub millisecs_per_block: u64,
    /// Session length in blocks.
    pub session_period: u32,
    /// Role switch of every node.
    pub role: String,
    /// Port flags; node `i` gets `base + i`. Passed in name order.
    pub ports: BTreeMap<String, u16>,
    /// Flags with the same value on every node. Passed in name order.
    pub flags: BTreeMap<String, String>,
    /// Flags without a value.
    pub switches: Vec<String>,
    /// Log levels by log target.
    pub log_levels: BTreeMap<String, String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        let owned = |kv: &[(&str, &str)]| -> BTreeMap<String, String> {
            kv.iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect()
        };
        Self {
            phrases: ["//Alice", "//Bob", "//Cedric", "//Dick"]
                .map(String::from)
                .into(),
            chain_type: "local".to_owned(),
            millisecs_per_block: 2000,
            session_period: 40,
            role: "validator".to_owned(),
            ports: [("port", 30334), ("ws-port", 9944), ("rpc-port", 9933)]
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            flags: owned(&[("unit-creation-delay", "200"), ("execution", "Native")]),
            switches: vec![],
            log_levels: owned(&[("afa", "debug"), ("wasm_substitutes", "debug")]),
        }
    }
}

/// Waits and limits, in milliseconds where they are durations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timing {
    /// Wait after the nodes are started.
    pub startup_wait_ms: u64,
    /// Wait after the baseline sample.
    pub initial_wait_ms: u64,
    /// Wait between the two samples of a stall window.
    pub confirm_wait_ms: u64,
    /// Wait after the restart with the patched chain spec.
    pub restart_settle_ms: u64,
    /// Wait before checking that finalization resumed.
    pub recovery_wait_ms: u64,
    /// Timeout of a single RPC call.
    pub rpc_timeout_ms: u64,
    /// Wait before retrying an incomplete sampling round.
    pub incomplete_retry_ms: u64,
    /// Consecutive incomplete rounds after which the scenario fails.
    pub max_incomplete_rounds: usize,
    /// Stall windows tried before the scenario fails.
    pub max_windows: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            startup_wait_ms: 5_000,
            initial_wait_ms: 40_000,
            confirm_wait_ms: 10_000,
            restart_settle_ms: 10_000,
            recovery_wait_ms: 10_000,
            rpc_timeout_ms: 5_000,
            incomplete_retry_ms: 2_000,
            max_incomplete_rounds: 3,
            max_windows: 1,
        }
    }
}

/// Where the patched chain spec goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorConfig {
    /// File name of the patched chain spec, relative to the workdir.
    pub patched: PathBuf,
}

impl Default for DescriptorConfig {
    fn default() -> Self {
        Self {
            patched: "chainspec-new.json".into(),
        }
    }
}

/// Full configuration of a recovery scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Directory holding the chain spec, node state and node logs.
    pub workdir: PathBuf,
    /// Stop the nodes and purge their state after a successful run too.
    pub cleanup_on_success: bool,
    /// Build artifacts.
    pub artifacts: Artifacts,
    /// Cluster shape.
    pub cluster: ClusterConfig,
    /// Waits and limits.
    pub timing: Timing,
    /// Patched chain spec.
    pub descriptor: DescriptorConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            workdir: "workdir".into(),
            cleanup_on_success: false,
            artifacts: Artifacts::default(),
            cluster: ClusterConfig::default(),
            timing: Timing::default(),
            descriptor: DescriptorConfig::default(),
        }
    }
}

fn ms(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

impl ScenarioConfig {
    /// Checks the constraints serde can't express.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.cluster.phrases.is_empty(), "cluster.phrases is empty");
        anyhow::ensure!(self.timing.max_windows > 0, "timing.max_windows must be positive");
        anyhow::ensure!(
            self.timing.max_incomplete_rounds > 0,
            "timing.max_incomplete_rounds must be positive"
        );
        anyhow::ensure!(
            self.cluster.millisecs_per_block > 0,
            "cluster.millisecs_per_block must be positive"
        );
        // A shorter wait can't tell a stall from a slow block.
        for (name, wait) in [
            ("confirm_wait_ms", self.timing.confirm_wait_ms),
            ("recovery_wait_ms", self.timing.recovery_wait_ms),
        ] {
            anyhow::ensure!(
                wait >= self.cluster.millisecs_per_block,
                "timing.{name} ({wait}) is shorter than cluster.millisecs_per_block ({})",
                self.cluster.millisecs_per_block
            );
        }
        anyhow::ensure!(
            self.timing.rpc_timeout_ms > 0,
            "timing.rpc_timeout_ms must be positive"
        );
        for (name, base) in &self.cluster.ports {
            let last = usize::from(*base) + self.cluster.phrases.len() - 1;
            anyhow::ensure!(
                last <= usize::from(u16::MAX),
                "cluster.ports.{name} overflows for {} nodes",
                self.cluster.phrases.len()
            );
        }
        Ok(())
    }

    /// Timing of the stall detector.
    pub fn stall_config(&self) -> StallConfig {
        let t = &self.timing;
        StallConfig {
            initial_wait: ms(t.initial_wait_ms),
            confirm_wait: ms(t.confirm_wait_ms),
            max_windows: t.max_windows,
            incomplete_retry: ms(t.incomplete_retry_ms),
            max_incomplete_rounds: t.max_incomplete_rounds,
            recovery_wait: ms(t.recovery_wait_ms),
        }
    }

    /// Flags passed to every node.
    pub fn node_flags(&self) -> NodeFlags {
        let c = &self.cluster;
        let mut flags = NodeFlags::new(c.role.clone());
        for (name, base) in &c.ports {
            flags = flags.with(name.clone(), FlagValue::Seq(*base));
        }
        for (name, value) in &c.flags {
            flags = flags.with(name.clone(), FlagValue::Fixed(value.clone()));
        }
        for name in &c.switches {
            flags = flags.with(name.clone(), FlagValue::Switch);
        }
        flags
    }

    /// Timeout of a single RPC call.
    pub fn rpc_timeout(&self) -> Duration {
        ms(self.timing.rpc_timeout_ms)
    }

    /// Wait after the first start.
    pub fn startup_wait(&self) -> Duration {
        ms(self.timing.startup_wait_ms)
    }

    /// Wait after the restart.
    pub fn restart_settle(&self) -> Duration {
        ms(self.timing.restart_settle_ms)
    }

    /// Path of the patched chain spec.
    pub fn patched_descriptor(&self) -> PathBuf {
        self.workdir.join(&self.descriptor.patched)
    }
}
