//! Interface of the cluster runner which owns the node processes.
use crate::rpc::NodeRpc;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Account identity of one validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Secret phrase the key was derived from, e.g. `//Alice`.
    pub phrase: String,
    /// Account id (SS58 address) derived from the phrase.
    pub account_id: String,
}

/// Validator identities of a scenario, built once at its start.
/// The first identity is the sudo account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identities(Vec<Identity>);

impl Identities {
    /// At least one identity is required, as the first one holds sudo.
    pub fn new(identities: Vec<Identity>) -> anyhow::Result<Self> {
        anyhow::ensure!(!identities.is_empty(), "at least one identity is required");
        Ok(Self(identities))
    }

    /// The privileged account.
    pub fn sudo(&self) -> &Identity {
        &self.0[0]
    }

    /// All identities in node order.
    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.0.iter()
    }

    /// Number of identities, one node each.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Account ids in node order.
    pub fn account_ids(&self) -> Vec<String> {
        self.0.iter().map(|i| i.account_id.clone()).collect()
    }
}

/// Parameters of the chain bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapSpec {
    /// Node binary.
    pub binary: PathBuf,
    /// One validator per identity.
    pub identities: Identities,
    /// Chain type, e.g. `local`.
    pub chain_type: String,
    /// Target block time.
    pub millisecs_per_block: u64,
    /// Session length in blocks.
    pub session_period: u32,
}

/// Value of a node command line flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    /// Flag without a value.
    Switch,
    /// Same value on every node.
    Fixed(String),
    /// Port sequence: node `i` gets `base + i`.
    Seq(u16),
}

/// Command line flags applied to every node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFlags {
    /// Role switch, e.g. `validator`.
    pub role: String,
    /// Flags by name (without the leading dashes). Emitted sorted by name,
    /// after the role switch.
    pub flags: BTreeMap<String, FlagValue>,
}

impl NodeFlags {
    /// Flags for the given role.
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            flags: BTreeMap::new(),
        }
    }

    /// Adds or replaces a flag.
    pub fn with(mut self, name: impl Into<String>, value: FlagValue) -> Self {
        self.flags.insert(name.into(), value);
        self
    }

    /// Port assigned to node `index` by the sequence flag `name`.
    pub fn port(&self, name: &str, index: usize) -> Option<u16> {
        match self.flags.get(name)? {
            FlagValue::Seq(base) => u16::try_from(index).ok()?.checked_add(*base),
            _ => None,
        }
    }

    /// Command line arguments for node `index`: the role switch, then
    /// every flag in name order.
    pub fn args(&self, index: usize) -> anyhow::Result<Vec<String>> {
        let mut args = vec![];
        if !self.role.is_empty() {
            args.push(format!("--{}", self.role));
        }
        for (name, value) in &self.flags {
            args.push(format!("--{name}"));
            match value {
                FlagValue::Switch => {}
                FlagValue::Fixed(v) => args.push(v.clone()),
                FlagValue::Seq(_) => {
                    let port = self
                        .port(name, index)
                        .ok_or_else(|| anyhow::format_err!("--{name} overflows for node {index}"))?;
                    args.push(port.to_string());
                }
            }
        }
        Ok(args)
    }
}

/// Process lifecycle of a local validator cluster.
///
/// Calls are issued one at a time by the scenario, never overlapped.
/// `stop()` and `purge()` must be idempotent: they run on every failure path,
/// possibly before anything was started.
#[async_trait::async_trait]
pub trait ClusterController: fmt::Debug + Send {
    /// Derives account identities for the given phrases with the node binary.
    async fn generate_identities(
        &mut self,
        binary: &Path,
        phrases: &[String],
    ) -> anyhow::Result<Identities>;

    /// Generates the chain spec and per-node directories.
    async fn bootstrap(&mut self, spec: &BootstrapSpec) -> anyhow::Result<()>;

    /// Flags passed to every node on the next `start()`.
    fn set_flags(&mut self, flags: NodeFlags);

    /// Log level for a log target on the next `start()`.
    fn set_log_level(&mut self, target: &str, level: &str);

    /// Starts every node. `label` names this run in logs.
    async fn start(&mut self, label: &str) -> anyhow::Result<()>;

    /// Stops every node.
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Removes the persisted chain state of every node.
    async fn purge(&mut self) -> anyhow::Result<()>;

    /// Chain spec used by the next `start()`.
    fn set_descriptor(&mut self, path: &Path);

    /// Chain spec currently in use.
    fn descriptor(&self) -> anyhow::Result<PathBuf>;

    /// RPC handles of the nodes, in identity order.
    fn nodes(&self) -> Vec<Arc<dyn NodeRpc>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn node_args_follow_port_sequences() {
        let flags = NodeFlags::new("validator")
            .with("port", FlagValue::Seq(30334))
            .with("rpc-port", FlagValue::Seq(9933))
            .with("execution", FlagValue::Fixed("Native".into()))
            .with("rpc-cors", FlagValue::Fixed("all".into()))
            .with("unsafe-rpc-external", FlagValue::Switch);
        assert_eq!(
            flags.args(2).unwrap(),
            [
                "--validator",
                "--execution",
                "Native",
                "--port",
                "30336",
                "--rpc-cors",
                "all",
                "--rpc-port",
                "9935",
                "--unsafe-rpc-external",
            ]
        );
        assert_eq!(flags.port("rpc-port", 3), Some(9936));
        assert_eq!(flags.port("execution", 0), None);
        assert_eq!(flags.port("missing", 0), None);
    }

    #[test]
    fn port_sequence_overflow_is_an_error() {
        let flags = NodeFlags::new("validator").with("port", FlagValue::Seq(u16::MAX));
        flags.args(0).unwrap();
        flags.args(1).unwrap_err();
    }

    #[test]
    fn first_identity_is_sudo() {
        let ids = Identities::new(vec![
            Identity {
                phrase: "//Alice".into(),
                account_id: "5Alice".into(),
            },
            Identity {
                phrase: "//Bob".into(),
                account_id: "5Bob".into(),
            },
        ])
        .unwrap();
        assert_eq!(ids.sudo().account_id, "5Alice");
        assert_eq!(ids.account_ids(), ["5Alice", "5Bob"]);
        Identities::new(vec![]).unwrap_err();
    }
}
