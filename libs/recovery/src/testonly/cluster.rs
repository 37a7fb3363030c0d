use super::{lock, FakeNetwork, Timeline};
use crate::{
    clock::ManualClock,
    controller::{BootstrapSpec, ClusterController, Identities, Identity, NodeFlags},
    rpc::NodeRpc,
};
use anyhow::Context as _;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

/// Lifecycle call observed by [`FakeCluster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `generate_identities()`.
    GenerateIdentities,
    /// `bootstrap()` with the sudo account.
    Bootstrap {
        /// Sudo account id.
        sudo: String,
    },
    /// `set_flags()`.
    SetFlags,
    /// `set_log_level()`.
    SetLogLevel(String, String),
    /// `start()` with its label.
    Start(String),
    /// `stop()`.
    Stop,
    /// `purge()`.
    Purge,
    /// `set_descriptor()`.
    SetDescriptor(PathBuf),
}

/// Fake cluster runner backed by a [`FakeNetwork`].
/// Every `start(label)` replays the timeline registered for `label`.
#[derive(Debug)]
pub struct FakeCluster {
    network: FakeNetwork,
    workdir: PathBuf,
    descriptor: Option<PathBuf>,
    timelines: HashMap<String, Timeline>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeCluster {
    /// Fake cluster of `n` nodes keeping its files in `workdir`.
    pub fn new(clock: &ManualClock, n: usize, workdir: &Path) -> Self {
        Self {
            network: FakeNetwork::new(clock, n),
            workdir: workdir.to_owned(),
            descriptor: None,
            timelines: HashMap::new(),
            calls: Arc::default(),
        }
    }

    /// Finalization followed by the nodes after `start(label)`.
    pub fn with_timeline(mut self, label: &str, timeline: Timeline) -> Self {
        self.timelines.insert(label.to_owned(), timeline);
        self
    }

    /// The network, for tweaking node behaviour.
    pub fn network(&self) -> &FakeNetwork {
        &self.network
    }

    /// Shared log of lifecycle calls.
    pub fn calls(&self) -> Arc<Mutex<Vec<Call>>> {
        self.calls.clone()
    }

    fn record(&self, call: Call) {
        lock(&self.calls).push(call);
    }
}

#[async_trait::async_trait]
impl ClusterController for FakeCluster {
    async fn generate_identities(
        &mut self,
        _binary: &Path,
        phrases: &[String],
    ) -> anyhow::Result<Identities> {
        self.record(Call::GenerateIdentities);
        Identities::new(
            phrases
                .iter()
                .map(|p| Identity {
                    phrase: p.clone(),
                    account_id: format!("5{}", p.trim_start_matches('/')),
                })
                .collect(),
        )
    }

    async fn bootstrap(&mut self, spec: &BootstrapSpec) -> anyhow::Result<()> {
        self.record(Call::Bootstrap {
            sudo: spec.identities.sudo().account_id.clone(),
        });
        let path = self.workdir.join("chainspec.json");
        let chainspec = serde_json::json!({
            "name": "Local Testnet",
            "id": "local",
            "chainType": "Local",
            "bootNodes": [],
            "genesis": { "raw": { "top": { "0x3a636f6465": "0x0061736d" } } },
            "codeSubstitutes": {},
        });
        fs::write(&path, serde_json::to_string_pretty(&chainspec)?)
            .with_context(|| path.display().to_string())?;
        self.descriptor = Some(path);
        Ok(())
    }

    fn set_flags(&mut self, _flags: NodeFlags) {
        self.record(Call::SetFlags);
    }

    fn set_log_level(&mut self, target: &str, level: &str) {
        self.record(Call::SetLogLevel(target.to_owned(), level.to_owned()));
    }

    async fn start(&mut self, label: &str) -> anyhow::Result<()> {
        self.record(Call::Start(label.to_owned()));
        let timeline = self
            .timelines
            .get(label)
            .with_context(|| format!("no timeline for run {label:?}"))?;
        self.network.start(timeline.clone());
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.record(Call::Stop);
        self.network.stop();
        Ok(())
    }

    async fn purge(&mut self) -> anyhow::Result<()> {
        self.record(Call::Purge);
        Ok(())
    }

    fn set_descriptor(&mut self, path: &Path) {
        self.record(Call::SetDescriptor(path.to_owned()));
        self.descriptor = Some(path.to_owned());
    }

    fn descriptor(&self) -> anyhow::Result<PathBuf> {
        self.descriptor.clone().context("cluster not bootstrapped")
    }

    fn nodes(&self) -> Vec<Arc<dyn NodeRpc>> {
        self.network.handles()
    }
}
