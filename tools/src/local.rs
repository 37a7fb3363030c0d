//! Validator cluster of local child processes.
//!
//! Layout of the workdir:
//! * `chainspec.json`: chain spec written by `bootstrap-chain`,
//! * `<account id>/`: base path of each node, with its `p2p_secret`,
//! * `<label><i>.log`: output of node `i` during the run `label`.
use crate::{http::HttpNode, keys};
use anyhow::Context as _;
use finality_recovery::{
    controller::{BootstrapSpec, ClusterController, Identities, Identity, NodeFlags},
    rpc::{NodeId, NodeRpc},
};
use std::{
    collections::BTreeMap,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::Duration,
};
use tokio::process::{Child, Command};

/// Chain spec written by the bootstrap.
pub const CHAINSPEC: &str = "chainspec.json";
/// Port flag the nodes serve JSON-RPC on.
pub const RPC_PORT_FLAG: &str = "rpc-port";

#[derive(Debug)]
struct Bootstrapped {
    binary: PathBuf,
    identities: Identities,
}

/// [`ClusterController`] running every node as a child process of this one.
#[derive(Debug)]
pub struct LocalCluster {
    workdir: PathBuf,
    rpc_timeout: Duration,
    bootstrapped: Option<Bootstrapped>,
    chainspec: Option<PathBuf>,
    flags: NodeFlags,
    log_levels: BTreeMap<String, String>,
    children: Vec<Child>,
    nodes: Vec<Arc<dyn NodeRpc>>,
}

impl LocalCluster {
    /// Cluster keeping its files in `workdir`.
    pub fn new(workdir: PathBuf, rpc_timeout: Duration) -> Self {
        Self {
            workdir,
            rpc_timeout,
            bootstrapped: None,
            chainspec: None,
            flags: NodeFlags::default(),
            log_levels: BTreeMap::new(),
            children: vec![],
            nodes: vec![],
        }
    }

    fn bootstrapped(&self) -> anyhow::Result<&Bootstrapped> {
        self.bootstrapped.as_ref().context("cluster not bootstrapped")
    }

    /// Base path of the node running as `identity`.
    pub fn base_path(&self, identity: &Identity) -> PathBuf {
        self.workdir.join(&identity.account_id)
    }

    /// Output file of node `index` during the run `label`.
    pub fn log_path(&self, label: &str, index: usize) -> PathBuf {
        self.workdir.join(format!("{label}{index}.log"))
    }

    /// Command line of node `index` running as `identity`.
    pub fn node_args(&self, index: usize, identity: &Identity) -> anyhow::Result<Vec<OsString>> {
        let chainspec = self.descriptor()?;
        let base_path = self.base_path(identity);
        let mut args: Vec<OsString> = vec![
            "--chain".into(),
            chainspec.into(),
            "--base-path".into(),
            base_path.clone().into(),
            "--name".into(),
            identity.account_id.clone().into(),
            "--node-key-file".into(),
            base_path.join("p2p_secret").into(),
        ];
        args.extend(self.flags.args(index)?.into_iter().map(OsString::from));
        if !self.log_levels.is_empty() {
            let levels: Vec<String> = self
                .log_levels
                .iter()
                .map(|(target, level)| format!("{target}={level}"))
                .collect();
            args.push("-l".into());
            args.push(levels.join(",").into());
        }
        Ok(args)
    }
}

#[async_trait::async_trait]
impl ClusterController for LocalCluster {
    async fn generate_identities(
        &mut self,
        binary: &Path,
        phrases: &[String],
    ) -> anyhow::Result<Identities> {
        keys::identities(binary, phrases).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(workdir = %self.workdir.display()), err)]
    async fn bootstrap(&mut self, spec: &BootstrapSpec) -> anyhow::Result<()> {
        fs::create_dir_all(&self.workdir).with_context(|| self.workdir.display().to_string())?;
        let out = Command::new(&spec.binary)
            .arg("bootstrap-chain")
            .arg("--base-path")
            .arg(&self.workdir)
            .arg("--account-ids")
            .arg(spec.identities.account_ids().join(","))
            .arg("--sudo-account-id")
            .arg(&spec.identities.sudo().account_id)
            .arg("--chain-type")
            .arg(&spec.chain_type)
            .arg("--millisecs-per-block")
            .arg(spec.millisecs_per_block.to_string())
            .arg("--session-period")
            .arg(spec.session_period.to_string())
            .stderr(Stdio::inherit())
            .output()
            .await
            .with_context(|| format!("{} bootstrap-chain", spec.binary.display()))?;
        anyhow::ensure!(out.status.success(), "bootstrap-chain failed with {}", out.status);
        let path = self.workdir.join(CHAINSPEC);
        fs::write(&path, &out.stdout).with_context(|| path.display().to_string())?;
        tracing::info!(chainspec = %path.display(), "bootstrapped chain");
        self.chainspec = Some(path);
        self.bootstrapped = Some(Bootstrapped {
            binary: spec.binary.clone(),
            identities: spec.identities.clone(),
        });
        Ok(())
    }

    fn set_flags(&mut self, flags: NodeFlags) {
        self.flags = flags;
    }

    fn set_log_level(&mut self, target: &str, level: &str) {
        self.log_levels.insert(target.to_owned(), level.to_owned());
    }

    #[tracing::instrument(level = "info", skip(self), err)]
    async fn start(&mut self, label: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.children.is_empty(), "cluster already running");
        let b = self.bootstrapped()?;
        let mut commands = vec![];
        let mut nodes: Vec<Arc<dyn NodeRpc>> = vec![];
        for (i, identity) in b.identities.iter().enumerate() {
            let log_path = self.log_path(label, i);
            let log = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| log_path.display().to_string())?;
            let mut cmd = Command::new(&b.binary);
            cmd.args(self.node_args(i, identity)?)
                .stdout(log.try_clone()?)
                .stderr(log)
                .kill_on_drop(true);
            commands.push(cmd);

            let port = self
                .flags
                .port(RPC_PORT_FLAG, i)
                .with_context(|| format!("no --{RPC_PORT_FLAG} for node {i}"))?;
            nodes.push(Arc::new(HttpNode::local(NodeId(i), port, self.rpc_timeout)?));
        }
        for (i, mut cmd) in commands.into_iter().enumerate() {
            let child = cmd.spawn().with_context(|| format!("spawn node {i}"))?;
            tracing::info!(node = i, pid = ?child.id(), "started node");
            self.children.push(child);
        }
        self.nodes = nodes;
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.nodes.clear();
        let mut first_err = None;
        for (i, mut child) in self.children.drain(..).enumerate() {
            match child.kill().await {
                Ok(()) => tracing::info!(node = i, "stopped node"),
                Err(err) => {
                    tracing::warn!(node = i, "kill(): {err:#}");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(anyhow::Error::from(err).context("failed to stop the cluster")),
            None => Ok(()),
        }
    }

    async fn purge(&mut self) -> anyhow::Result<()> {
        let Some(b) = &self.bootstrapped else {
            return Ok(());
        };
        for identity in b.identities.iter() {
            let chains = self.base_path(identity).join("chains");
            let Ok(entries) = fs::read_dir(&chains) else {
                continue;
            };
            for entry in entries {
                let db = entry?.path().join("db");
                if db.exists() {
                    fs::remove_dir_all(&db).with_context(|| db.display().to_string())?;
                    tracing::info!(db = %db.display(), "purged");
                }
            }
        }
        Ok(())
    }

    fn set_descriptor(&mut self, path: &Path) {
        self.chainspec = Some(path.to_owned());
    }

    fn descriptor(&self) -> anyhow::Result<PathBuf> {
        self.chainspec.clone().context("cluster not bootstrapped")
    }

    fn nodes(&self) -> Vec<Arc<dyn NodeRpc>> {
        self.nodes.clone()
    }
}
