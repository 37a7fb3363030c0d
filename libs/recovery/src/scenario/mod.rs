//! The stall, patch and recover scenario.
//!
//! Stages run strictly one after another. Any fatal error stops the nodes
//! and purges their state before it is returned.
use crate::{
    block::{BlockId, BlockNumber},
    clock::Clock,
    cluster::{version_agreement, ClusterView},
    config::{Artifacts, ScenarioConfig},
    controller::{BootstrapSpec, ClusterController},
    descriptor::{self, PatchError},
    resolver::{self, HashUnavailable},
    rpc::Observer,
    stall::{IncompleteRounds, StallDetector, StallVerdict},
};
use std::path::PathBuf;


/// Label of the run with the original chain spec.
pub const CORRUPTED_RUN: &str = "corrupted";
/// Label of the run with the patched chain spec.
pub const FIXED_RUN: &str = "fixed";

/// Fatal outcome of a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Build artifacts are missing.
    #[error("missing build artifacts: {0:?}")]
    PreconditionMissing(Vec<PathBuf>),
    /// Nodes kept failing to answer.
    #[error(transparent)]
    IncompleteRounds(#[from] IncompleteRounds),
    /// Finalization was flat but never seen advancing.
    #[error("finalization never advanced past {height}")]
    InsufficientHistory {
        /// Flat finalized block.
        height: BlockNumber,
    },
    /// Finalization kept advancing.
    #[error("finalization did not stall, it advanced from {from} to {to}")]
    NoStallObserved {
        /// Finalized block at the first sample.
        from: BlockNumber,
        /// Finalized block at the last sample.
        to: BlockNumber,
    },
    /// The stalled block's hash is not available.
    #[error(transparent)]
    HashUnavailable(#[from] HashUnavailable),
    /// Patching the chain spec failed.
    #[error(transparent)]
    Descriptor(#[from] PatchError),
    /// Finalization did not move past the stall after the restart.
    #[error("finalization did not resume: stalled at {stalled_at}, finalized {finalized}")]
    RecoveryFailed {
        /// Block finalization was stalled at.
        stalled_at: BlockNumber,
        /// Finalized block after the restart.
        finalized: BlockNumber,
    },
    /// The cluster runner failed.
    #[error(transparent)]
    Controller(#[from] anyhow::Error),
}

/// Outcome of a successful scenario.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Block finalization was stalled at.
    pub stalled_at: BlockNumber,
    /// Hash of that block.
    pub block_id: BlockId,
    /// Finalized block after the restart.
    pub resumed_at: BlockNumber,
    /// Chain spec the cluster recovered with.
    pub patched_descriptor: PathBuf,
}

/// Checks that every build artifact exists. Runs before anything is started.
pub fn preflight(artifacts: &Artifacts) -> Result<(), ScenarioError> {
    let missing: Vec<PathBuf> = artifacts
        .paths()
        .into_iter()
        .filter(|p| !p.exists())
        .cloned()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ScenarioError::PreconditionMissing(missing))
    }
}

/// Drives a [`ClusterController`] through the scenario.
#[derive(Debug)]
pub struct Scenario<C> {
    config: ScenarioConfig,
    controller: C,
    clock: Clock,
}

impl<C: ClusterController> Scenario<C> {
    /// Scenario over `controller`, waiting on `clock`.
    pub fn new(config: ScenarioConfig, controller: C, clock: Clock) -> Self {
        Self {
            config,
            controller,
            clock,
        }
    }

    /// The cluster runner.
    pub fn controller(&self) -> &C {
        &self.controller
    }

    /// Runs every stage. On failure the cluster is torn down before the
    /// error is returned; on success only if `cleanup_on_success` is set.
    pub async fn run(&mut self) -> Result<RecoveryReport, ScenarioError> {
        preflight(&self.config.artifacts)?;
        let res = self.run_stages().await;
        match &res {
            Ok(report) => {
                tracing::info!(
                    stalled_at = %report.stalled_at,
                    resumed_at = %report.resumed_at,
                    block_id = %report.block_id,
                    "finalization recovered"
                );
                if self.config.cleanup_on_success {
                    self.teardown().await;
                }
            }
            Err(err) => {
                tracing::error!("scenario failed: {err:#}");
                self.teardown().await;
            }
        }
        res
    }

    /// Stops the nodes and purges their state. Failures are logged only.
    pub async fn teardown(&mut self) {
        if let Err(err) = self.controller.stop().await {
            tracing::error!("stop(): {err:#}");
        }
        if let Err(err) = self.controller.purge().await {
            tracing::error!("purge(): {err:#}");
        }
    }

    /// View over the running nodes. Fails if the controller exposes a
    /// different number of nodes than configured.
    fn view(&self) -> Result<ClusterView, ScenarioError> {
        let nodes = self.controller.nodes();
        let expected = self.config.cluster.phrases.len();
        if nodes.len() != expected {
            return Err(anyhow::format_err!(
                "controller exposes {} nodes, {expected} configured",
                nodes.len()
            )
            .into());
        }
        Ok(ClusterView::new(
            nodes,
            Observer::new(self.config.rpc_timeout()),
            self.clock.clone(),
        )
        .expecting(expected))
    }

    #[tracing::instrument(level = "info", skip(self), err)]
    async fn start_cluster(&mut self) -> anyhow::Result<()> {
        let cluster = &self.config.cluster;
        let identities = self
            .controller
            .generate_identities(&self.config.artifacts.binary, &cluster.phrases)
            .await?;
        tracing::info!(
            sudo = %identities.sudo().account_id,
            validators = identities.len(),
            "generated identities"
        );
        let spec = BootstrapSpec {
            binary: self.config.artifacts.binary.clone(),
            identities,
            chain_type: cluster.chain_type.clone(),
            millisecs_per_block: cluster.millisecs_per_block,
            session_period: cluster.session_period,
        };
        self.controller.bootstrap(&spec).await?;
        self.controller.set_flags(self.config.node_flags());
        for (target, level) in &self.config.cluster.log_levels {
            self.controller.set_log_level(target, level);
        }
        self.controller.start(CORRUPTED_RUN).await?;
        self.clock.sleep(self.config.startup_wait()).await;
        Ok(())
    }

    async fn check_versions(&self, view: &ClusterView) {
        match version_agreement(&view.poll_versions().await) {
            Ok(version) => tracing::info!(version, "nodes agree on the runtime version"),
            Err(mismatch) => tracing::warn!("{mismatch}"),
        }
    }

    #[tracing::instrument(level = "info", skip(self), err)]
    async fn restart(&mut self, descriptor: PathBuf) -> anyhow::Result<()> {
        self.controller.stop().await?;
        self.controller.set_descriptor(&descriptor);
        self.controller.start(FIXED_RUN).await?;
        self.clock.sleep(self.config.restart_settle()).await;
        Ok(())
    }

    async fn run_stages(&mut self) -> Result<RecoveryReport, ScenarioError> {
        self.start_cluster().await?;

        let view = self.view()?;
        self.check_versions(&view).await;
        let stall_config = self.config.stall_config();
        let detector = StallDetector::new(&view, self.clock.clone(), stall_config.clone());
        let stalled_at = match detector.detect_stall().await? {
            StallVerdict::Stalled { height } => height,
            StallVerdict::InsufficientHistory { height } => {
                return Err(ScenarioError::InsufficientHistory { height })
            }
            StallVerdict::Progressing { from, to } => {
                return Err(ScenarioError::NoStallObserved { from, to })
            }
        };

        let node = view
            .node(0)
            .ok_or_else(|| anyhow::format_err!("cluster has no nodes"))?;
        let block_id = resolver::resolve(view.observer(), node, stalled_at).await?;

        let original = self.controller.descriptor()?;
        let patched = self.config.patched_descriptor();
        descriptor::patch(
            &original,
            &block_id,
            &self.config.artifacts.fixing_payload,
            &patched,
        )?;

        self.restart(patched.clone()).await?;
        let view = self.view()?;
        self.check_versions(&view).await;
        let detector = StallDetector::new(&view, self.clock.clone(), stall_config);
        let resumed_at = match detector.verify_recovery(stalled_at).await? {
            StallVerdict::Progressing { to, .. } if to > stalled_at => to,
            StallVerdict::Progressing { to: finalized, .. }
            | StallVerdict::Stalled { height: finalized }
            | StallVerdict::InsufficientHistory { height: finalized } => {
                return Err(ScenarioError::RecoveryFailed {
                    stalled_at,
                    finalized,
                })
            }
        };
        Ok(RecoveryReport {
            stalled_at,
            block_id,
            resumed_at,
            patched_descriptor: patched,
        })
    }
}
