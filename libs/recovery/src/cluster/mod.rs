//! Cluster-wide view assembled from per-node observations.
use crate::{
    block::BlockNumber,
    clock::Clock,
    rpc::{NodeId, NodeRpc, Observer, RpcError},
};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
    time::Instant,
};
use tokio::task::JoinSet;

#[cfg(test)]
mod tests;

/// Heights reported by a single node at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightObservation {
    /// Reporting node.
    pub node: NodeId,
    /// Best block seen by the node.
    pub highest: BlockNumber,
    /// Last block finalized by the node.
    pub finalized: BlockNumber,
}

/// One polling round over the whole cluster.
#[derive(Debug, Clone)]
pub struct ClusterSnapshot {
    /// Observations of the nodes that answered, ordered by node.
    pub observations: Vec<HeightObservation>,
    /// Nodes which failed to answer.
    pub missing: Vec<NodeId>,
    /// Number of nodes the cluster is configured with.
    pub expected: usize,
    /// When the round was taken.
    pub sampled_at: Instant,
}

impl ClusterSnapshot {
    /// Whether every configured node contributed an observation.
    /// Incomplete rounds must not be used for stall classification.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.observations.len() == self.expected
    }

    /// Highest finalized block reported by any node.
    pub fn max_finalized(&self) -> Option<BlockNumber> {
        self.observations.iter().map(|o| o.finalized).max()
    }

    /// Highest block seen by any node.
    pub fn max_highest(&self) -> Option<BlockNumber> {
        self.observations.iter().map(|o| o.highest).max()
    }
}

/// Versions reported by a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionObservation {
    /// Reporting node.
    pub node: NodeId,
    /// Version of the node software.
    pub system: String,
    /// Runtime `specVersion`.
    pub spec_version: u64,
}

/// One round of version queries over the whole cluster.
#[derive(Debug, Clone, Default)]
pub struct VersionSnapshot {
    /// Observations of the nodes that answered, ordered by node.
    pub observations: Vec<VersionObservation>,
    /// Nodes which failed to answer.
    pub missing: Vec<NodeId>,
}

/// Nodes do not agree on the runtime version.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct VersionMismatch {
    /// Nodes reporting each runtime version.
    pub by_version: BTreeMap<u64, BTreeSet<NodeId>>,
    /// Nodes which did not report a version.
    pub missing: Vec<NodeId>,
}

impl fmt::Display for VersionMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nodes report different runtime versions:")?;
        for (version, nodes) in &self.by_version {
            let nodes: Vec<_> = nodes.iter().map(|n| n.0).collect();
            write!(f, " v{version} on nodes {nodes:?};")?;
        }
        if !self.missing.is_empty() {
            let nodes: Vec<_> = self.missing.iter().map(|n| n.0).collect();
            write!(f, " no answer from nodes {nodes:?}")?;
        }
        Ok(())
    }
}

/// Returns the single runtime version the cluster agrees on.
pub fn version_agreement(snapshot: &VersionSnapshot) -> Result<u64, VersionMismatch> {
    let mut by_version: BTreeMap<u64, BTreeSet<NodeId>> = BTreeMap::new();
    for o in &snapshot.observations {
        by_version.entry(o.spec_version).or_default().insert(o.node);
    }
    if by_version.len() == 1 && snapshot.missing.is_empty() {
        if let Some(version) = by_version.keys().next() {
            return Ok(*version);
        }
    }
    Err(VersionMismatch {
        by_version,
        missing: snapshot.missing.clone(),
    })
}

/// Polls all nodes of the cluster.
#[derive(Debug, Clone)]
pub struct ClusterView {
    nodes: Vec<Arc<dyn NodeRpc>>,
    expected: usize,
    observer: Observer,
    clock: Clock,
}

impl ClusterView {
    /// View over `nodes`, expecting all of them to answer.
    pub fn new(nodes: Vec<Arc<dyn NodeRpc>>, observer: Observer, clock: Clock) -> Self {
        Self {
            expected: nodes.len(),
            nodes,
            observer,
            clock,
        }
    }

    /// Sets the configured cluster size. Rounds with fewer observations are
    /// incomplete, whatever the number of handles.
    pub fn expecting(mut self, expected: usize) -> Self {
        self.expected = expected;
        self
    }

    /// Number of nodes in the cluster.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Node handle by index.
    pub fn node(&self, i: usize) -> Option<&dyn NodeRpc> {
        self.nodes.get(i).map(|n| n.as_ref())
    }

    /// Observer used for all queries.
    pub fn observer(&self) -> &Observer {
        &self.observer
    }

    /// Runs `query` against every node concurrently and splits the
    /// results into answers and nodes which failed, both ordered by node.
    async fn query_all<T, F, Fut>(&self, query: F) -> (Vec<T>, Vec<NodeId>)
    where
        T: 'static + Send,
        F: Fn(Observer, Arc<dyn NodeRpc>) -> Fut,
        Fut: 'static + Send + std::future::Future<Output = Result<T, RpcError>>,
    {
        let mut tasks = JoinSet::new();
        for node in &self.nodes {
            let id = node.id();
            let fut = query(self.observer, node.clone());
            tasks.spawn(async move { (id, fut.await) });
        }
        let mut results = BTreeMap::new();
        while let Some(res) = tasks.join_next().await {
            match res {
                Ok((id, res)) => {
                    results.insert(id, res);
                }
                Err(err) => tracing::warn!("query task failed: {err}"),
            }
        }
        let mut ok = vec![];
        let mut missing = vec![];
        for node in &self.nodes {
            match results.remove(&node.id()) {
                Some(Ok(v)) => ok.push(v),
                Some(Err(err)) => {
                    tracing::warn!(node = %node.id(), "{err}");
                    missing.push(node.id());
                }
                None => missing.push(node.id()),
            }
        }
        (ok, missing)
    }

    /// Queries heights of every node. A node that fails is recorded as
    /// missing instead of failing the round.
    pub async fn poll_all(&self) -> ClusterSnapshot {
        let (observations, missing) = self
            .query_all(|observer, node| async move {
                let (highest, finalized) = observer.heights(node.as_ref()).await?;
                Ok::<_, RpcError>(HeightObservation {
                    node: node.id(),
                    highest,
                    finalized,
                })
            })
            .await;
        let snapshot = ClusterSnapshot {
            observations,
            missing,
            expected: self.expected,
            sampled_at: self.clock.now(),
        };
        let highest: Vec<_> = snapshot.observations.iter().map(|o| o.highest.0).collect();
        let finalized: Vec<_> = snapshot.observations.iter().map(|o| o.finalized.0).collect();
        tracing::info!(?highest, ?finalized, missing = ?snapshot.missing, "blocks seen by nodes");
        snapshot
    }

    /// Queries software and runtime versions of every node.
    pub async fn poll_versions(&self) -> VersionSnapshot {
        let (observations, missing) = self
            .query_all(|observer, node| async move {
                let system = observer.system_version(node.as_ref()).await?;
                let spec_version = observer.runtime_spec_version(node.as_ref()).await?;
                Ok::<_, RpcError>(VersionObservation {
                    node: node.id(),
                    system,
                    spec_version,
                })
            })
            .await;
        for o in &observations {
            tracing::info!(node = %o.node, system = %o.system, runtime = o.spec_version, "current version");
        }
        VersionSnapshot {
            observations,
            missing,
        }
    }
}
