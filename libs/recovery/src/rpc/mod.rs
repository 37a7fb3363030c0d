//! Per-node observations over JSON-RPC.
//!
//! [`Observer`] is the only place where node calls are made. It enforces a
//! per-call timeout and never retries: a flaky call surfaces as
//! [`RpcError::Unreachable`] and it is up to the sampling loop to decide what
//! an unreachable node means for the round.
use crate::block::{BlockId, BlockNumber};
use std::{fmt, time::Duration};

pub mod methods;

/// Index of a node within the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {}", self.0)
    }
}

/// Handle to a running node which can answer JSON-RPC calls.
/// Implemented by the cluster runner, the harness only borrows it.
#[async_trait::async_trait]
pub trait NodeRpc: 'static + fmt::Debug + Send + Sync {
    /// Identity of the node within the cluster.
    fn id(&self) -> NodeId;

    /// Performs a single JSON-RPC call and returns its `result`.
    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Error returned by [`Observer`].
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// The call timed out or the transport failed.
    #[error("{0} is unreachable")]
    Unreachable(NodeId),
    /// The node answered with something we cannot interpret.
    #[error("{node} returned a malformed `{method}` response: {reason:#}")]
    Malformed {
        /// Node which answered.
        node: NodeId,
        /// Method called.
        method: &'static str,
        /// What was wrong with the answer.
        reason: anyhow::Error,
    },
}

/// Issues node queries with a bounded wait.
#[derive(Debug, Clone, Copy)]
pub struct Observer {
    timeout: Duration,
}

impl Observer {
    /// Constructs an observer giving up on a call after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Raw call with the per-call timeout applied.
    pub async fn query(
        &self,
        node: &dyn NodeRpc,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RpcError> {
        match tokio::time::timeout(self.timeout, node.call(method, params)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => {
                tracing::debug!(node = %node.id(), method, "call failed: {err:#}");
                Err(RpcError::Unreachable(node.id()))
            }
            Err(_) => {
                tracing::debug!(node = %node.id(), method, timeout = ?self.timeout, "call timed out");
                Err(RpcError::Unreachable(node.id()))
            }
        }
    }

    async fn query_parsed<T>(
        &self,
        node: &dyn NodeRpc,
        method: &'static str,
        params: Vec<serde_json::Value>,
        parse: impl FnOnce(&serde_json::Value) -> anyhow::Result<T>,
    ) -> Result<T, RpcError> {
        let result = self.query(node, method, params).await?;
        parse(&result).map_err(|reason| RpcError::Malformed {
            node: node.id(),
            method,
            reason,
        })
    }

    /// Version string of the node software.
    pub async fn system_version(&self, node: &dyn NodeRpc) -> Result<String, RpcError> {
        use methods::system_version as m;
        self.query_parsed(node, m::method(), vec![], m::parse).await
    }

    /// `specVersion` of the runtime the node currently executes.
    pub async fn runtime_spec_version(&self, node: &dyn NodeRpc) -> Result<u64, RpcError> {
        use methods::runtime_version as m;
        self.query_parsed(node, m::method(), vec![], m::parse).await
    }

    /// Highest block seen and highest block finalized by the node.
    pub async fn heights(
        &self,
        node: &dyn NodeRpc,
    ) -> Result<(BlockNumber, BlockNumber), RpcError> {
        use methods::{finalized_head, header};
        let highest = self
            .query_parsed(node, header::method(), vec![], header::parse)
            .await?;
        let head = self
            .query_parsed(node, finalized_head::method(), vec![], finalized_head::parse)
            .await?;
        let finalized = self
            .query_parsed(node, header::method(), vec![head.into()], header::parse)
            .await?;
        Ok((highest, finalized))
    }

    /// Hash of the block at `height`, `None` if the node has not archived it.
    pub async fn block_hash_at(
        &self,
        node: &dyn NodeRpc,
        height: BlockNumber,
    ) -> Result<Option<BlockId>, RpcError> {
        use methods::block_hash as m;
        self.query_parsed(node, m::method(), vec![height.0.into()], m::parse)
            .await
    }
}
