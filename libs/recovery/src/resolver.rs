//! Resolution of the stalled block's hash.
//!
//! A single designated node is asked once; nodes are not cross-checked.
use crate::{
    block::{BlockId, BlockNumber},
    rpc::{NodeId, NodeRpc, Observer, RpcError},
};

/// The hash of the requested block is not available.
#[derive(Debug, thiserror::Error)]
pub enum HashUnavailable {
    /// The node has no block archived at this height.
    #[error("{node} does not know the hash of block {height}")]
    NotArchived {
        /// Queried node.
        node: NodeId,
        /// Requested height.
        height: BlockNumber,
    },
    /// The query itself failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Resolves the hash of the block at `height` on `node`.
/// Never returns the zero hash: nodes use it for heights they don't know.
#[tracing::instrument(level = "info", skip(observer, node), fields(node = %node.id()), err)]
pub async fn resolve(
    observer: &Observer,
    node: &dyn NodeRpc,
    height: BlockNumber,
) -> Result<BlockId, HashUnavailable> {
    match observer.block_hash_at(node, height).await? {
        Some(id) if !id.is_zero() => {
            tracing::info!(%id, "resolved block hash");
            Ok(id)
        }
        _ => Err(HashUnavailable::NotArchived {
            node: node.id(),
            height,
        }),
    }
}
