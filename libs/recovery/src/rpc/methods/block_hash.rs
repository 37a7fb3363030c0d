use crate::block::BlockId;
use anyhow::Context as _;

/// Hash of the block at the given height.
pub fn method() -> &'static str {
    "chain_getBlockHash"
}

/// `null` means the node has no block archived at that height.
pub fn parse(result: &serde_json::Value) -> anyhow::Result<Option<BlockId>> {
    if result.is_null() {
        return Ok(None);
    }
    let hash = result.as_str().context("expected a block hash or null")?;
    Ok(Some(hash.parse()?))
}
