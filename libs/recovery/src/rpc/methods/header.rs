//! `chain_getHeader`. Without params it returns the best block header,
//! with a block hash it returns the header of that block.
use crate::block::BlockNumber;
use anyhow::Context as _;

/// Method name.
pub fn method() -> &'static str {
    "chain_getHeader"
}

/// Extracts the block number from a header.
pub fn parse(result: &serde_json::Value) -> anyhow::Result<BlockNumber> {
    BlockNumber::from_json(result.get("number").context("header without number")?)
        .context("number")
}
