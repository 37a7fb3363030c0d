use anyhow::Context as _;

/// Hash of the last finalized block.
pub fn method() -> &'static str {
    "chain_getFinalizedHead"
}

/// Decodes the hash. It is passed verbatim to `chain_getHeader`.
pub fn parse(result: &serde_json::Value) -> anyhow::Result<String> {
    Ok(result.as_str().context("expected a block hash")?.to_owned())
}
