use anyhow::Context as _;

/// Version of the runtime active at the best block.
pub fn method() -> &'static str {
    "state_getRuntimeVersion"
}

/// Extracts `specVersion` from the runtime version object.
pub fn parse(result: &serde_json::Value) -> anyhow::Result<u64> {
    result
        .get("specVersion")
        .context("missing specVersion")?
        .as_u64()
        .context("specVersion is not an integer")
}
