use anyhow::Context as _;

/// Node software version.
pub fn method() -> &'static str {
    "system_version"
}

/// Decodes the version string.
pub fn parse(result: &serde_json::Value) -> anyhow::Result<String> {
    Ok(result.as_str().context("expected a string")?.to_owned())
}
