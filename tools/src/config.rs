//! Scenario configuration loading.
use anyhow::Context as _;
use finality_recovery::ScenarioConfig;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Environment variable holding the config file path.
pub const CONFIG_ENV: &str = "SCENARIO_CONFIG";

/// Decodes a value from json, rejecting trailing data.
pub fn decode_json<T: serde::de::DeserializeOwned>(json: &str) -> anyhow::Result<T> {
    let mut d = serde_json::Deserializer::from_str(json);
    let p = T::deserialize(&mut d)?;
    d.end()?;
    Ok(p)
}

/// Picks the config file: the command line flag first, then the
/// environment variable. `None` means the built-in defaults.
#[tracing::instrument(level = "trace", ret)]
pub fn resolve_path(flag: Option<&Path>, env: Option<String>) -> Option<PathBuf> {
    if let Some(path) = flag {
        tracing::debug!("Config file path found in command line arguments.");
        return Some(path.to_owned());
    }
    if let Some(path) = env.filter(|p| !p.is_empty()) {
        tracing::debug!("Config file path found in environment variable.");
        return Some(path.into());
    }
    tracing::debug!("Using the default configuration.");
    None
}

/// Reads and validates a config file.
pub fn read(path: &Path) -> anyhow::Result<ScenarioConfig> {
    let json = fs::read_to_string(path).with_context(|| path.display().to_string())?;
    let config: ScenarioConfig =
        decode_json(&json).with_context(|| format!("{}: invalid config", path.display()))?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration from the path given by `flag` or the
/// `SCENARIO_CONFIG` environment variable, falling back to the defaults.
pub fn load(flag: Option<&Path>) -> anyhow::Result<ScenarioConfig> {
    match resolve_path(flag, std::env::var(CONFIG_ENV).ok()) {
        Some(path) => read(&path),
        None => {
            let config = ScenarioConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}
