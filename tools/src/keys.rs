//! Account ids derived by the node binary.
use anyhow::Context as _;
use finality_recovery::controller::{Identities, Identity};
use std::path::Path;
use tokio::process::Command;

const SS58_PREFIX: &str = "SS58 Address:";

/// Extracts the account id from the output of `key inspect`.
pub fn parse_account_id(output: &str) -> anyhow::Result<String> {
    let id = output
        .lines()
        .find_map(|l| l.trim().strip_prefix(SS58_PREFIX))
        .map(str::trim)
        .with_context(|| format!("no {SS58_PREFIX:?} line"))?;
    anyhow::ensure!(!id.is_empty(), "empty account id");
    Ok(id.to_owned())
}

/// Runs `binary key inspect <phrase>` and returns the account id.
pub async fn inspect(binary: &Path, phrase: &str) -> anyhow::Result<String> {
    let out = Command::new(binary)
        .args(["key", "inspect", phrase])
        .output()
        .await
        .with_context(|| format!("{} key inspect", binary.display()))?;
    anyhow::ensure!(
        out.status.success(),
        "key inspect {phrase:?} failed with {}: {}",
        out.status,
        String::from_utf8_lossy(&out.stderr).trim()
    );
    parse_account_id(&String::from_utf8_lossy(&out.stdout))
        .with_context(|| format!("key inspect {phrase:?}"))
}

/// Derives an identity for each phrase, in order.
pub async fn identities(binary: &Path, phrases: &[String]) -> anyhow::Result<Identities> {
    let mut ids = vec![];
    for phrase in phrases {
        let account_id = inspect(binary, phrase).await?;
        tracing::debug!(%phrase, %account_id, "derived account id");
        ids.push(Identity {
            phrase: phrase.clone(),
            account_id,
        });
    }
    Identities::new(ids)
}
