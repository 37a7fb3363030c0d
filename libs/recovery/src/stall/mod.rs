//! Finality stall detection.
//!
//! The cluster is sampled in rounds separated by configurable waits. A stall
//! is declared only when two consecutive complete rounds report the same
//! maximal finalized block *and* finalization was seen advancing before,
//! otherwise the cluster may simply not have started finalizing yet.
//! Only the maximum over nodes matters: a single lagging node doesn't
//! affect the verdict as long as some node still makes progress.
use crate::{
    block::BlockNumber,
    clock::Clock,
    cluster::{ClusterSnapshot, ClusterView},
    rpc::NodeId,
};
use std::time::Duration;

#[cfg(test)]
mod tests;

/// Outcome of comparing cluster samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallVerdict {
    /// Finalization did not move across the window.
    Stalled {
        /// The finalized block finalization is stuck at.
        height: BlockNumber,
    },
    /// Finalization moved.
    Progressing {
        /// Finalized block at the start of the window.
        from: BlockNumber,
        /// Finalized block at the end of the window.
        to: BlockNumber,
    },
    /// Finalization is flat, but it was never seen advancing.
    InsufficientHistory {
        /// The finalized block observed throughout.
        height: BlockNumber,
    },
}

/// A sampling round could not be used for classification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{rounds} consecutive sampling rounds were incomplete, no answer from {missing:?}")]
pub struct IncompleteRounds {
    /// Number of incomplete rounds in a row.
    pub rounds: usize,
    /// Nodes missing from the last round.
    pub missing: Vec<NodeId>,
}

/// Classifies a pair of rounds by their maximal finalized block.
pub fn compare(
    prev: &ClusterSnapshot,
    next: &ClusterSnapshot,
) -> Result<StallVerdict, IncompleteRounds> {
    let (from, to) = (finalized(prev)?, finalized(next)?);
    Ok(if from == to {
        StallVerdict::Stalled { height: to }
    } else {
        StallVerdict::Progressing { from, to }
    })
}

fn finalized(snapshot: &ClusterSnapshot) -> Result<BlockNumber, IncompleteRounds> {
    match snapshot.max_finalized() {
        Some(n) if snapshot.is_complete() => Ok(n),
        _ => Err(IncompleteRounds {
            rounds: 1,
            missing: snapshot.missing.clone(),
        }),
    }
}

/// Timing of the detector.
///
/// `confirm_wait` must be long enough for at least one block to finalize
/// under correct operation, otherwise progress can never be observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallConfig {
    /// Wait after the baseline round, letting finalization run.
    pub initial_wait: Duration,
    /// Wait between the two rounds of a comparison window.
    pub confirm_wait: Duration,
    /// Comparison windows tried before giving up on seeing a stall.
    pub max_windows: usize,
    /// Wait before retrying an incomplete round.
    pub incomplete_retry: Duration,
    /// Consecutive incomplete rounds after which sampling fails.
    pub max_incomplete_rounds: usize,
    /// Wait after the restart before checking that finalization resumed.
    pub recovery_wait: Duration,
}

/// Samples a [`ClusterView`] and classifies finalization.
#[derive(Debug)]
pub struct StallDetector<'a> {
    view: &'a ClusterView,
    clock: Clock,
    config: StallConfig,
}

impl<'a> StallDetector<'a> {
    /// Detector over `view`, waiting on `clock`.
    pub fn new(view: &'a ClusterView, clock: Clock, config: StallConfig) -> Self {
        Self {
            view,
            clock,
            config,
        }
    }

    /// Takes a complete round, retrying incomplete ones.
    async fn sample(&self) -> Result<ClusterSnapshot, IncompleteRounds> {
        let max = self.config.max_incomplete_rounds.max(1);
        let mut rounds = 0;
        loop {
            let snapshot = self.view.poll_all().await;
            if snapshot.is_complete() && snapshot.max_finalized().is_some() {
                return Ok(snapshot);
            }
            rounds += 1;
            tracing::warn!(rounds, missing = ?snapshot.missing, "incomplete sampling round");
            if rounds >= max {
                return Err(IncompleteRounds {
                    rounds,
                    missing: snapshot.missing,
                });
            }
            self.clock.sleep(self.config.incomplete_retry).await;
        }
    }

    /// Samples until two consecutive rounds agree on the finalized block.
    ///
    /// Returns `Stalled` only if finalization advanced past the baseline
    /// round, `InsufficientHistory` if it never did, and `Progressing`
    /// (over the whole observation) if every window showed progress.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub async fn detect_stall(&self) -> Result<StallVerdict, IncompleteRounds> {
        let baseline = finalized(&self.sample().await?)?;
        tracing::info!(%baseline, wait = ?self.config.initial_wait, "letting finalization run");
        self.clock.sleep(self.config.initial_wait).await;

        let mut prev = self.sample().await?;
        let first = finalized(&prev)?;
        for window in 1..=self.config.max_windows {
            let at = finalized(&prev)?;
            tracing::info!(window, finalized = %at, "waiting a little bit more");
            self.clock.sleep(self.config.confirm_wait).await;
            let next = self.sample().await?;
            match compare(&prev, &next)? {
                StallVerdict::Stalled { height } if height <= baseline => {
                    tracing::warn!(%height, %baseline, "finalization never advanced");
                    return Ok(StallVerdict::InsufficientHistory { height });
                }
                StallVerdict::Stalled { height } => {
                    tracing::info!(%height, "finalization stalled");
                    return Ok(StallVerdict::Stalled { height });
                }
                verdict => tracing::info!(?verdict, "finalization still advancing"),
            }
            prev = next;
        }
        Ok(StallVerdict::Progressing {
            from: first,
            to: finalized(&prev)?,
        })
    }

    /// Checks that finalization moved past `stalled_at` after `recovery_wait`.
    #[tracing::instrument(level = "info", skip(self), err)]
    pub async fn verify_recovery(
        &self,
        stalled_at: BlockNumber,
    ) -> Result<StallVerdict, IncompleteRounds> {
        self.clock.sleep(self.config.recovery_wait).await;
        let to = finalized(&self.sample().await?)?;
        Ok(if to > stalled_at {
            StallVerdict::Progressing {
                from: stalled_at,
                to,
            }
        } else {
            tracing::warn!(%stalled_at, finalized = %to, "finalization did not resume");
            StallVerdict::Stalled { height: to }
        })
    }
}
