use super::*;
use crate::{
    clock::ManualClock,
    cluster::HeightObservation,
    rpc::Observer,
    testonly::{init_test_logging, FakeNetwork, Timeline},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::time::Instant;
use test_casing::test_casing;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn config() -> StallConfig {
    StallConfig {
        initial_wait: secs(40),
        confirm_wait: secs(10),
        max_windows: 1,
        incomplete_retry: secs(2),
        max_incomplete_rounds: 3,
        recovery_wait: secs(10),
    }
}

fn snapshot(finalized: &[u64]) -> ClusterSnapshot {
    ClusterSnapshot {
        observations: finalized
            .iter()
            .enumerate()
            .map(|(i, f)| HeightObservation {
                node: NodeId(i),
                highest: BlockNumber(f + 1),
                finalized: BlockNumber(*f),
            })
            .collect(),
        missing: vec![],
        expected: finalized.len(),
        sampled_at: Instant::now(),
    }
}

const FLAT: [(&[u64], &[u64]); 4] = [
    (&[57, 57, 57, 57], &[57, 57, 57, 57]),
    (&[57, 50, 57, 0], &[57, 57, 56, 57]),
    (&[0], &[0]),
    (&[3, 1], &[1, 3]),
];

#[test_casing(4, FLAT)]
#[test]
fn equal_max_finalized_is_stalled(prev: &[u64], next: &[u64]) {
    let height = BlockNumber(*prev.iter().max().unwrap());
    assert_eq!(
        compare(&snapshot(prev), &snapshot(next)),
        Ok(StallVerdict::Stalled { height })
    );
}

const ADVANCING: [(&[u64], &[u64]); 4] = [
    (&[57, 57, 57, 57], &[61, 61, 61, 61]),
    (&[57, 57, 57, 57], &[57, 57, 57, 58]),
    (&[0, 0], &[0, 1]),
    (&[10, 2], &[11, 2]),
];

#[test_casing(4, ADVANCING)]
#[test]
fn increasing_max_finalized_is_progressing(prev: &[u64], next: &[u64]) {
    let from = BlockNumber(*prev.iter().max().unwrap());
    let to = BlockNumber(*next.iter().max().unwrap());
    assert_eq!(
        compare(&snapshot(prev), &snapshot(next)),
        Ok(StallVerdict::Progressing { from, to })
    );
}

#[test]
fn incomplete_round_is_never_classified() {
    let mut partial = snapshot(&[57, 57]);
    partial.observations.pop();
    partial.missing.push(NodeId(1));
    assert_matches!(
        compare(&snapshot(&[57, 57]), &partial),
        Err(IncompleteRounds { missing, .. }) if missing == [NodeId(1)]
    );
}

struct Harness {
    clock: ManualClock,
    net: FakeNetwork,
    view: ClusterView,
}

impl Harness {
    fn new(nodes: usize, timeline: Timeline) -> Self {
        init_test_logging();
        let clock = ManualClock::new();
        let net = FakeNetwork::new(&clock, nodes);
        net.start(timeline);
        let view = ClusterView::new(
            net.handles(),
            Observer::new(secs(1)),
            clock.clone().into(),
        );
        Self { clock, net, view }
    }

    fn detector(&self, config: StallConfig) -> StallDetector<'_> {
        StallDetector::new(&self.view, self.clock.clone().into(), config)
    }
}

/// Finalization runs for a while and then gets stuck at 57.
fn stalling_at_57() -> Timeline {
    Timeline::new([(secs(0), 0), (secs(20), 30), (secs(35), 57)])
}

#[tokio::test]
async fn detects_stall_after_progress() {
    let h = Harness::new(4, stalling_at_57());
    let verdict = h.detector(config()).detect_stall().await.unwrap();
    assert_eq!(verdict, StallVerdict::Stalled { height: BlockNumber(57) });
    assert_eq!(h.clock.sleeps(), [secs(40), secs(10)]);
}

#[tokio::test]
async fn lagging_node_does_not_affect_verdict() {
    let h = Harness::new(4, stalling_at_57());
    h.net.node(3).set_lag(20);
    let verdict = h.detector(config()).detect_stall().await.unwrap();
    assert_eq!(verdict, StallVerdict::Stalled { height: BlockNumber(57) });
}

#[tokio::test]
async fn flat_from_the_start_is_insufficient_history() {
    let h = Harness::new(4, Timeline::constant(0));
    let verdict = h.detector(config()).detect_stall().await.unwrap();
    assert_eq!(
        verdict,
        StallVerdict::InsufficientHistory { height: BlockNumber(0) }
    );
}

#[tokio::test]
async fn steady_progress_is_reported() {
    // One block every 2 seconds, never stalls.
    let h = Harness::new(4, Timeline::new((0..100).map(|i| (secs(2 * i), i))));
    let verdict = h.detector(config()).detect_stall().await.unwrap();
    assert_eq!(
        verdict,
        StallVerdict::Progressing {
            from: BlockNumber(20),
            to: BlockNumber(25),
        }
    );
}

#[tokio::test]
async fn later_window_catches_the_stall() {
    let h = Harness::new(
        4,
        Timeline::new([(secs(0), 0), (secs(30), 40), (secs(45), 57)]),
    );
    let config = StallConfig {
        max_windows: 3,
        ..config()
    };
    // 40s: 40, 50s: 57, 60s: 57.
    let verdict = h.detector(config).detect_stall().await.unwrap();
    assert_eq!(verdict, StallVerdict::Stalled { height: BlockNumber(57) });
    assert_eq!(h.clock.sleeps(), [secs(40), secs(10), secs(10)]);
}

#[tokio::test]
async fn repeated_incomplete_rounds_are_fatal() {
    let h = Harness::new(4, stalling_at_57());
    h.net.node(2).set_reachable(false);
    let err = h.detector(config()).detect_stall().await.unwrap_err();
    assert_eq!(
        err,
        IncompleteRounds {
            rounds: 3,
            missing: vec![NodeId(2)],
        }
    );
    assert_eq!(h.clock.sleeps(), [secs(2), secs(2)]);
}

#[tokio::test]
async fn transient_unreachability_is_absorbed() {
    let h = Harness::new(4, stalling_at_57());
    h.net.node(1).fail_next_calls(1);
    let snapshot = h.detector(config()).sample().await.unwrap();
    assert!(snapshot.is_complete());
    assert_eq!(h.clock.sleeps(), [secs(2)]);
}

#[tokio::test]
async fn recovery_is_progress_past_the_stall() {
    let h = Harness::new(4, Timeline::new([(secs(0), 57), (secs(8), 61)]));
    let verdict = h
        .detector(config())
        .verify_recovery(BlockNumber(57))
        .await
        .unwrap();
    assert_eq!(
        verdict,
        StallVerdict::Progressing {
            from: BlockNumber(57),
            to: BlockNumber(61),
        }
    );
}

#[tokio::test]
async fn flat_after_restart_is_not_recovery() {
    let h = Harness::new(4, Timeline::constant(57));
    let verdict = h
        .detector(config())
        .verify_recovery(BlockNumber(57))
        .await
        .unwrap();
    assert_eq!(verdict, StallVerdict::Stalled { height: BlockNumber(57) });
}
