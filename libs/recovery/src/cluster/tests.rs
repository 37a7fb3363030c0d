use super::*;
use crate::{
    clock::ManualClock,
    testonly::{init_test_logging, FakeNetwork, Timeline},
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::time::Duration;

fn view(net: &FakeNetwork, clock: &ManualClock) -> ClusterView {
    ClusterView::new(
        net.handles(),
        Observer::new(Duration::from_secs(1)),
        clock.clone().into(),
    )
}

#[tokio::test]
async fn complete_round_reduces_to_max() {
    init_test_logging();
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 4);
    net.start(Timeline::constant(57));
    net.node(2).set_lag(3);
    let snapshot = view(&net, &clock).poll_all().await;
    assert!(snapshot.is_complete());
    assert_eq!(snapshot.observations.len(), 4);
    assert_eq!(
        snapshot.observations.iter().map(|o| o.node).collect::<Vec<_>>(),
        (0..4).map(NodeId).collect::<Vec<_>>()
    );
    assert_eq!(snapshot.observations[2].finalized, BlockNumber(54));
    // A lagging node doesn't affect the reduction.
    assert_eq!(snapshot.max_finalized(), Some(BlockNumber(57)));
    assert_eq!(snapshot.max_highest(), Some(BlockNumber(59)));
    assert_eq!(snapshot.sampled_at, clock.now());
}

#[tokio::test]
async fn unreachable_node_makes_round_incomplete() {
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 4);
    net.start(Timeline::constant(10));
    net.node(1).set_reachable(false);
    let snapshot = view(&net, &clock).poll_all().await;
    assert!(!snapshot.is_complete());
    assert_eq!(snapshot.missing, [NodeId(1)]);
    assert_eq!(snapshot.observations.len(), 3);
    assert_eq!(snapshot.max_finalized(), Some(BlockNumber(10)));
}

#[tokio::test]
async fn empty_round_has_no_max() {
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 2);
    // Never started.
    let snapshot = view(&net, &clock).poll_all().await;
    assert_eq!(snapshot.missing, [NodeId(0), NodeId(1)]);
    assert_eq!(snapshot.max_finalized(), None);
    assert_eq!(snapshot.max_highest(), None);
}

#[tokio::test]
async fn round_over_fewer_nodes_than_configured_is_incomplete() {
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 2);
    net.start(Timeline::constant(57));
    let snapshot = view(&net, &clock).expecting(4).poll_all().await;
    assert!(snapshot.missing.is_empty());
    assert_eq!(snapshot.observations.len(), 2);
    assert_eq!(snapshot.expected, 4);
    assert!(!snapshot.is_complete());
}

#[tokio::test]
async fn versions_agree() {
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 3);
    net.start(Timeline::constant(1));
    for i in 0..3 {
        net.node(i).set_spec_version(7);
    }
    let versions = view(&net, &clock).poll_versions().await;
    assert_eq!(versions.observations.len(), 3);
    assert_eq!(version_agreement(&versions), Ok(7));
}

#[tokio::test]
async fn version_mismatch_names_the_disagreeing_nodes() {
    let clock = ManualClock::new();
    let net = FakeNetwork::new(&clock, 4);
    net.start(Timeline::constant(1));
    net.node(1).set_spec_version(2);
    net.node(3).set_spec_version(2);
    let versions = view(&net, &clock).poll_versions().await;
    let err = version_agreement(&versions).unwrap_err();
    assert_eq!(
        err.by_version,
        BTreeMap::from([
            (1, BTreeSet::from([NodeId(0), NodeId(2)])),
            (2, BTreeSet::from([NodeId(1), NodeId(3)])),
        ])
    );
    assert_eq!(
        err.to_string(),
        "nodes report different runtime versions: v1 on nodes [0, 2]; v2 on nodes [1, 3];"
    );
}

#[test]
fn silent_node_breaks_agreement() {
    let snapshot = VersionSnapshot {
        observations: vec![VersionObservation {
            node: NodeId(0),
            system: "x".into(),
            spec_version: 1,
        }],
        missing: vec![NodeId(1)],
    };
    assert_matches!(version_agreement(&snapshot), Err(VersionMismatch { missing, .. }) => {
        assert_eq!(missing, [NodeId(1)]);
    });
}
