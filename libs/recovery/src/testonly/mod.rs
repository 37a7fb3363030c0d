//! Test-only utilities: an in-process fake network whose finalization
//! progress is scripted against a [`ManualClock`], and a fake cluster
//! controller recording every lifecycle call.
use crate::{
    block::{BlockId, BlockNumber},
    clock::ManualClock,
    rpc::{methods, NodeId, NodeRpc},
};
use anyhow::Context as _;
use std::{
    io::IsTerminal as _,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

mod cluster;

pub use cluster::{Call, FakeCluster};

/// Installs a test log writer, honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_ansi(std::env::var("NO_COLOR").is_err() && std::io::stdout().is_terminal())
        .with_line_number(true)
        .try_init();
}

/// Locks `m`, ignoring poisoning.
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Finalized height of the network as a function of the time passed
/// since the nodes were started.
#[derive(Debug, Clone, Default)]
pub struct Timeline(Vec<(Duration, BlockNumber)>);

impl Timeline {
    /// Timeline from `(offset, finalized height)` points.
    pub fn new(points: impl IntoIterator<Item = (Duration, u64)>) -> Self {
        let mut points: Vec<_> = points
            .into_iter()
            .map(|(t, n)| (t, BlockNumber(n)))
            .collect();
        points.sort_by_key(|(t, _)| *t);
        Self(points)
    }

    /// Finalization stuck at `height` from the start.
    pub fn constant(height: u64) -> Self {
        Self::new([(Duration::ZERO, height)])
    }

    /// Finalized height after `elapsed`.
    pub fn at(&self, elapsed: Duration) -> BlockNumber {
        self.0
            .iter()
            .take_while(|(t, _)| *t <= elapsed)
            .last()
            .map_or(BlockNumber(0), |(_, n)| *n)
    }
}

/// Deterministic non-zero hash of the block at height `n`.
pub fn fake_hash(n: BlockNumber) -> BlockId {
    let mut bytes = vec![0; 32];
    bytes[0] = 0xab;
    bytes[1] = 0xc0;
    bytes[24..].copy_from_slice(&n.0.to_be_bytes());
    bytes.into()
}

fn number_of_fake_hash(hash: &str) -> anyhow::Result<BlockNumber> {
    let id: BlockId = hash.parse()?;
    let tail: [u8; 8] = id
        .as_bytes()
        .get(24..)
        .context("short hash")?
        .try_into()?;
    Ok(BlockNumber(u64::from_be_bytes(tail)))
}

#[derive(Debug)]
struct Running {
    timeline: Timeline,
    since: Instant,
}

#[derive(Debug)]
struct NetworkState {
    clock: ManualClock,
    running: Option<Running>,
}

#[derive(Debug, Clone)]
struct Behaviour {
    reachable: bool,
    hang: bool,
    failures: usize,
    archived: bool,
    lag: u64,
    spec_version: u64,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            reachable: true,
            hang: false,
            failures: 0,
            archived: true,
            lag: 0,
            spec_version: 1,
        }
    }
}

/// In-process network of fake nodes.
#[derive(Debug, Clone)]
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
    nodes: Vec<FakeNode>,
}

impl FakeNetwork {
    /// Network of `n` stopped nodes.
    pub fn new(clock: &ManualClock, n: usize) -> Self {
        let state = Arc::new(Mutex::new(NetworkState {
            clock: clock.clone(),
            running: None,
        }));
        let nodes = (0..n)
            .map(|i| FakeNode {
                id: NodeId(i),
                network: state.clone(),
                behaviour: Arc::default(),
            })
            .collect();
        Self { state, nodes }
    }

    /// Starts all nodes; finalization follows `timeline` from now on.
    pub fn start(&self, timeline: Timeline) {
        let mut state = lock(&self.state);
        let since = state.clock.now();
        state.running = Some(Running { timeline, since });
    }

    /// Stops all nodes. Calls fail until the next `start()`.
    pub fn stop(&self) {
        lock(&self.state).running = None;
    }

    /// Whether the nodes are running.
    pub fn is_running(&self) -> bool {
        lock(&self.state).running.is_some()
    }

    /// Node `i`.
    pub fn node(&self, i: usize) -> &FakeNode {
        &self.nodes[i]
    }

    /// Type-erased handles to all nodes.
    pub fn handles(&self) -> Vec<Arc<dyn NodeRpc>> {
        self.nodes
            .iter()
            .map(|n| Arc::new(n.clone()) as Arc<dyn NodeRpc>)
            .collect()
    }
}

/// Fake node answering the Substrate methods used by the harness.
#[derive(Debug, Clone)]
pub struct FakeNode {
    id: NodeId,
    network: Arc<Mutex<NetworkState>>,
    behaviour: Arc<Mutex<Behaviour>>,
}

impl FakeNode {
    /// Makes calls fail immediately (or succeed again).
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.behaviour).reachable = reachable;
    }

    /// Makes calls never complete.
    pub fn set_hang(&self, hang: bool) {
        lock(&self.behaviour).hang = hang;
    }

    /// Makes the next `n` calls fail.
    pub fn fail_next_calls(&self, n: usize) {
        lock(&self.behaviour).failures = n;
    }

    /// Whether `chain_getBlockHash` knows historical blocks.
    pub fn set_archived(&self, archived: bool) {
        lock(&self.behaviour).archived = archived;
    }

    /// Node finalizes `lag` blocks behind the network.
    pub fn set_lag(&self, lag: u64) {
        lock(&self.behaviour).lag = lag;
    }

    /// Reported runtime `specVersion`.
    pub fn set_spec_version(&self, v: u64) {
        lock(&self.behaviour).spec_version = v;
    }

    fn finalized(&self, lag: u64) -> anyhow::Result<BlockNumber> {
        let state = lock(&self.network);
        let running = state.running.as_ref().context("connection refused")?;
        let elapsed = state.clock.now().duration_since(running.since);
        Ok(BlockNumber(running.timeline.at(elapsed).0.saturating_sub(lag)))
    }
}

#[async_trait::async_trait]
impl NodeRpc for FakeNode {
    fn id(&self) -> NodeId {
        self.id
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let behaviour = {
            let mut b = lock(&self.behaviour);
            let before = b.clone();
            b.failures = b.failures.saturating_sub(1);
            before
        };
        if behaviour.hang {
            std::future::pending::<()>().await;
        }
        anyhow::ensure!(behaviour.reachable, "connection reset");
        anyhow::ensure!(behaviour.failures == 0, "request dropped");
        let finalized = self.finalized(behaviour.lag)?;
        // Best block runs a little ahead of finality.
        let highest = BlockNumber(finalized.0 + 2);
        let hex = |n: BlockNumber| format!("{:#x}", n.0);

        Ok(match method {
            m if m == methods::system_version::method() => "fake-node/1.0.0".into(),
            m if m == methods::runtime_version::method() => {
                serde_json::json!({ "specName": "fake", "specVersion": behaviour.spec_version })
            }
            m if m == methods::finalized_head::method() => fake_hash(finalized).to_string().into(),
            m if m == methods::header::method() => {
                let number = match params.first() {
                    None => highest,
                    Some(hash) => {
                        number_of_fake_hash(hash.as_str().context("hash param")?)?
                    }
                };
                serde_json::json!({ "number": hex(number), "parentHash": "0x00" })
            }
            m if m == methods::block_hash::method() => {
                let n = params
                    .first()
                    .and_then(serde_json::Value::as_u64)
                    .context("height param")?;
                if behaviour.archived && n <= highest.0 {
                    fake_hash(BlockNumber(n)).to_string().into()
                } else {
                    serde_json::Value::Null
                }
            }
            _ => anyhow::bail!("method {method} not found"),
        })
    }
}
