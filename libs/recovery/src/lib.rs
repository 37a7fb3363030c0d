//! Finality stall detection and recovery.
//!
//! Drives a validator cluster until finalization stalls, resolves the hash
//! of the stalled block, substitutes a fixing runtime for that block in the
//! chain spec (`codeSubstitutes`), restarts the cluster with the patched
//! chain spec and checks that finalization resumes.
//!
//! Process management and the RPC transport are behind the
//! [`controller::ClusterController`] and [`rpc::NodeRpc`] traits.
pub mod block;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod resolver;
pub mod rpc;
pub mod scenario;
pub mod stall;
pub mod testonly;

pub use block::{BlockId, BlockNumber};
pub use config::ScenarioConfig;
pub use scenario::{RecoveryReport, Scenario, ScenarioError};
