//! Collaborators of the finality recovery harness: a cluster of local node
//! processes and a JSON-RPC client for a single node.
pub mod config;
pub mod http;
pub mod keys;
pub mod local;


pub use http::HttpNode;
pub use local::LocalCluster;
