//! Substrate JSON-RPC methods the harness relies on.
//! Each module names the method and decodes its result.
pub mod block_hash;
pub mod finalized_head;
pub mod header;
pub mod runtime_version;
pub mod system_version;
