//! JSON-RPC over HTTP.
use finality_recovery::rpc::{NodeId, NodeRpc};
use jsonrpsee::{
    core::{client::ClientT, params::ArrayParams},
    http_client::{HttpClient, HttpClientBuilder},
};
use std::{fmt, time::Duration};

/// Node reachable over HTTP JSON-RPC.
pub struct HttpNode {
    id: NodeId,
    url: String,
    client: HttpClient,
}

impl fmt::Debug for HttpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpNode")
            .field("id", &self.id)
            .field("url", &self.url)
            .finish()
    }
}

impl HttpNode {
    /// Client of the node `id` listening at `url`.
    pub fn new(id: NodeId, url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(&url)?;
        Ok(Self { id, url, client })
    }

    /// Client of the node `id` with its RPC port on localhost.
    pub fn local(id: NodeId, port: u16, timeout: Duration) -> anyhow::Result<Self> {
        Self::new(id, format!("http://127.0.0.1:{port}"), timeout)
    }

    /// Endpoint of the node.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait::async_trait]
impl NodeRpc for HttpNode {
    fn id(&self) -> NodeId {
        self.id
    }

    async fn call(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let mut p = ArrayParams::new();
        for v in params {
            p.insert(v)?;
        }
        Ok(self.client.request(method, p).await?)
    }
}
