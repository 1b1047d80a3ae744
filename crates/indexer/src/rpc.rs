//! Node RPC client.
//!
//! The engine consumes parsed [`RawBlock`] documents and never talks to
//! the network itself; everything HTTP lives here. [`NodeRpc`] is the
//! async boundary the sync loop drives, [`NodeClient`] its production
//! implementation over the node's JSON endpoints, and [`RightsBridge`]
//! the synchronous adapter that lets the engine ask for a one-off
//! baking right from inside a block commit.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};
use tokio::runtime::Handle;

use tzmirror_engine::{IndexError, RightsFallback};
use tzmirror_types::config::NodeConfig;
use tzmirror_types::raw::RawBlock;
use tzmirror_types::Level;

/// Node RPC failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum RpcError {
    /// The HTTP client could not be constructed.
    #[snafu(display("failed to build http client: {source}"))]
    Client { source: reqwest::Error },

    /// The request did not complete (connection refused, timeout).
    #[snafu(display("request to {url} failed: {source}"))]
    Request { url: String, source: reqwest::Error },

    /// The node answered with a non-success status.
    #[snafu(display("{url} returned status {status}"))]
    Status { url: String, status: u16 },

    /// The response body did not parse as the expected document.
    #[snafu(display("failed to decode response from {url}: {source}"))]
    Decode { url: String, source: reqwest::Error },
}

/// Unified result type for RPC calls.
pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// The node queries the sync loop needs.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Level of the node's current head.
    async fn head_level(&self) -> Result<Level>;

    /// The full raw block at `level`.
    async fn block_at(&self, level: Level) -> Result<RawBlock>;

    /// Address of the delegate holding the baking right at
    /// (level, round), or `None` if the node cannot say.
    async fn baking_right(&self, level: Level, round: i32) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct HeadHeader {
    level: Level,
}

#[derive(Debug, Deserialize)]
struct RawRight {
    delegate: String,
    #[serde(default)]
    round: i32,
}

fn right_for_round(rights: &[RawRight], round: i32) -> Option<String> {
    rights
        .iter()
        .find(|r| r.round == round)
        .map(|r| r.delegate.clone())
}

/// HTTP client against a node's JSON RPC.
pub struct NodeClient {
    endpoint: String,
    http: reqwest::Client,
}

impl NodeClient {
    /// Builds a client for the configured endpoint.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context(ClientSnafu)?;
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/{path}", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context(RequestSnafu { url: url.clone() })?;
        ensure!(
            response.status().is_success(),
            StatusSnafu { url: url.clone(), status: response.status().as_u16() }
        );
        response.json().await.context(DecodeSnafu { url })
    }
}

#[async_trait]
impl NodeRpc for NodeClient {
    async fn head_level(&self) -> Result<Level> {
        let header: HeadHeader = self.get_json("chains/main/blocks/head/header").await?;
        Ok(header.level)
    }

    async fn block_at(&self, level: Level) -> Result<RawBlock> {
        self.get_json(&format!("chains/main/blocks/{level}")).await
    }

    async fn baking_right(&self, level: Level, round: i32) -> Result<Option<String>> {
        let rights: Vec<RawRight> = self
            .get_json(&format!(
                "chains/main/blocks/head/helpers/baking_rights?level={level}&max_round={round}"
            ))
            .await?;
        Ok(right_for_round(&rights, round))
    }
}

/// Synchronous adapter from the engine's rights fallback to the async
/// node client.
///
/// The engine asks for a right while holding a write transaction, on a
/// runtime worker thread. `block_in_place` moves that worker's queued
/// work elsewhere so `block_on` can wait without stalling the runtime;
/// this requires the multi-threaded runtime.
pub struct RightsBridge {
    rpc: Arc<dyn NodeRpc>,
    handle: Handle,
}

impl RightsBridge {
    /// Bridges `rpc` onto the runtime behind `handle`.
    #[must_use]
    pub fn new(rpc: Arc<dyn NodeRpc>, handle: Handle) -> Self {
        Self { rpc, handle }
    }
}

impl RightsFallback for RightsBridge {
    fn baking_right(&self, level: Level, round: i32) -> tzmirror_engine::Result<Option<String>> {
        let rpc = Arc::clone(&self.rpc);
        let handle = self.handle.clone();
        tokio::task::block_in_place(move || {
            handle.block_on(async move { rpc.baking_right(level, round).await })
        })
        .map_err(|source| IndexError::Rpc { message: source.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_header_parses() {
        let header: HeadHeader = serde_json::from_value(serde_json::json!({
            "level": 812345,
            "predecessor": "BKx1",
            "timestamp": "2024-06-01T00:00:00Z"
        }))
        .expect("parse header");
        assert_eq!(header.level, 812_345);
    }

    #[test]
    fn test_right_for_round_matches_exact_round() {
        let rights: Vec<RawRight> = serde_json::from_value(serde_json::json!([
            { "delegate": "tz1round0", "round": 0 },
            { "delegate": "tz1round2", "round": 2 }
        ]))
        .expect("parse rights");
        assert_eq!(right_for_round(&rights, 2), Some("tz1round2".to_string()));
        assert_eq!(right_for_round(&rights, 1), None);
    }

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let config = NodeConfig::builder().endpoint("http://localhost:8732/").build();
        let client = NodeClient::new(&config).expect("build client");
        assert_eq!(client.endpoint, "http://localhost:8732");
    }
}
