//! Upstream daemon communication
//!
//! The daemon is an injected collaborator: the pool core only sees the
//! [`DaemonRpc`] trait. The JSON-RPC client, retry policies, and the
//! template feed live here.

mod poller;
mod retry;
mod rpc;

pub use poller::{TemplateFeed, TemplateFeedConfig, TemplateStream};
pub use retry::RetryPolicy;
pub use rpc::{DaemonClient, DaemonClientConfig};

use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Raw `get_block_template` response fields.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockTemplateResponse {
    pub blocktemplate_blob: String,
    pub difficulty: u64,
    pub height: u64,
    pub prev_hash: String,
    pub reserved_offset: u64,
    #[serde(default)]
    pub seed_hash: Option<String>,
    #[serde(default)]
    pub expected_reward: u64,
    #[serde(default)]
    pub status: String,
}

/// Subset of `get_info` the pool cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonInfo {
    pub height: u64,
    pub difficulty: u64,
    #[serde(default)]
    pub top_block_hash: String,
    #[serde(default)]
    pub status: String,
}

/// One block header, from `get_block_header_by_hash`.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub hash: String,
    #[serde(default)]
    pub reward: u64,
    #[serde(default)]
    pub depth: u64,
    #[serde(default)]
    pub orphan_status: bool,
}

/// The daemon RPC surface required by the pool core.
#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// Fetch a block template paying `wallet_address`, reserving
    /// `reserve_size` bytes for pool nonces.
    async fn get_block_template(
        &self,
        wallet_address: &str,
        reserve_size: u32,
    ) -> Result<BlockTemplateResponse>;

    /// Submit an assembled block blob.
    async fn submit_block(&self, blob_hex: &str) -> Result<()>;

    /// Current chain state.
    async fn get_info(&self) -> Result<DaemonInfo>;

    /// Look up a block header by its hash.
    async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeader>;
}
