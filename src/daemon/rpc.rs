//! JSON-RPC 2.0 client for the CryptoNote daemon

use super::{BlockHeader, BlockTemplateResponse, DaemonInfo, DaemonRpc};
use crate::error::{DaemonError, Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

/// Daemon client configuration
#[derive(Debug, Clone)]
pub struct DaemonClientConfig {
    /// Full JSON-RPC endpoint, e.g. `http://127.0.0.1:18081/json_rpc`
    pub rpc_url: String,
    /// Per-call timeout
    pub timeout: Duration,
}

impl Default for DaemonClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:18081/json_rpc".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// HTTP JSON-RPC client for the daemon.
#[derive(Clone)]
pub struct DaemonClient {
    config: DaemonClientConfig,
    client: Client,
}

#[derive(Serialize)]
struct RpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct StatusOnly {
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct BlockHeaderEnvelope {
    block_header: BlockHeader,
}

impl DaemonClient {
    /// Create a new daemon client.
    pub fn new(config: DaemonClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(Error::Http)?;
        Ok(Self { config, client })
    }

    async fn call<P: Serialize, T: DeserializeOwned>(&self, method: &str, params: P) -> Result<T> {
        debug!(method, url = %self.config.rpc_url, "daemon rpc call");

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method,
            params,
        };

        let response = self
            .client
            .post(&self.config.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(method.to_string(), self.config.timeout)
                } else {
                    Error::daemon_unreachable(&self.config.rpc_url, e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(Error::Daemon(DaemonError::RpcFailure {
                method: method.to_string(),
                code: response.status().as_u16() as i64,
                message: "http error".to_string(),
            }));
        }

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| Error::daemon_bad_response(method, e.to_string()))?;

        if let Some(err) = envelope.error {
            return Err(Error::Daemon(DaemonError::RpcFailure {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            }));
        }

        envelope
            .result
            .ok_or_else(|| Error::daemon_bad_response(method, "missing result"))
    }
}

#[async_trait]
impl DaemonRpc for DaemonClient {
    async fn get_block_template(
        &self,
        wallet_address: &str,
        reserve_size: u32,
    ) -> Result<BlockTemplateResponse> {
        self.call(
            "get_block_template",
            json!({
                "wallet_address": wallet_address,
                "reserve_size": reserve_size,
            }),
        )
        .await
    }

    async fn submit_block(&self, blob_hex: &str) -> Result<()> {
        let response: StatusOnly = self.call("submit_block", json!([blob_hex])).await?;
        if response.status == "OK" || response.status.is_empty() {
            Ok(())
        } else {
            Err(Error::Daemon(DaemonError::SubmitRejected {
                status: response.status,
            }))
        }
    }

    async fn get_info(&self) -> Result<DaemonInfo> {
        self.call("get_info", json!({})).await
    }

    async fn get_block_header_by_hash(&self, hash: &str) -> Result<BlockHeader> {
        let envelope: BlockHeaderEnvelope = self
            .call("get_block_header_by_hash", json!({ "hash": hash }))
            .await?;
        Ok(envelope.block_header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_request_shape() {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: "0",
            method: "get_block_template",
            params: json!({"wallet_address": "44Abc", "reserve_size": 16}),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "get_block_template");
        assert_eq!(value["params"]["reserve_size"], 16);
    }

    #[test]
    fn test_envelope_with_error() {
        let json = r#"{"error":{"code":-7,"message":"Block not accepted"}}"#;
        let envelope: RpcEnvelope<StatusOnly> = serde_json::from_str(json).unwrap();
        assert!(envelope.result.is_none());
        assert_eq!(envelope.error.unwrap().code, -7);
    }

    #[test]
    fn test_block_template_response_parsing() {
        let json = r#"{
            "blocktemplate_blob": "0e0e",
            "difficulty": 226807339040,
            "height": 2891820,
            "prev_hash": "a6b1c5e3",
            "reserved_offset": 130,
            "seed_hash": "563b",
            "expected_reward": 600917000000,
            "status": "OK"
        }"#;
        let response: BlockTemplateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.height, 2891820);
        assert_eq!(response.reserved_offset, 130);
        assert_eq!(response.seed_hash.as_deref(), Some("563b"));
    }

    #[test]
    fn test_block_header_envelope_parsing() {
        let json = r#"{"block_header":{"height":100,"hash":"aa","reward":12,"depth":3,"orphan_status":false}}"#;
        let envelope: BlockHeaderEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.block_header.height, 100);
        assert!(!envelope.block_header.orphan_status);
    }
}
