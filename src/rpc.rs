//! Typed access to the coin daemon's JSON-RPC interface.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::error::RpcError;

/// Read-only chain data the indexer consumes.
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn get_block_count(&self) -> Result<u64, RpcError>;

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError>;

    async fn get_block(&self, hash: &str) -> Result<RawBlock, RpcError>;

    /// Verbose transaction lookup. Pruned or unindexed nodes answer `NotFound`.
    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawBlock {
    pub hash: String,
    pub height: u64,
    pub version: i32,
    #[serde(rename = "previousblockhash", default)]
    pub previous_block_hash: Option<String>,
    /// Absent for the current tip.
    #[serde(rename = "nextblockhash", default)]
    pub next_block_hash: Option<String>,
    #[serde(rename = "merkleroot")]
    pub merkle_root: String,
    pub time: i64,
    pub bits: String,
    pub nonce: u64,
    pub size: u64,
    pub difficulty: Decimal,
    pub tx: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawTransaction {
    pub txid: String,
    pub size: u64,
    pub version: i32,
    pub locktime: u64,
    pub vin: Vec<RawInput>,
    pub vout: Vec<RawOutput>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawInput {
    /// Previous transaction; absent on coinbase inputs.
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: Option<ScriptSig>,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptSig {
    pub asm: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawOutput {
    pub value: Decimal,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScriptPubKey {
    pub asm: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl ScriptPubKey {
    /// Owning address. Older daemons report a list, newer ones a single field.
    pub fn owner(&self) -> Option<&str> {
        self.addresses
            .first()
            .or(self.address.as_ref())
            .map(String::as_str)
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorPayload>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorPayload {
    code: i64,
    message: String,
}

/// Decode a JSON-RPC reply body. Amounts stay exact through serde_json's
/// arbitrary precision numbers.
pub fn decode_response<R: DeserializeOwned>(body: &[u8]) -> Result<R, RpcError> {
    let response: JsonRpcResponse<R> = serde_json::from_slice(body)
        .map_err(|e| RpcError::Transport(format!("malformed response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(RpcError::from_payload(error.code, error.message));
    }

    response.result.ok_or_else(|| RpcError::Rpc {
        code: RpcError::MISSING_RESULT,
        message: "missing JSON-RPC result".to_string(),
    })
}

/// HTTP JSON-RPC client for a bitcoind-style daemon.
pub struct JsonRpcClient {
    http_client: reqwest::Client,
    url: String,
    user: Option<String>,
    password: Option<String>,
    request_id: AtomicU64,
}

impl JsonRpcClient {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(
        url: impl Into<String>,
        user: Option<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: url.into(),
            user,
            password,
            request_id: AtomicU64::new(0),
        })
    }

    /// Invoke `method` with positional `params`.
    pub async fn call<R: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<R, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method, id, "rpc call");

        let mut builder = self.http_client.post(&self.url).json(&request);
        if let Some(user) = &self.user {
            builder = builder.basic_auth(user, self.password.as_ref());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        decode_response(&body)
    }
}

#[async_trait]
impl ChainSource for JsonRpcClient {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        self.call("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        self.call("getblockhash", json!([height])).await
    }

    async fn get_block(&self, hash: &str) -> Result<RawBlock, RpcError> {
        self.call("getblock", json!([hash])).await
    }

    async fn get_raw_transaction(&self, txid: &str) -> Result<RawTransaction, RpcError> {
        self.call("getrawtransaction", json!([txid, 1])).await
    }
}
