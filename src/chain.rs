/// Blockchain RPC client
///
/// `ChainRpc` is the seam between the ledger and the chain: deposit
/// confirmation looks transactions up through it and withdrawals send
/// transfers through it. `RpcChainClient` talks to a Solana JSON-RPC node
/// and to a treasury signer service; tests substitute their own impl.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::config::Config;

/// Program id of the SPL memo program
pub const MEMO_PROGRAM_ID: &str = "MemoSq4gqABAXKb96qnH8TysNcWxMyWCqXgDLGmfcHr";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("RPC request failed: {0}")]
    Request(String),

    #[error("Invalid RPC response: {0}")]
    InvalidResponse(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Rejected by remote: {0}")]
    Rejected(String),
}

// ============================================================================
// TRANSACTION VIEW
// ============================================================================

/// The parts of a confirmed transaction deposit verification needs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub failed: bool,
    pub account_keys: Vec<String>,
    /// Lamports, indexed like `account_keys`
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub instructions: Vec<ChainInstruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainInstruction {
    pub program_id: String,
    pub data: Vec<u8>,
}

impl ChainTransaction {
    pub fn account_index(&self, key: &str) -> Option<usize> {
        self.account_keys.iter().position(|k| k == key)
    }

    /// Lamports gained by the account at `index` (0 if it lost funds).
    pub fn received(&self, index: usize) -> u64 {
        let pre = self.pre_balances.get(index).copied().unwrap_or(0);
        let post = self.post_balances.get(index).copied().unwrap_or(0);
        post.saturating_sub(pre)
    }

    pub fn memos(&self) -> impl Iterator<Item = &[u8]> {
        self.instructions
            .iter()
            .filter(|ix| ix.program_id == MEMO_PROGRAM_ID)
            .map(|ix| ix.data.as_slice())
    }
}

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Look up a confirmed transaction. `Ok(None)` if the node doesn't know it.
    async fn get_transaction(&self, signature: &str) -> Result<Option<ChainTransaction>, ChainError>;

    /// Send `lamports` from the treasury to `to`, returning the signature.
    async fn send_transfer(&self, to: &str, lamports: u64) -> Result<String, ChainError>;
}

// ============================================================================
// JSON-RPC WIRE TYPES
// ============================================================================

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransaction {
    meta: Option<RpcMeta>,
    transaction: RpcInner,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMeta {
    err: Option<Value>,
    #[serde(default)]
    pre_balances: Vec<u64>,
    #[serde(default)]
    post_balances: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct RpcInner {
    message: RpcMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcMessage {
    account_keys: Vec<RpcAccountKey>,
    #[serde(default)]
    instructions: Vec<RpcInstruction>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RpcAccountKey {
    Plain(String),
    Parsed { pubkey: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcInstruction {
    program_id: String,
    #[serde(default)]
    parsed: Option<Value>,
}

impl From<RpcTransaction> for ChainTransaction {
    fn from(raw: RpcTransaction) -> Self {
        let (failed, pre_balances, post_balances) = match raw.meta {
            Some(meta) => (
                meta.err.map(|e| !e.is_null()).unwrap_or(false),
                meta.pre_balances,
                meta.post_balances,
            ),
            None => (false, Vec::new(), Vec::new()),
        };

        let account_keys = raw
            .transaction
            .message
            .account_keys
            .into_iter()
            .map(|key| match key {
                RpcAccountKey::Plain(k) => k,
                RpcAccountKey::Parsed { pubkey } => pubkey,
            })
            .collect();

        // jsonParsed renders memo data as a plain string
        let instructions = raw
            .transaction
            .message
            .instructions
            .into_iter()
            .map(|ix| ChainInstruction {
                data: match ix.parsed {
                    Some(Value::String(s)) => s.into_bytes(),
                    _ => Vec::new(),
                },
                program_id: ix.program_id,
            })
            .collect();

        ChainTransaction {
            failed,
            account_keys,
            pre_balances,
            post_balances,
            instructions,
        }
    }
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    to: &'a str,
    lamports: u64,
}

#[derive(Debug, Deserialize)]
struct TransferResponse {
    signature: Option<String>,
    error: Option<String>,
}

// ============================================================================
// RPC CLIENT
// ============================================================================

pub struct RpcChainClient {
    rpc_url: Option<String>,
    signer_url: Option<String>,
    client: Client,
}

impl RpcChainClient {
    pub fn new(rpc_url: Option<String>, signer_url: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            rpc_url,
            signer_url,
            client,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.solana_rpc_url.clone(),
            config.treasury_signer_url.clone(),
            config.rpc_timeout,
        )
    }
}

#[async_trait]
impl ChainRpc for RpcChainClient {
    async fn get_transaction(&self, signature: &str) -> Result<Option<ChainTransaction>, ChainError> {
        let url = self
            .rpc_url
            .as_deref()
            .ok_or(ChainError::NotConfigured("SOLANA_RPC_URL"))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getTransaction",
            "params": [
                signature,
                { "encoding": "jsonParsed", "commitment": "confirmed", "maxSupportedTransactionVersion": 0 }
            ]
        });

        let response = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChainError::Request(format!(
                "RPC returned status {}",
                response.status()
            )));
        }

        let body: RpcResponse<RpcTransaction> = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(err) = body.error {
            return Err(ChainError::Rejected(format!("{} (code {})", err.message, err.code)));
        }
        Ok(body.result.map(ChainTransaction::from))
    }

    async fn send_transfer(&self, to: &str, lamports: u64) -> Result<String, ChainError> {
        let url = self
            .signer_url
            .as_deref()
            .ok_or(ChainError::NotConfigured("TREASURY_SIGNER_URL"))?;

        let response = self
            .client
            .post(url)
            .json(&TransferRequest { to, lamports })
            .send()
            .await
            .map_err(|e| ChainError::Request(e.to_string()))?;

        let status = response.status();
        let body: TransferResponse = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        match (status.is_success(), body.signature, body.error) {
            (true, Some(signature), _) => Ok(signature),
            (_, _, Some(error)) => Err(ChainError::Rejected(error)),
            (_, _, None) => Err(ChainError::Rejected(format!(
                "signer returned status {} without a signature",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_parsed_transaction() {
        let raw = json!({
            "meta": { "err": null, "preBalances": [5_000_000_000u64, 1_000, 1], "postBalances": [3_999_995_000u64, 1_000_001_000, 1] },
            "transaction": {
                "message": {
                    "accountKeys": [
                        { "pubkey": "Sender1", "signer": true, "writable": true },
                        { "pubkey": "Treasury1", "signer": false, "writable": true },
                        "11111111111111111111111111111111"
                    ],
                    "instructions": [
                        { "program": "system", "programId": "11111111111111111111111111111111", "parsed": { "type": "transfer" } },
                        { "program": "spl-memo", "programId": MEMO_PROGRAM_ID, "parsed": "DEP_abc" }
                    ]
                }
            }
        });

        let tx: ChainTransaction = serde_json::from_value::<RpcTransaction>(raw).unwrap().into();
        assert!(!tx.failed);
        assert_eq!(tx.account_index("Treasury1"), Some(1));
        assert_eq!(tx.received(1), 1_000_000_000);
        assert_eq!(tx.received(0), 0);
        let memos: Vec<&[u8]> = tx.memos().collect();
        assert_eq!(memos, vec![b"DEP_abc".as_slice()]);
    }

    #[test]
    fn test_failed_transaction_flag() {
        let raw = json!({
            "meta": { "err": { "InstructionError": [0, "Custom"] }, "preBalances": [], "postBalances": [] },
            "transaction": { "message": { "accountKeys": [] } }
        });
        let tx: ChainTransaction = serde_json::from_value::<RpcTransaction>(raw).unwrap().into();
        assert!(tx.failed);
    }

    #[tokio::test]
    async fn test_unconfigured_client() {
        let client = RpcChainClient::new(None, None, Duration::from_secs(1));
        assert_eq!(
            client.get_transaction("sig").await,
            Err(ChainError::NotConfigured("SOLANA_RPC_URL"))
        );
        assert_eq!(
            client.send_transfer("wallet", 1).await,
            Err(ChainError::NotConfigured("TREASURY_SIGNER_URL"))
        );
    }
}
