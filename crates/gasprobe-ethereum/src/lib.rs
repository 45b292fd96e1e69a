use alloy_primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod quantity;
pub mod revert;
pub mod types;

mod client;
pub use client::Client;

#[cfg(feature = "testing")]
pub mod testing;

pub use alloy_primitives;
pub use quantity::{HexQuantity, Quantity};
use types::{Block, BlockTag, FeeData, TransactionReceipt, TransactionRequest};

/// A failure surfaced by the node or by the way to the node.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Error {
    /// The node processed the request and rejected it
    #[error("rpc fault {0}")]
    Rpc(RpcFault),

    /// The request never got a well-formed answer: unreachable endpoint, timeout, malformed response
    #[error("transport fault: {cause}")]
    Transport { cause: String },
}

impl Error {
    pub fn transport(cause: impl Into<String>) -> Self {
        Self::Transport { cause: cause.into() }
    }

    pub fn rpc(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        Self::Rpc(RpcFault::new(code, message, data))
    }
}

/// Structured error object returned by the node.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("code={code} message={message}")]
pub struct RpcFault {
    pub code: i64,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Revert reason decoded from `data` or `message`, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RpcFault {
    pub fn new(code: i64, message: impl Into<String>, data: Option<Value>) -> Self {
        let message = message.into();
        let reason = revert::reason_from_fault(&message, data.as_ref());

        Self { code, message, data, reason }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8545".to_string()
}

fn default_timeout() -> u64 {
    10
}

fn default_receipt_poll_interval() -> u64 {
    1000
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request timeout, in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default)]
    pub fallbacks: Vec<String>,

    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout: default_timeout(),
            fallbacks: vec![],
            receipt_poll_interval_ms: default_receipt_poll_interval(),
        }
    }
}

/// Capability to talk to an Ethereum-compatible node.
///
/// Implementations must keep node-side rejections ([`Error::Rpc`]) apart from transport
/// failures ([`Error::Transport`]). State-mutating calls sign on behalf of a sender the
/// implementation already controls; no key material crosses this boundary.
#[async_trait]
pub trait RpcAdapter: Send + Sync {
    async fn chain_id(&self) -> Result<u64, Error>;

    async fn get_block(&self, tag: BlockTag) -> Result<Option<Block>, Error>;

    async fn get_balance(&self, address: Address) -> Result<U256, Error>;

    async fn get_code(&self, address: Address) -> Result<Bytes, Error>;

    async fn call(&self, transaction: &TransactionRequest) -> Result<Bytes, Error>;

    async fn estimate_gas(&self, transaction: &TransactionRequest) -> Result<U256, Error>;

    async fn get_fee_data(&self) -> Result<FeeData, Error>;

    async fn send_transaction(&self, transaction: &TransactionRequest) -> Result<B256, Error>;

    async fn get_transaction(&self, hash: B256) -> Result<Option<Value>, Error>;

    async fn get_transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, Error>;

    /// Pause between two receipt lookups of [`RpcAdapter::wait_for_receipt`].
    fn receipt_poll_interval(&self) -> std::time::Duration;

    /// Polls until the transaction is mined. Callers bound the wait.
    async fn wait_for_receipt(&self, hash: B256) -> Result<TransactionReceipt, Error> {
        loop {
            if let Some(receipt) = self.get_transaction_receipt(hash).await? {
                return Ok(receipt);
            }

            tokio::time::sleep(self.receipt_poll_interval()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn rpc_fault_decodes_reason_from_message() {
        let fault = RpcFault::new(3, "execution reverted: insufficient balance", None);

        assert_eq!(fault.reason.as_deref(), Some("insufficient balance"));
    }

    #[test]
    fn rpc_fault_without_reason() {
        let fault = RpcFault::new(-32603, "Invalid call", Some(json!("0x")));

        assert!(fault.reason.is_none());
    }

    #[test]
    fn errors_serialize_with_kind_tag() {
        let value = serde_json::to_value(Error::transport("connection refused")).unwrap();

        assert_eq!(value, json!({ "kind": "transport", "cause": "connection refused" }));
    }

    #[test]
    fn configuration_defaults() {
        let configuration: Configuration = serde_json::from_str(r#"{ "endpoint": "http://node:8545" }"#).unwrap();

        assert_eq!(configuration.timeout, 10);
        assert!(configuration.fallbacks.is_empty());
        assert_eq!(configuration.receipt_poll_interval_ms, 1000);
    }
}
