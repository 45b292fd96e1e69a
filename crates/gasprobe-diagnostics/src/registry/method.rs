use alloy_primitives::{Address, B256};
use gasprobe_ethereum::types::{BlockTag, TransactionRequest};
use gasprobe_ethereum::{Error, RpcAdapter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Adapter operation a probe invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcMethod {
    ChainId,
    GetBlock,
    GetBalance,
    GetCode,
    Call,
    EstimateGas,
    GetFeeData,
    SendTransaction,
    WaitForReceipt,
    GetTransaction,
    GetTransactionReceipt,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainId => "chain_id",
            Self::GetBlock => "get_block",
            Self::GetBalance => "get_balance",
            Self::GetCode => "get_code",
            Self::Call => "call",
            Self::EstimateGas => "estimate_gas",
            Self::GetFeeData => "get_fee_data",
            Self::SendTransaction => "send_transaction",
            Self::WaitForReceipt => "wait_for_receipt",
            Self::GetTransaction => "get_transaction",
            Self::GetTransactionReceipt => "get_transaction_receipt",
        }
    }

    /// Whether the method takes a transaction object as parameters.
    pub fn takes_transaction(&self) -> bool {
        matches!(self, Self::Call | Self::EstimateGas | Self::SendTransaction)
    }

    /// Decodes resolved parameters into a ready-to-send invocation.
    pub fn decode(&self, params: Value) -> Result<Invocation, String> {
        let invocation = match self {
            Self::ChainId => {
                decode::<NoParams>(params)?;
                Invocation::ChainId
            },
            Self::GetBlock => Invocation::GetBlock(decode::<BlockParams>(params)?.tag),
            Self::GetBalance => Invocation::GetBalance(decode::<AddressParams>(params)?.address),
            Self::GetCode => Invocation::GetCode(decode::<AddressParams>(params)?.address),
            Self::Call => Invocation::Call(decode(params)?),
            Self::EstimateGas => Invocation::EstimateGas(decode(params)?),
            Self::GetFeeData => {
                decode::<NoParams>(params)?;
                Invocation::GetFeeData
            },
            Self::SendTransaction => Invocation::SendTransaction(decode(params)?),
            Self::WaitForReceipt => Invocation::WaitForReceipt(decode::<HashParams>(params)?.hash),
            Self::GetTransaction => Invocation::GetTransaction(decode::<HashParams>(params)?.hash),
            Self::GetTransactionReceipt => Invocation::GetTransactionReceipt(decode::<HashParams>(params)?.hash),
        };

        Ok(invocation)
    }
}

fn decode<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|e| e.to_string())
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BlockParams {
    #[serde(default)]
    tag: BlockTag,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AddressParams {
    address: Address,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct HashParams {
    hash: B256,
}

/// A decoded adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    ChainId,
    GetBlock(BlockTag),
    GetBalance(Address),
    GetCode(Address),
    Call(TransactionRequest),
    EstimateGas(TransactionRequest),
    GetFeeData,
    SendTransaction(TransactionRequest),
    WaitForReceipt(B256),
    GetTransaction(B256),
    GetTransactionReceipt(B256),
}

impl Invocation {
    /// Runs the call against the adapter. Quantities come back as decimal strings so that
    /// later probes and the report read them the same way.
    pub async fn invoke(self, adapter: &dyn RpcAdapter) -> Result<Value, Error> {
        let value = match self {
            Self::ChainId => Value::from(adapter.chain_id().await?),
            Self::GetBlock(tag) => to_value(adapter.get_block(tag).await?),
            Self::GetBalance(address) => Value::String(adapter.get_balance(address).await?.to_string()),
            Self::GetCode(address) => to_value(adapter.get_code(address).await?),
            Self::Call(transaction) => to_value(adapter.call(&transaction).await?),
            Self::EstimateGas(transaction) => Value::String(adapter.estimate_gas(&transaction).await?.to_string()),
            Self::GetFeeData => to_value(adapter.get_fee_data().await?),
            Self::SendTransaction(transaction) => to_value(adapter.send_transaction(&transaction).await?),
            Self::WaitForReceipt(hash) => to_value(adapter.wait_for_receipt(hash).await?),
            Self::GetTransaction(hash) => adapter.get_transaction(hash).await?.unwrap_or(Value::Null),
            Self::GetTransactionReceipt(hash) => to_value(adapter.get_transaction_receipt(hash).await?),
        };

        Ok(value)
    }
}

fn to_value<T: Serialize>(value: T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
