use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DeserializeFromStr, SerializeDisplay};

use crate::quantity::{HexQuantity, Quantity};

/// Block selector accepted by the node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub enum BlockTag {
    #[default]
    Latest,
    Earliest,
    Pending,
    Safe,
    Finalized,
    Number(u64),
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Earliest => write!(f, "earliest"),
            Self::Pending => write!(f, "pending"),
            Self::Safe => write!(f, "safe"),
            Self::Finalized => write!(f, "finalized"),
            Self::Number(n) => write!(f, "{:#x}", n),
        }
    }
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "earliest" => Ok(Self::Earliest),
            "pending" => Ok(Self::Pending),
            "safe" => Ok(Self::Safe),
            "finalized" => Ok(Self::Finalized),
            s => crate::quantity::parse_quantity(s)
                .and_then(|n| u64::try_from(n).ok())
                .map(Self::Number)
                .ok_or_else(|| format!("invalid block tag {}", s)),
        }
    }
}

/// Subset of a block header the diagnostics rely on.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(default)]
    #[serde_as(as = "Option<Quantity>")]
    pub number: Option<u64>,

    #[serde(default)]
    pub hash: Option<B256>,

    #[serde_as(as = "Quantity")]
    pub gas_limit: U256,

    #[serde_as(as = "Quantity")]
    pub gas_used: U256,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub base_fee_per_gas: Option<U256>,

    #[serde_as(as = "Quantity")]
    pub timestamp: u64,
}

/// Current fee market as seen by the node.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeData {
    #[serde_as(as = "Option<Quantity>")]
    pub gas_price: Option<U256>,

    #[serde_as(as = "Option<Quantity>")]
    pub max_fee_per_gas: Option<U256>,

    #[serde_as(as = "Option<Quantity>")]
    pub max_priority_fee_per_gas: Option<U256>,
}

/// Transaction object for `eth_call`, `eth_estimateGas` and `eth_sendTransaction`.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Address>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub value: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none", alias = "input")]
    pub data: Option<Bytes>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub gas_price: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub max_fee_per_gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub max_priority_fee_per_gas: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub nonce: Option<u64>,

    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub transaction_type: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<HexQuantity>")]
    pub chain_id: Option<u64>,
}

impl TransactionRequest {
    pub const LEGACY: u64 = 0;
    pub const EIP1559: u64 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn with_to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_gas(mut self, gas: U256) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn with_type(mut self, transaction_type: u64) -> Self {
        self.transaction_type = Some(transaction_type);
        self
    }

    /// Type 0 transaction paying `gas_price`.
    pub fn legacy(mut self, gas_price: U256) -> Self {
        self.transaction_type = Some(Self::LEGACY);
        self.gas_price = Some(gas_price);
        self.max_fee_per_gas = None;
        self.max_priority_fee_per_gas = None;
        self
    }

    /// Type 2 transaction with explicit fee caps.
    pub fn eip1559(mut self, max_fee_per_gas: U256, max_priority_fee_per_gas: U256) -> Self {
        self.transaction_type = Some(Self::EIP1559);
        self.gas_price = None;
        self.max_fee_per_gas = Some(max_fee_per_gas);
        self.max_priority_fee_per_gas = Some(max_priority_fee_per_gas);
        self
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: B256,

    #[serde(default)]
    #[serde_as(as = "Option<Quantity>")]
    pub block_number: Option<u64>,

    #[serde_as(as = "Quantity")]
    pub gas_used: U256,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub effective_gas_price: Option<U256>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub status: Option<u64>,
}

impl TransactionReceipt {
    /// Pre-byzantium receipts carry no status and count as successful.
    pub fn is_success(&self) -> bool {
        self.status.map(|status| status == 1).unwrap_or(true)
    }
}
