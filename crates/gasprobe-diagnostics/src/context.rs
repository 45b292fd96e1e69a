use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use gasprobe_ethereum::types::BlockTag;
use gasprobe_ethereum::{Quantity, RpcAdapter};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::{instrument, warn};

use crate::registry::{ParamValue, ProbeSpec};

/// Read-only snapshot every probe of a run is judged against. Captured once, before the
/// first probe is dispatched.
#[serde_as]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub block_number: Option<u64>,

    #[serde(default)]
    #[serde_as(as = "Option<Quantity>")]
    pub block_gas_limit: Option<U256>,

    /// Balances of the senders named by the probes
    #[serde(default)]
    #[serde_as(as = "BTreeMap<_, Quantity>")]
    pub balances: BTreeMap<Address, U256>,

    /// Every literal `from` address of the plan, whether or not its balance could be read
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub senders: BTreeSet<Address>,
}

impl ClassificationContext {
    pub fn new(block_gas_limit: U256) -> Self {
        Self {
            block_gas_limit: Some(block_gas_limit),
            ..Self::default()
        }
    }

    pub fn with_balance(mut self, address: Address, balance: U256) -> Self {
        self.senders.insert(address);
        self.balances.insert(address, balance);
        self
    }

    pub fn is_sender(&self, address: &Address) -> bool {
        self.senders.contains(address)
    }

    pub fn balance_of(&self, address: &Address) -> Option<U256> {
        self.balances.get(address).copied()
    }

    /// Reads the latest block and the balance of every literal `from` address of the plan.
    /// Each read is bounded by `timeout`. Failures leave the corresponding entry unknown; the
    /// run goes on without it.
    #[instrument(name = "capture_context", skip(adapter, plan))]
    pub async fn capture(adapter: &dyn RpcAdapter, plan: &[ProbeSpec], timeout: Duration) -> Self {
        let mut context = Self {
            senders: senders(plan),
            ..Self::default()
        };

        match tokio::time::timeout(timeout, adapter.get_block(BlockTag::Latest)).await {
            Ok(Ok(Some(block))) => {
                context.block_number = block.number;
                context.block_gas_limit = Some(block.gas_limit);
            },
            Ok(Ok(None)) => warn!("latest block not available, block gas limit unknown"),
            Ok(Err(e)) => warn!(error = %e, "could not read latest block, block gas limit unknown"),
            Err(_) => warn!(timeout_ms = timeout.as_millis() as u64, "latest block read timed out, block gas limit unknown"),
        }

        for sender in context.senders.clone() {
            match tokio::time::timeout(timeout, adapter.get_balance(sender)).await {
                Ok(Ok(balance)) => {
                    context.balances.insert(sender, balance);
                },
                Ok(Err(e)) => warn!(error = %e, sender = %sender, "could not read sender balance"),
                Err(_) => warn!(sender = %sender, timeout_ms = timeout.as_millis() as u64, "sender balance read timed out"),
            }
        }

        context
    }
}

fn senders(plan: &[ProbeSpec]) -> BTreeSet<Address> {
    plan.iter()
        .filter(|spec| spec.method.takes_transaction())
        .filter_map(|spec| match spec.params.get("from") {
            Some(ParamValue::Literal(value)) => serde_json::from_value(value.clone()).ok(),
            _ => None,
        })
        .collect()
}
