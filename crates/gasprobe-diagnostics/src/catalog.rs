//! Ready-made probe sets.
//!
//! [`standard_registry`] covers the network, the EVM state the probes rely on, transfer
//! simulations and gas estimates, and optionally real submissions signed by the node-side
//! account of the sender. [`inspection_registry`] looks up a transaction already sent.

use alloy_primitives::{address, Address, Bytes, B256, U256};
use gasprobe_ethereum::types::TransactionRequest;
use gasprobe_ethereum::Quantity;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use serde_with::serde_as;

use crate::registry::{ProbeRegistry, ProbeSpec, RegistryError, RpcMethod};

pub const TRANSFER_GAS: u64 = 21_000;
pub const SUBMISSION_GAS: u64 = 100_000;

/// 2.5 gwei
pub const SUBMISSION_PRIORITY_FEE: u64 = 2_500_000_000;

const RECOVER_PRECOMPILE: Address = address!("0000000000000000000000000000000000000001");
const IDENTITY_PRECOMPILE: Address = address!("0000000000000000000000000000000000000004");
const IDENTITY_PAYLOAD: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfiguration {
    /// Account unlocked on the node. Sender-bound probes are left out without it.
    #[serde(default)]
    pub sender: Option<Address>,

    #[serde(default = "default_recipient")]
    pub recipient: Address,

    #[serde(default = "default_transfer_value")]
    #[serde_as(as = "Quantity")]
    pub transfer_value: U256,

    /// Chain ids the submissions are signed for
    #[serde(default = "default_chain_ids")]
    pub chain_ids: Vec<u64>,

    /// Operator transaction whose cost is the target gas baseline
    #[serde(default)]
    pub transaction: Option<TransactionRequest>,

    #[serde(default)]
    pub include_submissions: bool,
}

impl Default for CatalogConfiguration {
    fn default() -> Self {
        Self {
            sender: None,
            recipient: default_recipient(),
            transfer_value: default_transfer_value(),
            chain_ids: default_chain_ids(),
            transaction: None,
            include_submissions: false,
        }
    }
}

fn default_recipient() -> Address {
    address!("1234567890123456789012345678901234567890")
}

/// 10 units of the native token
fn default_transfer_value() -> U256 {
    U256::from(10u64) * U256::from(10u64).pow(U256::from(18u64))
}

fn default_chain_ids() -> Vec<u64> {
    vec![13939, 420420420]
}

pub fn standard_registry(configuration: &CatalogConfiguration, target_gas_baseline: U256) -> Result<ProbeRegistry, RegistryError> {
    let mut registry = ProbeRegistry::new();
    let identity = TransactionRequest::new().with_to(IDENTITY_PRECOMPILE).with_data(Bytes::from_static(&IDENTITY_PAYLOAD));

    registry
        .register(ProbeSpec::new("chain_id", RpcMethod::ChainId))?
        .register(ProbeSpec::new("latest_block", RpcMethod::GetBlock).literal("tag", "latest"))?
        .register(ProbeSpec::new("fee_data", RpcMethod::GetFeeData))?
        .register(ProbeSpec::new("recover_precompile_code", RpcMethod::GetCode).literal("address", json!(RECOVER_PRECOMPILE)))?
        .register(transaction_probe("identity_call", RpcMethod::Call, &identity)?)?
        .register(transaction_probe("call_identity_from_random", RpcMethod::Call, &identity.clone().with_from(random_address()))?)?
        .register(transaction_probe("estimate_identity_anonymous", RpcMethod::EstimateGas, &identity)?.baseline_sample())?;

    if let Some(sender) = configuration.sender {
        let transfer = TransactionRequest::new().with_from(sender).with_to(sender);

        registry
            .register(ProbeSpec::new("sender_balance", RpcMethod::GetBalance).literal("address", json!(sender)))?
            .register(transaction_probe("call_self_transfer_gas_21000", RpcMethod::Call, &transfer.clone().with_gas(U256::from(TRANSFER_GAS)))?)?
            .register(transaction_probe("call_self_transfer_gas_100000", RpcMethod::Call, &transfer.clone().with_gas(U256::from(SUBMISSION_GAS)))?)?
            .register(transaction_probe("call_self_transfer_value_1", RpcMethod::Call, &transfer.clone().with_value(U256::from(1u64)))?)?
            .register(transaction_probe("call_identity_from_sender", RpcMethod::Call, &identity.clone().with_from(sender))?)?
            .register(transaction_probe("estimate_identity_from_sender", RpcMethod::EstimateGas, &identity.clone().with_from(sender))?.baseline_sample())?
            .register(transaction_probe("estimate_self_transfer", RpcMethod::EstimateGas, &transfer)?.gas_sample(U256::from(TRANSFER_GAS)))?
            .register(
                transaction_probe("estimate_transfer", RpcMethod::EstimateGas, &outgoing_transfer(sender, configuration))?
                    .gas_sample(U256::from(TRANSFER_GAS)),
            )?;
    }

    if let Some(transaction) = &configuration.transaction {
        registry
            .register(transaction_probe("operator_call", RpcMethod::Call, transaction)?)?
            .register(transaction_probe("operator_estimate", RpcMethod::EstimateGas, transaction)?.gas_sample(target_gas_baseline))?;
    }

    if let (true, Some(sender)) = (configuration.include_submissions, configuration.sender) {
        register_submissions(&mut registry, sender, configuration)?;
    }

    Ok(registry)
}

/// Transfer to the recipient, then one self transfer per chain id and transaction type.
fn register_submissions(registry: &mut ProbeRegistry, sender: Address, configuration: &CatalogConfiguration) -> Result<(), RegistryError> {
    registry
        .register(
            transaction_probe("transfer_send", RpcMethod::SendTransaction, &outgoing_transfer(sender, configuration))?
                .output_scaled("gas", "estimate_transfer", "", Some(110))
                .mutating(1),
        )?
        .register(ProbeSpec::new("transfer_wait", RpcMethod::WaitForReceipt).output("hash", "transfer_send", ""))?
        .register(ProbeSpec::new("transfer_transaction", RpcMethod::GetTransaction).output("hash", "transfer_send", "").depends_on("transfer_wait"))?
        .register(ProbeSpec::new("transfer_receipt", RpcMethod::GetTransactionReceipt).output("hash", "transfer_send", "").depends_on("transfer_wait"))?
        .register(
            ProbeSpec::new("recipient_balance", RpcMethod::GetBalance)
                .literal("address", json!(configuration.recipient))
                .depends_on("transfer_wait"),
        )?;

    let transfer = TransactionRequest::new().with_from(sender).with_to(sender).with_value(U256::ZERO).with_gas(U256::from(SUBMISSION_GAS));
    let mut sequence = 1;
    let mut next = || {
        sequence += 1;
        sequence
    };

    for chain_id in &configuration.chain_ids {
        let signed = transfer.clone().with_chain_id(*chain_id);

        registry
            .register(legacy_submission(format!("send_legacy_chain_{}", chain_id), &signed)?.mutating(next()))?
            .register(eip1559_submission(format!("send_eip1559_chain_{}", chain_id), &signed)?.mutating(next()))?;
    }

    registry.register(legacy_submission("send_legacy_no_chain_id".to_string(), &transfer)?.mutating(next()))?;

    Ok(())
}

fn legacy_submission(id: String, transaction: &TransactionRequest) -> Result<ProbeSpec, RegistryError> {
    let transaction = transaction.clone().with_type(TransactionRequest::LEGACY);
    Ok(transaction_probe(&id, RpcMethod::SendTransaction, &transaction)?.output_scaled("gasPrice", "fee_data", "/gasPrice", Some(200)))
}

fn eip1559_submission(id: String, transaction: &TransactionRequest) -> Result<ProbeSpec, RegistryError> {
    let mut transaction = transaction.clone().with_type(TransactionRequest::EIP1559);
    transaction.max_priority_fee_per_gas = Some(U256::from(SUBMISSION_PRIORITY_FEE));

    Ok(transaction_probe(&id, RpcMethod::SendTransaction, &transaction)?.output_scaled("maxFeePerGas", "fee_data", "/maxFeePerGas", Some(200)))
}

fn outgoing_transfer(sender: Address, configuration: &CatalogConfiguration) -> TransactionRequest {
    TransactionRequest::new().with_from(sender).with_to(configuration.recipient).with_value(configuration.transfer_value)
}

/// Lookups of a transaction sent earlier.
pub fn inspection_registry(hash: B256) -> Result<ProbeRegistry, RegistryError> {
    let mut registry = ProbeRegistry::new();
    registry
        .register(ProbeSpec::new("transaction", RpcMethod::GetTransaction).literal("hash", json!(hash)))?
        .register(ProbeSpec::new("receipt", RpcMethod::GetTransactionReceipt).literal("hash", json!(hash)))?;

    Ok(registry)
}

/// Probe whose parameters are the fields of `transaction`.
fn transaction_probe(id: &str, method: RpcMethod, transaction: &TransactionRequest) -> Result<ProbeSpec, RegistryError> {
    let invalid = |cause: String| RegistryError::InvalidParameters {
        probe: id.to_string(),
        cause,
    };

    match serde_json::to_value(transaction).map_err(|e| invalid(e.to_string()))? {
        Value::Object(fields) => Ok(fields.into_iter().fold(ProbeSpec::new(id, method), |spec, (key, value)| spec.literal(key, value))),
        _ => Err(invalid("transaction is not an object".to_string())),
    }
}

fn random_address() -> Address {
    Address::from(rand::random::<[u8; 20]>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ParamValue, ProbeRole};

    const SENDER: Address = Address::repeat_byte(0x5e);

    fn configuration() -> CatalogConfiguration {
        CatalogConfiguration {
            sender: Some(SENDER),
            chain_ids: vec![13939],
            include_submissions: true,
            ..CatalogConfiguration::default()
        }
    }

    fn ids(registry: &ProbeRegistry) -> Vec<&str> {
        registry.iter().map(|spec| spec.id.as_str()).collect()
    }

    mod standard_registry {
        use super::*;

        #[test]
        fn should_only_register_anonymous_probes_without_sender() {
            // When
            let registry = standard_registry(&CatalogConfiguration::default(), U256::from(50_000u64)).unwrap();

            // Then
            assert_eq!(
                ids(&registry),
                vec![
                    "chain_id",
                    "latest_block",
                    "fee_data",
                    "recover_precompile_code",
                    "identity_call",
                    "call_identity_from_random",
                    "estimate_identity_anonymous",
                ]
            );
            assert_eq!(registry.get("estimate_identity_anonymous").unwrap().role, ProbeRole::BaselineSample);
        }

        #[test]
        fn should_sample_transfers_against_transfer_gas() {
            // When
            let registry = standard_registry(&CatalogConfiguration { sender: Some(SENDER), ..CatalogConfiguration::default() }, U256::from(50_000u64)).unwrap();

            // Then
            let samples: Vec<&str> = registry.iter().filter(|spec| spec.role == ProbeRole::GasSample).map(|spec| spec.id.as_str()).collect();
            assert_eq!(samples, vec!["estimate_self_transfer", "estimate_transfer"]);
            assert!(registry.iter().all(|spec| !spec.mutates_chain_state));
            assert_eq!(registry.get("estimate_transfer").unwrap().target_gas, Some(U256::from(TRANSFER_GAS)));
        }

        #[test]
        fn should_sample_operator_transaction_against_baseline() {
            // Given
            let configuration = CatalogConfiguration {
                transaction: Some(TransactionRequest::new().with_to(Address::repeat_byte(0x01)).with_data(Bytes::from_static(&[0x12, 0x34]))),
                ..CatalogConfiguration::default()
            };

            // When
            let registry = standard_registry(&configuration, U256::from(65_000u64)).unwrap();

            // Then
            let estimate = registry.get("operator_estimate").unwrap();
            assert_eq!(estimate.role, ProbeRole::GasSample);
            assert_eq!(estimate.target_gas, Some(U256::from(65_000u64)));
            assert_eq!(estimate.literal_params(), Some(json!({ "to": "0x0101010101010101010101010101010101010101", "data": "0x1234" })));
        }

        #[test]
        fn should_chain_submissions_after_their_estimate() {
            // When
            let registry = standard_registry(&configuration(), U256::from(50_000u64)).unwrap();
            let plan = registry.topological_order().unwrap();

            // Then
            let mutating: Vec<(&str, u32)> = plan.iter().filter(|spec| spec.mutates_chain_state).map(|spec| (spec.id.as_str(), spec.sequence)).collect();
            assert_eq!(
                mutating,
                vec![
                    ("transfer_send", 1),
                    ("send_legacy_chain_13939", 2),
                    ("send_eip1559_chain_13939", 3),
                    ("send_legacy_no_chain_id", 4),
                ]
            );

            let positions = ProbeRegistry::positions(&plan);
            assert!(positions["estimate_transfer"] < positions["transfer_send"]);
            assert!(positions["transfer_wait"] < positions["transfer_receipt"]);
        }

        #[test]
        fn should_derive_submission_fees_from_fee_data() {
            // When
            let registry = standard_registry(&configuration(), U256::from(50_000u64)).unwrap();

            // Then
            let legacy = registry.get("send_legacy_chain_13939").unwrap();
            assert!(matches!(
                &legacy.params["gasPrice"],
                ParamValue::Output(reference) if reference.output_of == "fee_data" && reference.percent == Some(200)
            ));
            assert_eq!(legacy.params["chainId"], ParamValue::Literal(json!("0x3673")));
            assert_eq!(legacy.params["type"], ParamValue::Literal(json!("0x0")));

            let eip1559 = registry.get("send_eip1559_chain_13939").unwrap();
            assert!(matches!(&eip1559.params["maxFeePerGas"], ParamValue::Output(reference) if reference.pointer == "/maxFeePerGas"));
            assert_eq!(eip1559.params["maxPriorityFeePerGas"], ParamValue::Literal(json!("0x9502f900")));

            let unprotected = registry.get("send_legacy_no_chain_id").unwrap();
            assert!(!unprotected.params.contains_key("chainId"));
        }

        #[test]
        fn should_skip_submissions_without_sender() {
            let configuration = CatalogConfiguration {
                sender: None,
                ..configuration()
            };

            let registry = standard_registry(&configuration, U256::from(50_000u64)).unwrap();

            assert!(registry.get("transfer_send").is_none());
        }
    }

    #[test]
    fn inspection_registry_looks_up_transaction_and_receipt() {
        let registry = inspection_registry(B256::repeat_byte(0xab)).unwrap();

        assert_eq!(ids(&registry), vec!["transaction", "receipt"]);
        assert!(registry.iter().all(|spec| spec.literal_params().is_some()));
    }

    #[test]
    fn configuration_defaults_apply_to_missing_fields() {
        let configuration: CatalogConfiguration = serde_json::from_value(json!({ "sender": SENDER, "transfer_value": "0x1" })).unwrap();

        assert_eq!(configuration.transfer_value, U256::from(1u64));
        assert_eq!(configuration.chain_ids, vec![13939, 420420420]);
        assert!(!configuration.include_submissions);
    }
}
