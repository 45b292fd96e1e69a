//! Maps raw probe outcomes to comparable diagnostic codes.

use alloy_primitives::{Address, U256};
use gasprobe_ethereum::quantity::quantity_from_value;
use gasprobe_ethereum::revert;
use gasprobe_ethereum::RpcFault;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ClassificationContext;
use crate::executor::{ProbeOutcome, ProbeResult};
use crate::registry::{ProbeRole, RpcMethod};

/// Node error codes used for execution failures that carry no reason.
const REVERT_CODES: [i64; 3] = [3, -32015, -32016];
const GENERIC_CODES: [i64; 2] = [-32000, -32603];
const REVERT_MESSAGES: [&str; 2] = ["execution reverted", "invalid call"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticCode {
    Success,
    RevertedWithReason,
    RevertedNoReason,
    ExceedsBlockGasLimit,
    ZeroBalanceSender,
    RpcRejected,
    TransportUnreachable,
    Unclassified,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RevertedWithReason => "reverted_with_reason",
            Self::RevertedNoReason => "reverted_no_reason",
            Self::ExceedsBlockGasLimit => "exceeds_block_gas_limit",
            Self::ZeroBalanceSender => "zero_balance_sender",
            Self::RpcRejected => "rpc_rejected",
            Self::TransportUnreachable => "transport_unreachable",
            Self::Unclassified => "unclassified",
        }
    }
}

/// Classifies one result. Rules apply in priority order; the first match wins.
pub fn classify(result: &ProbeResult, role: ProbeRole, context: &ClassificationContext) -> DiagnosticCode {
    let value = match &result.outcome {
        ProbeOutcome::TransportFault { .. } => return DiagnosticCode::TransportUnreachable,
        ProbeOutcome::RpcFault(fault) => return classify_fault(fault),
        ProbeOutcome::Ok { value } => value,
    };

    let limit = context.block_gas_limit;
    if role.is_gas_bearing() {
        let Some(gas) = quantity_from_value(value) else {
            return DiagnosticCode::Unclassified;
        };

        if limit.is_some_and(|limit| gas > limit) {
            return DiagnosticCode::ExceedsBlockGasLimit;
        }
    }

    if let (Some(requested), Some(limit)) = (requested_gas(result), limit) {
        if requested > limit {
            return DiagnosticCode::ExceedsBlockGasLimit;
        }
    }

    if sender_balance(result, value, context).is_some_and(|balance| balance.is_zero()) {
        return DiagnosticCode::ZeroBalanceSender;
    }

    DiagnosticCode::Success
}

fn classify_fault(fault: &RpcFault) -> DiagnosticCode {
    if revert_reason(fault).is_some() {
        return DiagnosticCode::RevertedWithReason;
    }

    let message = fault.message.to_lowercase();
    let reverted = REVERT_CODES.contains(&fault.code) || (GENERIC_CODES.contains(&fault.code) && REVERT_MESSAGES.iter().any(|m| message.contains(m)));

    if reverted {
        DiagnosticCode::RevertedNoReason
    } else {
        DiagnosticCode::RpcRejected
    }
}

fn revert_reason(fault: &RpcFault) -> Option<String> {
    fault.reason.clone().or_else(|| revert::reason_from_fault(&fault.message, fault.data.as_ref()))
}

fn requested_gas(result: &ProbeResult) -> Option<U256> {
    if !result.method.takes_transaction() {
        return None;
    }

    result.params.get("gas").and_then(quantity_from_value)
}

/// Balance probes of a known sender report their own value; transaction probes use the
/// snapshot of their sender.
fn sender_balance(result: &ProbeResult, value: &Value, context: &ClassificationContext) -> Option<U256> {
    match result.method {
        RpcMethod::GetBalance => {
            let address: Address = serde_json::from_value(result.params.get("address")?.clone()).ok()?;
            if !context.is_sender(&address) {
                return None;
            }

            quantity_from_value(value)
        },
        method if method.takes_transaction() => {
            let sender: Address = serde_json::from_value(result.params.get("from")?.clone()).ok()?;
            context.balance_of(&sender)
        },
        _ => None,
    }
}

/// Human readable explanation attached to a classified result.
pub fn note(result: &ProbeResult, code: DiagnosticCode, context: &ClassificationContext) -> String {
    let limit = context.block_gas_limit.map(|limit| limit.to_string()).unwrap_or_else(|| "unknown".to_string());

    match (&result.outcome, code) {
        (ProbeOutcome::TransportFault { cause }, _) => format!("node unreachable: {}", cause),
        (ProbeOutcome::RpcFault(fault), DiagnosticCode::RevertedWithReason) => {
            format!("reverted: {}", revert_reason(fault).unwrap_or_default())
        },
        (ProbeOutcome::RpcFault(fault), DiagnosticCode::RevertedNoReason) => {
            format!("reverted without reason (code {}: {})", fault.code, fault.message)
        },
        (ProbeOutcome::RpcFault(fault), _) => format!("rejected by node (code {}: {})", fault.code, fault.message),
        (ProbeOutcome::Ok { value }, DiagnosticCode::ExceedsBlockGasLimit) => match (quantity_from_value(value), requested_gas(result)) {
            (Some(gas), _) if result.method == RpcMethod::EstimateGas => format!("estimated gas {} exceeds block gas limit {}", gas, limit),
            (_, Some(requested)) => format!("requested gas {} exceeds block gas limit {}", requested, limit),
            _ => format!("gas exceeds block gas limit {}", limit),
        },
        (ProbeOutcome::Ok { .. }, DiagnosticCode::ZeroBalanceSender) => "sender balance is zero".to_string(),
        (ProbeOutcome::Ok { .. }, DiagnosticCode::Unclassified) => "gas quantity could not be read from the response".to_string(),
        (ProbeOutcome::Ok { value }, _) => match result.method {
            RpcMethod::EstimateGas => format!("estimated gas {}", quantity_from_value(value).unwrap_or_default()),
            _ => "ok".to_string(),
        },
    }
}
