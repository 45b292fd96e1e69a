//! Probe-and-calibrate diagnostics for Ethereum JSON-RPC nodes.
//!
//! A [`ProbeRegistry`] describes what to ask the node, the [`DiagnosticEngine`] runs it
//! through an [`RpcAdapter`](gasprobe_ethereum::RpcAdapter), classifies every outcome and
//! derives a recommendation for the gas-to-weight ratio from the gas estimates.

use std::str::FromStr;

use alloy_primitives::U256;
use bigdecimal::BigDecimal;
use gasprobe_ethereum::Quantity;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

pub mod calibration;
pub mod catalog;
pub mod classifier;
pub mod context;
pub mod executor;
pub mod registry;
pub mod report;

mod engine;
pub use engine::DiagnosticEngine;
pub use registry::{ProbeRegistry, ProbeSpec, RegistryError, RpcMethod};
pub use report::{DiagnosticReport, ReportStatus};

pub const DEFAULT_TARGET_GAS_BASELINE: u64 = 50_000;
pub const DEFAULT_CURRENT_RATIO: u64 = 9_000;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    /// Gas the operator transaction is expected to cost
    #[serde(default = "default_target_gas_baseline")]
    #[serde_as(as = "Quantity")]
    pub target_gas_baseline: U256,

    /// Gas-to-weight ratio currently configured on the chain
    #[serde(default = "default_current_ratio")]
    pub current_ratio: BigDecimal,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            target_gas_baseline: default_target_gas_baseline(),
            current_ratio: default_current_ratio(),
            probe_timeout_ms: default_probe_timeout_ms(),
            concurrency_limit: default_concurrency_limit(),
        }
    }
}

fn default_target_gas_baseline() -> U256 {
    U256::from(DEFAULT_TARGET_GAS_BASELINE)
}

fn default_current_ratio() -> BigDecimal {
    BigDecimal::from(DEFAULT_CURRENT_RATIO)
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_concurrency_limit() -> usize {
    4
}

impl Configuration {
    /// Parses a ratio given on the command line or in the environment.
    pub fn parse_ratio(value: &str) -> Result<BigDecimal, String> {
        BigDecimal::from_str(value.trim()).map_err(|e| format!("invalid ratio {}: {}", value, e))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn configuration_fills_missing_fields_with_defaults() {
        let configuration: Configuration = serde_json::from_value(json!({ "current_ratio": "12500.5", "concurrency_limit": 2 })).unwrap();

        assert_eq!(configuration.current_ratio, Configuration::parse_ratio("12500.5").unwrap());
        assert_eq!(configuration.concurrency_limit, 2);
        assert_eq!(configuration.target_gas_baseline, U256::from(50_000u64));
        assert_eq!(configuration.probe_timeout_ms, 10_000);
    }

    #[test]
    fn configuration_renders_quantities_as_decimal_strings() {
        let value = serde_json::to_value(Configuration::default()).unwrap();

        assert_eq!(value["target_gas_baseline"], json!("50000"));
        assert_eq!(value["current_ratio"], json!("9000"));
    }
}
