//! Gas-to-weight ratio calibration.
//!
//! Each sample yields a factor `estimated / target`. The recommended ratio is the current
//! ratio scaled by the median factor, rounded half up to an integer. All arithmetic is
//! exact decimal arithmetic.

use std::collections::HashSet;

use alloy_primitives::U256;
use bigdecimal::num_bigint::{BigInt, Sign};
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use gasprobe_ethereum::quantity::quantity_from_value;
use gasprobe_ethereum::Quantity;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use thiserror::Error;

use crate::classifier::DiagnosticCode;
use crate::registry::ProbeRole;
use crate::report::ClassifiedResult;

/// Minimum number of agreeing samples from distinct probes for a multi-sample recommendation.
const MULTI_SAMPLE_QUORUM: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no usable gas samples")]
    NoSamples,

    #[error("current ratio {0} is not positive")]
    NonPositiveRatio(BigDecimal),

    #[error("sample from {0} has a zero target gas")]
    ZeroTargetGas(String),
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    #[serde_as(as = "Quantity")]
    pub estimated_gas: U256,

    #[serde_as(as = "Quantity")]
    pub target_gas: U256,

    pub source_probe_id: String,
}

impl CalibrationSample {
    pub fn new(source_probe_id: impl Into<String>, estimated_gas: U256, target_gas: U256) -> Self {
        Self {
            estimated_gas,
            target_gas,
            source_probe_id: source_probe_id.into(),
        }
    }

    /// Sample carried by a successful gas-sample result, if any.
    pub fn from_result(result: &ClassifiedResult) -> Option<Self> {
        if result.code != DiagnosticCode::Success || result.role != ProbeRole::GasSample {
            return None;
        }

        let estimated_gas = result.result.outcome.value().and_then(quantity_from_value)?;
        let target_gas = result.target_gas?;

        Some(Self::new(result.result.spec_id.clone(), estimated_gas, target_gas))
    }

    fn factor(&self) -> Result<BigDecimal, CalibrationError> {
        if self.target_gas.is_zero() {
            return Err(CalibrationError::ZeroTargetGas(self.source_probe_id.clone()));
        }

        Ok(to_decimal(self.estimated_gas) / to_decimal(self.target_gas))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Confidence {
    SingleSample,
    MultiSample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRecommendation {
    pub current_ratio: BigDecimal,
    pub new_ratio: BigDecimal,
    pub median_factor: BigDecimal,
    pub basis: Vec<CalibrationSample>,
    pub confidence: Confidence,
}

/// Samples of every successful gas-sample result, in result order.
pub fn samples(results: &[ClassifiedResult]) -> Vec<CalibrationSample> {
    results.iter().filter_map(CalibrationSample::from_result).collect()
}

pub fn calibrate(samples: &[CalibrationSample], current_ratio: &BigDecimal) -> Result<CalibrationRecommendation, CalibrationError> {
    if samples.is_empty() {
        return Err(CalibrationError::NoSamples);
    }

    if current_ratio <= &BigDecimal::zero() {
        return Err(CalibrationError::NonPositiveRatio(current_ratio.clone()));
    }

    let mut factors = samples
        .iter()
        .map(|sample| sample.factor().map(|factor| (factor, sample.source_probe_id.as_str())))
        .collect::<Result<Vec<_>, _>>()?;
    factors.sort_by(|a, b| a.0.cmp(&b.0));

    let median_factor = median(&factors);
    let new_ratio = (current_ratio * &median_factor).with_scale_round(0, RoundingMode::HalfUp);

    Ok(CalibrationRecommendation {
        current_ratio: current_ratio.clone(),
        new_ratio,
        median_factor,
        basis: samples.to_vec(),
        confidence: confidence(&factors),
    })
}

fn median(sorted: &[(BigDecimal, &str)]) -> BigDecimal {
    let middle = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (&sorted[middle - 1].0 + &sorted[middle].0) / BigDecimal::from(2)
    } else {
        sorted[middle].0.clone()
    }
}

/// Multi-sample when some window of factors spanning at most 2x holds samples from at least
/// three distinct probes.
fn confidence(sorted: &[(BigDecimal, &str)]) -> Confidence {
    for (start, (low, _)) in sorted.iter().enumerate() {
        let bound = low * BigDecimal::from(2);
        let probes: HashSet<&str> = sorted[start..].iter().take_while(|(factor, _)| factor <= &bound).map(|(_, probe)| *probe).collect();

        if probes.len() >= MULTI_SAMPLE_QUORUM {
            return Confidence::MultiSample;
        }
    }

    Confidence::SingleSample
}

fn to_decimal(value: U256) -> BigDecimal {
    BigDecimal::from(BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>()))
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn sample(id: &str, estimated_gas: u64, target_gas: u64) -> CalibrationSample {
        CalibrationSample::new(id, U256::from(estimated_gas), U256::from(target_gas))
    }

    mod calibrate {
        use super::*;

        #[test]
        fn should_scale_ratio_by_single_factor() {
            // Given
            let samples = vec![sample("transfer", 44_000_000_000, 21_000)];

            // When
            let recommendation = calibrate(&samples, &BigDecimal::from(9000)).unwrap();

            // Then
            assert_eq!(recommendation.new_ratio, BigDecimal::from(18_857_142_857u64));
            assert_eq!(recommendation.confidence, Confidence::SingleSample);
        }

        #[test]
        fn should_use_median_factor() {
            // Given
            let samples = vec![sample("a", 42_000, 21_000), sample("b", 44_100, 21_000), sample("c", 39_900, 21_000)];

            // When
            let recommendation = calibrate(&samples, &BigDecimal::from(1000)).unwrap();

            // Then
            assert_eq!(recommendation.new_ratio, BigDecimal::from(2000));
            assert_eq!(recommendation.median_factor, BigDecimal::from(2));
            assert_eq!(recommendation.confidence, Confidence::MultiSample);
            assert_eq!(recommendation.basis, samples);
        }

        #[test]
        fn should_average_middle_factors_of_even_count() {
            // Given
            let samples = vec![sample("a", 1, 1), sample("b", 2, 1), sample("c", 3, 1), sample("d", 100, 1)];

            // When
            let recommendation = calibrate(&samples, &BigDecimal::from(10)).unwrap();

            // Then
            assert_eq!(recommendation.median_factor, BigDecimal::from_str("2.5").unwrap());
            assert_eq!(recommendation.new_ratio, BigDecimal::from(25));
        }

        #[test]
        fn should_round_half_up() {
            let recommendation = calibrate(&[sample("a", 1, 2)], &BigDecimal::from(5)).unwrap();

            assert_eq!(recommendation.new_ratio, BigDecimal::from(3));
        }

        #[test]
        fn should_accept_fractional_current_ratio() {
            let recommendation = calibrate(&[sample("a", 3, 1)], &BigDecimal::from_str("0.5").unwrap()).unwrap();

            assert_eq!(recommendation.new_ratio, BigDecimal::from(2));
        }

        #[test]
        fn should_fail_without_samples() {
            assert_eq!(calibrate(&[], &BigDecimal::from(9000)), Err(CalibrationError::NoSamples));
        }

        #[test]
        fn should_reject_non_positive_ratio() {
            let result = calibrate(&[sample("a", 1, 1)], &BigDecimal::zero());

            assert!(matches!(result, Err(CalibrationError::NonPositiveRatio(_))));
        }

        #[test]
        fn should_reject_zero_target() {
            let result = calibrate(&[sample("a", 1, 0)], &BigDecimal::from(1));

            assert_eq!(result, Err(CalibrationError::ZeroTargetGas("a".to_string())));
        }
    }

    mod confidence {
        use super::*;

        #[test]
        fn should_require_three_distinct_probes() {
            let samples = vec![sample("a", 2, 1), sample("a", 2, 1), sample("b", 2, 1)];

            let recommendation = calibrate(&samples, &BigDecimal::from(1)).unwrap();

            assert_eq!(recommendation.confidence, Confidence::SingleSample);
        }

        #[test]
        fn should_require_agreement_within_twofold_band() {
            let spread = vec![sample("a", 1, 1), sample("b", 3, 1), sample("c", 9, 1)];
            let band = vec![sample("a", 10, 1), sample("b", 15, 1), sample("c", 20, 1), sample("d", 90, 1)];

            assert_eq!(calibrate(&spread, &BigDecimal::from(1)).unwrap().confidence, Confidence::SingleSample);
            assert_eq!(calibrate(&band, &BigDecimal::from(1)).unwrap().confidence, Confidence::MultiSample);
        }
    }
}
