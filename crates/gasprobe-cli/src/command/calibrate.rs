use alloy_primitives::U256;
use bigdecimal::BigDecimal;
use clap::Args;
use gasprobe_diagnostics::calibration::{calibrate, CalibrationSample};
use gasprobe_ethereum::quantity::parse_quantity;

use crate::command::ProfileParameters;
use crate::core::context::Context;
use crate::core::Error;

#[derive(Args, Clone, Debug)]
pub struct CalibrateParameters {
    /// Gas sample of the form `estimated/target`, e.g. `44100/21000`
    #[clap(long = "sample", required = true, value_parser = parse_sample)]
    pub samples: Vec<(U256, U256)>,

    /// Ratio currently configured on the chain, defaults to `diagnostics.current_ratio`
    #[clap(long)]
    pub current_ratio: Option<BigDecimal>,

    #[command(flatten)]
    pub profile: ProfileParameters,
}

/// Recommends a ratio from samples collected elsewhere, without talking to a node.
pub async fn command_calibrate(context: Context, params: CalibrateParameters) -> Result<(), Error> {
    let current_ratio = params.current_ratio.unwrap_or(context.configuration.diagnostics.current_ratio);
    let samples: Vec<CalibrationSample> = params
        .samples
        .iter()
        .enumerate()
        .map(|(index, (estimated, target))| CalibrationSample::new(format!("sample_{}", index + 1), *estimated, *target))
        .collect();

    let recommendation = calibrate(&samples, &current_ratio).map_err(|e| Error::Validation(e.to_string()))?;
    let rendered = serde_json::to_string_pretty(&recommendation).map_err(|e| Error::Execution(e.to_string()))?;
    println!("{}", rendered);

    Ok(())
}

fn parse_sample(value: &str) -> Result<(U256, U256), String> {
    let (estimated, target) = value.split_once('/').ok_or(format!("invalid sample {}, must be of the form 'estimated/target'", value))?;

    let quantity = |x: &str| parse_quantity(x.trim()).ok_or(format!("invalid gas quantity {}", x));
    Ok((quantity(estimated)?, quantity(target)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_parse_decimal_and_hex_quantities() {
        assert_eq!(parse_sample("44100/21000"), Ok((U256::from(44_100u64), U256::from(21_000u64))));
        assert_eq!(parse_sample("0xac44/0x5208"), Ok((U256::from(44_100u64), U256::from(21_000u64))));
    }

    #[test]
    fn malformed_samples_are_rejected() {
        assert!(parse_sample("44100").is_err());
        assert!(parse_sample("gas/21000").is_err());
    }
}
