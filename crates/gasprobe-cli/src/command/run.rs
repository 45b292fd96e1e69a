use clap::Args;
use gasprobe_diagnostics::catalog::standard_registry;
use tracing::info;

use crate::command::{execute, ProfileParameters};
use crate::core::context::Context;
use crate::core::Error;

#[derive(Args, Clone, Debug)]
pub struct RunParameters {
    /// Also send real transactions from the configured sender
    #[clap(long)]
    pub submit: bool,

    #[command(flatten)]
    pub profile: ProfileParameters,
}

pub async fn command_run(context: Context, params: RunParameters) -> Result<(), Error> {
    let mut catalog = context.configuration.probes.clone();
    catalog.include_submissions |= params.submit;

    if catalog.include_submissions && catalog.sender.is_none() {
        return Err(Error::Validation("submissions require probes.sender".to_string()));
    }

    let registry = standard_registry(&catalog, context.configuration.diagnostics.target_gas_baseline)?;
    let report = execute(&context, registry).await?;

    for (code, count) in report.summary() {
        info!(code, count, "summary");
    }

    Ok(())
}
