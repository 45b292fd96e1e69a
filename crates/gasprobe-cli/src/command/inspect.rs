use alloy_primitives::B256;
use clap::Args;
use gasprobe_diagnostics::catalog::inspection_registry;

use crate::command::{execute, ProfileParameters};
use crate::core::context::Context;
use crate::core::Error;

#[derive(Args, Clone, Debug)]
pub struct InspectParameters {
    /// Hash of the transaction to look up
    #[clap(long)]
    pub hash: B256,

    #[command(flatten)]
    pub profile: ProfileParameters,
}

pub async fn command_inspect(context: Context, params: InspectParameters) -> Result<(), Error> {
    execute(&context, inspection_registry(params.hash)?).await.map(|_| ())
}
