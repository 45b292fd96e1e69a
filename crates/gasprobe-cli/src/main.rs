use clap::{Parser, Subcommand};
use gasprobe_common::monitoring::{Metric, Tracer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

mod command;
pub mod core;

use crate::command::calibrate::{command_calibrate, CalibrateParameters};
use crate::command::inspect::{command_inspect, InspectParameters};
use crate::command::run::{command_run, RunParameters};
use crate::core::context::Context;
use crate::core::{Error, Fmt};

#[derive(Parser)]
#[command(name = "gasprobe", about = "Probe an Ethereum JSON-RPC node and calibrate its gas-to-weight ratio")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the standard probe set and print the diagnostic report")]
    Run(RunParameters),

    #[command(about = "Look up a transaction and its receipt")]
    Inspect(InspectParameters),

    #[command(about = "Recommend a ratio from gas samples, without contacting a node")]
    Calibrate(CalibrateParameters),
}

fn install_tracing(context: &Context) -> Result<(), Error> {
    let configuration = &context.configuration;

    let fmt_layer = Fmt::layer(&configuration.verbosity);
    let metric_layer = configuration.monitoring.as_ref().map(Metric::layer);
    let tracer_layer = configuration.monitoring.as_ref().map(Tracer::layer);

    let subscriber = Registry::default().with(fmt_layer).with(metric_layer).with(tracer_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| Error::Configuration(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(params) => {
            let context = params.profile.load()?;
            install_tracing(&context)?;
            command_run(context, params).await
        },
        Commands::Inspect(params) => {
            let context = params.profile.load()?;
            install_tracing(&context)?;
            command_inspect(context, params).await
        },
        Commands::Calibrate(params) => {
            let context = params.profile.load()?;
            install_tracing(&context)?;
            command_calibrate(context, params).await
        },
    }
}
