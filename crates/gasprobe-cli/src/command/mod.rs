use std::sync::Arc;

use clap::Args;
use gasprobe_diagnostics::{DiagnosticEngine, DiagnosticReport, ProbeRegistry, ReportStatus};
use gasprobe_ethereum::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::core::context::Context;
use crate::core::Error;

pub mod calibrate;
pub mod inspect;
pub mod run;

#[derive(Args, Clone, Debug)]
pub struct ProfileParameters {
    /// JSON profile, also read from `GASPROBE_PROFILE`
    #[clap(long)]
    pub profile: Option<String>,

    /// Configuration overrides of the form `--ethereum_endpoint=http://...`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub overrides: Vec<String>,
}

impl ProfileParameters {
    pub fn load(&self) -> Result<Context, Error> {
        Context::load(self.profile.as_deref(), &self.overrides)
    }
}

/// Runs `registry` against the configured node until done or interrupted, then prints the report.
pub async fn execute(context: &Context, registry: ProbeRegistry) -> Result<DiagnosticReport, Error> {
    let configuration = &context.configuration;
    info!(endpoint = %configuration.ethereum.endpoint, probes = registry.len(), "starting diagnostic run");

    let client = Client::new(&configuration.ethereum)?;
    let engine = DiagnosticEngine::new(Arc::new(client), configuration.diagnostics.clone());

    let cancellation = CancellationToken::new();
    let interrupt = {
        let cancellation = cancellation.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling remaining probes");
                cancellation.cancel();
            }
        })
    };

    let report = engine.run(&registry, cancellation).await;
    interrupt.abort();

    let report = report?;
    let rendered = serde_json::to_string_pretty(&report).map_err(|e| Error::Execution(e.to_string()))?;
    println!("{}", rendered);

    if report.status == ReportStatus::Failed {
        return Err(Error::Execution(format!("node {} unreachable", configuration.ethereum.endpoint)));
    }

    Ok(report)
}
