use std::sync::Arc;
use std::time::Duration;

use gasprobe_common::metric;
use gasprobe_ethereum::RpcAdapter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::calibration::{calibrate, samples};
use crate::classifier::{classify, note};
use crate::context::ClassificationContext;
use crate::executor::ProbeRun;
use crate::registry::{ProbeRegistry, RegistryError};
use crate::report::{aggregate, ClassifiedResult, DiagnosticReport, ReportStatus};
use crate::Configuration;

/// Runs probe sets against one node and folds their outcomes into reports.
#[derive(Clone)]
pub struct DiagnosticEngine {
    adapter: Arc<dyn RpcAdapter>,
    configuration: Configuration,
}

impl DiagnosticEngine {
    pub fn new(adapter: Arc<dyn RpcAdapter>, configuration: Configuration) -> Self {
        Self { adapter, configuration }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.configuration.probe_timeout_ms)
    }

    /// Executes every probe of `registry`. Configuration faults of the registry abort the
    /// run before any request is sent; every other failure ends up in the report.
    #[instrument(name = "diagnostic_run", skip(self, registry, cancellation), fields(probes = registry.len()))]
    pub async fn run(&self, registry: &ProbeRegistry, cancellation: CancellationToken) -> Result<DiagnosticReport, RegistryError> {
        let plan = registry.topological_order()?;
        let positions = ProbeRegistry::positions(&plan);

        let context = tokio::select! {
            biased;

            _ = cancellation.cancelled() => ClassificationContext::default(),
            context = ClassificationContext::capture(self.adapter.as_ref(), &plan, self.probe_timeout()) => context,
        };

        let mut run = ProbeRun::new(plan.clone(), self.adapter.clone(), &self.configuration, cancellation);
        let mut results = Vec::with_capacity(plan.len());
        while let Some(result) = run.next().await {
            let Some(spec) = positions.get(result.spec_id.as_str()).map(|&index| &plan[index]) else {
                warn!(probe = %result.spec_id, "result for unknown probe discarded");
                continue;
            };

            let code = classify(&result, spec.role, &context);
            let note = note(&result, code, &context);
            debug!(probe = %result.spec_id, code = code.as_str(), duration_ms = result.duration_ms, "{}", note);
            metric!(counter[probe_result] = 1, method = result.method.as_str(), code = code.as_str());

            results.push(ClassifiedResult {
                result,
                code,
                note,
                role: spec.role,
                target_gas: spec.target_gas,
            });
        }

        results.sort_by_key(|x| positions.get(x.result.spec_id.as_str()).copied().unwrap_or(usize::MAX));

        let (recommendation, skipped) = match calibrate(&samples(&results), &self.configuration.current_ratio) {
            Ok(recommendation) => {
                info!(new_ratio = %recommendation.new_ratio, confidence = ?recommendation.confidence, "calibration recommended");
                (Some(recommendation), None)
            },
            Err(e) => {
                warn!(error = %e, "calibration skipped");
                (None, Some(e.to_string()))
            },
        };

        let mut report = aggregate(results, recommendation, context);
        report.calibration_skipped = match report.status {
            ReportStatus::Failed => Some(skipped.unwrap_or_else(|| "no probe reached the node".to_string())),
            _ => skipped,
        };

        info!(run_id = %report.run_id, status = ?report.status, "diagnostic run finished");
        Ok(report)
    }
}
