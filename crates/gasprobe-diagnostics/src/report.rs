use std::collections::BTreeMap;

use alloy_primitives::U256;
use gasprobe_ethereum::Quantity;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use uuid::Uuid;

use crate::calibration::CalibrationRecommendation;
use crate::classifier::DiagnosticCode;
use crate::context::ClassificationContext;
use crate::executor::ProbeResult;
use crate::registry::ProbeRole;

#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedResult {
    #[serde(flatten)]
    pub result: ProbeResult,

    pub code: DiagnosticCode,
    pub note: String,
    pub role: ProbeRole,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde_as(as = "Option<Quantity>")]
    pub target_gas: Option<U256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Complete,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub run_id: Uuid,
    pub status: ReportStatus,
    pub context: ClassificationContext,
    pub results: Vec<ClassifiedResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<CalibrationRecommendation>,

    /// Why no recommendation was produced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_skipped: Option<String>,
}

impl DiagnosticReport {
    pub fn result(&self, spec_id: &str) -> Option<&ClassifiedResult> {
        self.results.iter().find(|x| x.result.spec_id == spec_id)
    }

    /// Number of results per diagnostic code.
    pub fn summary(&self) -> BTreeMap<&'static str, usize> {
        let mut summary = BTreeMap::new();
        for result in &self.results {
            *summary.entry(result.code.as_str()).or_insert(0) += 1;
        }

        summary
    }
}

/// Folds classified results into a report. A run where every probe failed to reach the
/// node is `Failed` and never carries a recommendation; any transport failure otherwise
/// degrades the report.
pub fn aggregate(results: Vec<ClassifiedResult>, recommendation: Option<CalibrationRecommendation>, context: ClassificationContext) -> DiagnosticReport {
    let unreachable = results.iter().filter(|x| x.code == DiagnosticCode::TransportUnreachable).count();

    let status = match unreachable {
        0 => ReportStatus::Complete,
        n if n == results.len() => ReportStatus::Failed,
        _ => ReportStatus::Degraded,
    };

    let recommendation = match status {
        ReportStatus::Failed => None,
        _ => recommendation,
    };

    DiagnosticReport {
        run_id: Uuid::new_v4(),
        status,
        context,
        results,
        recommendation,
        calibration_skipped: None,
    }
}
