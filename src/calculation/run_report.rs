use std::collections::HashMap;

use crate::prelude::*;

use super::enricher::AttributionSource;
use super::period::BillingPeriod;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Fetch,
    Decode,
    Enrich,
    Aggregate,
    Export,
    Replace,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Decode => "decode",
            Stage::Enrich => "enrich",
            Stage::Aggregate => "aggregate",
            Stage::Export => "export",
            Stage::Replace => "replace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "kebab-case")]
pub enum StageStatus {
    Completed(String),
    Failed(String),
    /// Not reached, because an earlier stage failed.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageOutcome {
    pub stage: Stage,
    #[serde(flatten)]
    pub status: StageStatus,
}

/// Counters gathered while enriching, for the report.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichStats {
    pub line_items: usize,
    pub attribution: HashMap<AttributionSource, usize>,
    pub unknown_event_dates: usize,
    pub out_of_period_event_dates: usize,
}

impl EnrichStats {
    pub fn count(&self, source: AttributionSource) -> usize {
        self.attribution.get(&source).copied().unwrap_or(0)
    }
}

/// What a run did, stage by stage.
///
/// Every planned stage starts out as skipped. Stages are completed in order, and the first
/// one still pending when a failure comes in is the one that failed.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub period: BillingPeriod,
    pub stages: Vec<StageOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<EnrichStats>,
    /// Hex xxHash of the aggregated rows. Equal for reruns over the same export.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip)]
    failure: Option<miette::Report>,
}

impl RunReport {
    pub fn new(period: BillingPeriod, plan: &[Stage]) -> Self {
        RunReport {
            period,
            stages: plan
                .iter()
                .map(|stage| StageOutcome {
                    stage: *stage,
                    status: StageStatus::Skipped,
                })
                .collect(),
            enrichment: None,
            fingerprint: None,
            failure: None,
        }
    }

    pub fn complete(&mut self, stage: Stage, detail: impl Into<String>) {
        let detail = detail.into();
        tracing::info!(stage = stage.label(), %detail, "stage completed");

        if let Some(outcome) = self.stages.iter_mut().find(|outcome| outcome.stage == stage) {
            outcome.status = StageStatus::Completed(detail);
        }
    }

    pub fn fail(&mut self, error: miette::Report) {
        let pending = self
            .stages
            .iter_mut()
            .find(|outcome| outcome.status == StageStatus::Skipped);

        if let Some(outcome) = pending {
            tracing::error!(stage = outcome.stage.label(), %error, "stage failed");
            outcome.status = StageStatus::Failed(error.to_string());
        }

        self.failure = Some(error);
    }

    #[cfg(test)]
    pub fn status(&self, stage: Stage) -> Option<&StageStatus> {
        self.stages
            .iter()
            .find(|outcome| outcome.stage == stage)
            .map(|outcome| &outcome.status)
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// Hands the failure over, so the caller can surface it after printing the report.
    pub fn take_failure(&mut self) -> Option<miette::Report> {
        self.failure.take()
    }

    /// Renders the report.
    /// - unformatted -> one line of JSON, for piping into other tools.
    /// - otherwise -> one aligned line per stage.
    pub fn render(&self, unformatted: bool) -> AppResult<String> {
        if unformatted {
            return serde_json::to_string(self)
                .into_diagnostic()
                .wrap_err("Failed to serialize the run report");
        }

        let mut lines = vec![format!("billing period {}", self.period)];

        for outcome in &self.stages {
            let (status, detail) = match &outcome.status {
                StageStatus::Completed(detail) => ("ok", detail.as_str()),
                StageStatus::Failed(detail) => ("FAILED", detail.as_str()),
                StageStatus::Skipped => ("skipped", ""),
            };

            lines.push(
                format!("  {:<10} {:<8} {}", outcome.stage.label(), status, detail)
                    .trim_end()
                    .to_owned(),
            );
        }

        if let Some(fingerprint) = &self.fingerprint {
            lines.push(format!("fingerprint {fingerprint}"));
        }

        Ok(lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN: &[Stage] = &[Stage::Fetch, Stage::Decode, Stage::Aggregate];

    fn period() -> BillingPeriod {
        "2024-05".parse().unwrap()
    }

    #[test]
    fn stages_start_skipped_and_complete_in_place() {
        let mut report = RunReport::new(period(), PLAN);
        report.complete(Stage::Fetch, "12 bytes");

        assert_eq!(
            report.status(Stage::Fetch),
            Some(&StageStatus::Completed("12 bytes".to_owned()))
        );
        assert_eq!(report.status(Stage::Decode), Some(&StageStatus::Skipped));
        assert_eq!(report.status(Stage::Replace), None);
        assert!(report.succeeded());
    }

    #[test]
    fn failure_lands_on_the_first_pending_stage() {
        let mut report = RunReport::new(period(), PLAN);
        report.complete(Stage::Fetch, "done");
        report.fail(miette::miette!("bad bytes"));

        assert_eq!(
            report.status(Stage::Decode),
            Some(&StageStatus::Failed("bad bytes".to_owned()))
        );
        assert_eq!(report.status(Stage::Aggregate), Some(&StageStatus::Skipped));
        assert!(!report.succeeded());
        assert!(report.take_failure().is_some());
    }

    #[test]
    fn renders_text_and_json() {
        let mut report = RunReport::new(period(), PLAN);
        report.complete(Stage::Fetch, "done");
        report.fingerprint = Some("00ff".to_owned());

        let text = report.render(false).unwrap();
        assert_eq!(
            text,
            "billing period 2024-05\n  fetch      ok       done\n  decode     skipped\n  aggregate  skipped\nfingerprint 00ff"
        );

        let json: serde_json::Value = serde_json::from_str(&report.render(true).unwrap()).unwrap();
        assert_eq!(json["period"], "2024-05");
        assert_eq!(json["stages"][0]["stage"], "fetch");
        assert_eq!(json["stages"][0]["status"], "completed");
        assert_eq!(json["stages"][0]["detail"], "done");
        assert_eq!(json["stages"][1]["status"], "skipped");
        assert_eq!(json["fingerprint"], "00ff");
    }
}
