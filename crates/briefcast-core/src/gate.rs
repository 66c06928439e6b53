//! Publish quality gate.
//!
//! Runs a fixed battery of independent issue detectors against a finished
//! run's stage records, outputs, and quality context, then renders one of
//! three publish decisions. The check itself is pure given its detector
//! outputs; a detector that blows up is logged and skipped, never fatal.
//!
//! Decision policy, in fixed priority order: any major issue escalates to
//! human review; more than two minors escalates; one or two minors publish
//! with a warning; a clean run auto-publishes.

use std::sync::Arc;

use anyhow::ensure;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use briefcast_state::{
    DecisionRecord, GateMetrics, IssueSeverity, PublishDecision, QualityIssue, RunDocument,
    RunKey, RunStateStore,
};

use crate::error::{EngineError, Result};
use crate::review::{create_review_item, ReviewQueue};
use crate::stage::Stage;

/// Tunable detector thresholds. Defaults match production policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateThresholds {
    /// Retries at or above this count on any stage raise a minor issue.
    pub retry_minor: u32,
    /// Failed-source ratio above this is a major issue; any loss is minor.
    pub source_loss_major_ratio: f64,
    /// Acceptable episode duration range, in seconds.
    pub duration_min_secs: f64,
    pub duration_max_secs: f64,
    /// Fraction of the range edge that counts as "close to the edge".
    pub duration_edge_band: f64,
    /// Degraded-stage count above this is major; one through the cap is minor.
    pub degraded_major_count: usize,
    /// Minor-issue count above this escalates to human review.
    pub minor_review_count: usize,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            retry_minor: 3,
            source_loss_major_ratio: 0.5,
            duration_min_secs: 90.0,
            duration_max_secs: 600.0,
            duration_edge_band: 0.10,
            degraded_major_count: 2,
            minor_review_count: 2,
        }
    }
}

/// The gate itself: thresholds plus the detector battery.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    thresholds: GateThresholds,
}

type Detector = fn(&RunDocument, &GateThresholds) -> anyhow::Result<Option<QualityIssue>>;

impl QualityGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    /// Evaluate a run and render the publish decision.
    ///
    /// Pure given the run document: no hidden state, no randomness. Each
    /// detector contributes at most one issue; a failing detector is logged
    /// and contributes nothing.
    pub fn check(&self, run: &RunDocument) -> DecisionRecord {
        const DETECTORS: [(&str, Detector); 7] = [
            ("writing_fallback", detect_writing_fallback),
            ("rendering_fallback", detect_rendering_fallback),
            ("high_retries", detect_high_retries),
            ("source_loss", detect_source_loss),
            ("duration_range", detect_duration_range),
            ("degraded_stages", detect_degraded_stages),
            ("combined_fallbacks", detect_combined_fallbacks),
        ];

        let mut issues = Vec::new();
        for (name, detector) in DETECTORS {
            match detector(run, &self.thresholds) {
                Ok(Some(issue)) => issues.push(issue),
                Ok(None) => {}
                Err(err) => {
                    warn!(run_id = %run.run_id, detector = name, error = %err,
                        "quality detector failed, skipping");
                }
            }
        }

        let majors = issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Major)
            .count();
        let minors = issues.len() - majors;

        let decision = if majors > 0 || minors > self.thresholds.minor_review_count {
            PublishDecision::HumanReview
        } else if minors > 0 {
            PublishDecision::AutoPublishWithWarning
        } else {
            PublishDecision::AutoPublish
        };

        let mut reasons: Vec<String> = issues
            .iter()
            .map(|i| format!("{:?} {} ({}): {}", i.severity, i.code, i.stage, i.message))
            .collect();
        if reasons.is_empty() {
            reasons.push("no quality issues detected".to_string());
        }

        DecisionRecord {
            decision,
            metrics: GateMetrics {
                major_issues: majors as u32,
                minor_issues: minors as u32,
                degraded_stages: run.quality.degraded_stages.len() as u32,
                fallbacks_used: run.quality.fallbacks_used.len() as u32,
            },
            issues,
            reasons,
            decided_at: Utc::now(),
        }
    }
}

/// Gate wired to persistence: loads the run, checks it, persists the
/// decision, and opens a review item when the decision escalates.
pub struct GateService {
    store: Arc<dyn RunStateStore>,
    queue: Arc<dyn ReviewQueue>,
    gate: QualityGate,
}

impl GateService {
    pub fn new(
        store: Arc<dyn RunStateStore>,
        queue: Arc<dyn ReviewQueue>,
        gate: QualityGate,
    ) -> Self {
        Self { store, queue, gate }
    }

    /// Evaluate a finished run and persist the outcome.
    pub async fn evaluate(&self, run_id: &RunKey) -> Result<DecisionRecord> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let record = self.gate.check(&run);
        info!(run_id = %run_id, decision = ?record.decision,
            majors = record.metrics.major_issues, minors = record.metrics.minor_issues,
            "publish gate decision");

        // Decisions are write-once; the store keeps the first.
        if let Err(err) = self.store.persist_decision(run_id, &record).await {
            warn!(run_id = %run_id, error = %err, "failed to persist gate decision");
        }

        if record.decision == PublishDecision::HumanReview {
            match create_review_item(self.queue.as_ref(), run_id, &record, &run).await {
                Ok(item_id) => {
                    info!(run_id = %run_id, item_id = %item_id, "review item created")
                }
                Err(err) => {
                    warn!(run_id = %run_id, error = %err, "failed to create review item")
                }
            }
        }

        Ok(record)
    }
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

fn minor(code: &str, stage: &str, message: String) -> Option<QualityIssue> {
    Some(QualityIssue {
        code: code.to_string(),
        severity: IssueSeverity::Minor,
        stage: stage.to_string(),
        message,
    })
}

fn major(code: &str, stage: &str, message: String) -> Option<QualityIssue> {
    Some(QualityIssue {
        code: code.to_string(),
        severity: IssueSeverity::Major,
        stage: stage.to_string(),
        message,
    })
}

/// The script came from a fallback writer.
fn detect_writing_fallback(
    run: &RunDocument,
    _t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    if run.quality.used_fallback(Stage::Writing.name()) {
        return Ok(minor(
            "WRITING_FALLBACK",
            Stage::Writing.name(),
            "script was produced by a fallback provider".to_string(),
        ));
    }
    Ok(None)
}

/// The video came from a fallback renderer.
fn detect_rendering_fallback(
    run: &RunDocument,
    _t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    if run.quality.used_fallback(Stage::Rendering.name()) {
        return Ok(minor(
            "RENDERING_FALLBACK",
            Stage::Rendering.name(),
            "video was produced by a fallback renderer".to_string(),
        ));
    }
    Ok(None)
}

/// Some stage needed an unusual number of retries to get through.
fn detect_high_retries(
    run: &RunDocument,
    t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    let worst = run
        .stages
        .iter()
        .filter(|(_, record)| record.retry_attempts >= t.retry_minor)
        .max_by_key(|(_, record)| record.retry_attempts);

    Ok(worst.and_then(|(stage, record)| {
        minor(
            "HIGH_RETRY_COUNT",
            stage,
            format!("stage needed {} retries", record.retry_attempts),
        )
    }))
}

/// Too many sources failed to fetch during sourcing.
fn detect_source_loss(
    run: &RunDocument,
    t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    let Some(output) = run.outputs.get(Stage::Sourcing.name()) else {
        return Ok(None);
    };
    let total = output
        .get("sources_total")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    if total == 0 {
        return Ok(None);
    }
    let failed = output
        .get("sources_failed")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    ensure!(
        failed <= total,
        "sourcing reported {failed} failures out of {total} sources"
    );

    let ratio = failed as f64 / total as f64;
    if ratio > t.source_loss_major_ratio {
        return Ok(major(
            "SOURCE_LOSS_HIGH",
            Stage::Sourcing.name(),
            format!("{failed} of {total} sources failed"),
        ));
    }
    if failed > 0 {
        return Ok(minor(
            "SOURCE_LOSS",
            Stage::Sourcing.name(),
            format!("{failed} of {total} sources failed"),
        ));
    }
    Ok(None)
}

/// Episode duration outside the acceptable range, or close to its edge.
fn detect_duration_range(
    run: &RunDocument,
    t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    let Some(secs) = run
        .outputs
        .get(Stage::Rendering.name())
        .and_then(|o| o.get("duration_secs"))
        .and_then(Value::as_f64)
    else {
        return Ok(None);
    };
    ensure!(
        secs.is_finite() && secs >= 0.0,
        "rendering reported a nonsensical duration: {secs}"
    );

    if secs < t.duration_min_secs || secs > t.duration_max_secs {
        return Ok(major(
            "DURATION_OUT_OF_RANGE",
            Stage::Rendering.name(),
            format!(
                "duration {secs:.0}s outside [{:.0}s, {:.0}s]",
                t.duration_min_secs, t.duration_max_secs
            ),
        ));
    }
    let low_edge = t.duration_min_secs * (1.0 + t.duration_edge_band);
    let high_edge = t.duration_max_secs * (1.0 - t.duration_edge_band);
    if secs < low_edge || secs > high_edge {
        return Ok(minor(
            "DURATION_NEAR_EDGE",
            Stage::Rendering.name(),
            format!("duration {secs:.0}s is close to the range edge"),
        ));
    }
    Ok(None)
}

/// Run-wide degradation: a couple of degraded stages is a warning, more
/// than the cap means the episode is not trustworthy without a human look.
fn detect_degraded_stages(
    run: &RunDocument,
    t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    let count = run.quality.degraded_stages.len();
    let names = run
        .quality
        .degraded_stages
        .iter()
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    if count > t.degraded_major_count {
        return Ok(major(
            "MANY_DEGRADED_STAGES",
            "run",
            format!("{count} stages degraded: {names}"),
        ));
    }
    if count > 0 {
        return Ok(minor(
            "DEGRADED_STAGES",
            "run",
            format!("{count} stage(s) degraded: {names}"),
        ));
    }
    Ok(None)
}

/// Fallback script AND fallback render in the same run: each alone is a
/// minor wobble, together they compound into content nobody vetted.
fn detect_combined_fallbacks(
    run: &RunDocument,
    _t: &GateThresholds,
) -> anyhow::Result<Option<QualityIssue>> {
    if run.quality.used_fallback(Stage::Writing.name())
        && run.quality.used_fallback(Stage::Rendering.name())
    {
        return Ok(major(
            "COMBINED_FALLBACKS",
            "run",
            "both the script and the render came from fallback providers".to_string(),
        ));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use briefcast_state::{RunKey, StageRecord};
    use serde_json::json;

    fn run_doc() -> RunDocument {
        RunDocument::new(&RunKey::from("2026-08-23"), Utc::now())
    }

    fn check(run: &RunDocument) -> DecisionRecord {
        QualityGate::default().check(run)
    }

    #[test]
    fn clean_run_auto_publishes() {
        let record = check(&run_doc());
        assert_eq!(record.decision, PublishDecision::AutoPublish);
        assert!(record.issues.is_empty());
        assert_eq!(record.reasons, vec!["no quality issues detected"]);
    }

    #[test]
    fn one_minor_publishes_with_warning() {
        let mut run = run_doc();
        run.quality.record_fallback("writing", "backup-llm");

        let record = check(&run);
        assert_eq!(record.decision, PublishDecision::AutoPublishWithWarning);
        assert_eq!(record.metrics.minor_issues, 1);
        assert_eq!(record.metrics.major_issues, 0);
    }

    #[test]
    fn two_minors_still_publish_with_warning() {
        let mut run = run_doc();
        run.quality.record_fallback("writing", "backup-llm");
        run.stages.insert(
            "sourcing".to_string(),
            StageRecord {
                retry_attempts: 3,
                ..StageRecord::default()
            },
        );

        let record = check(&run);
        assert_eq!(record.decision, PublishDecision::AutoPublishWithWarning);
        assert_eq!(record.metrics.minor_issues, 2);
    }

    #[test]
    fn three_minors_escalate_to_review() {
        let mut run = run_doc();
        run.quality.record_fallback("writing", "backup-llm");
        run.stages.insert(
            "sourcing".to_string(),
            StageRecord {
                retry_attempts: 4,
                ..StageRecord::default()
            },
        );
        run.outputs.insert(
            "sourcing".to_string(),
            json!({"sources_total": 10, "sources_failed": 1}),
        );

        let record = check(&run);
        assert_eq!(record.decision, PublishDecision::HumanReview);
        assert_eq!(record.metrics.minor_issues, 3);
        assert_eq!(record.metrics.major_issues, 0);
    }

    #[test]
    fn any_major_escalates_regardless_of_minors() {
        let mut run = run_doc();
        run.outputs.insert(
            "sourcing".to_string(),
            json!({"sources_total": 10, "sources_failed": 6}),
        );

        let record = check(&run);
        assert_eq!(record.decision, PublishDecision::HumanReview);
        assert_eq!(record.metrics.major_issues, 1);
    }

    #[test]
    fn combined_fallbacks_compound_into_major() {
        let mut run = run_doc();
        run.quality.record_fallback("writing", "backup-llm");
        run.quality.record_fallback("rendering", "backup-render");

        let record = check(&run);
        // two minors plus the combined major
        assert_eq!(record.decision, PublishDecision::HumanReview);
        assert_eq!(record.metrics.major_issues, 1);
        assert_eq!(record.metrics.minor_issues, 2);
        assert!(record
            .issues
            .iter()
            .any(|i| i.code == "COMBINED_FALLBACKS"));
    }

    #[test]
    fn duration_checks_have_hard_and_soft_bands() {
        let cases = [
            (45.0, Some("DURATION_OUT_OF_RANGE")),
            (700.0, Some("DURATION_OUT_OF_RANGE")),
            (95.0, Some("DURATION_NEAR_EDGE")),
            (545.0, Some("DURATION_NEAR_EDGE")),
            (300.0, None),
        ];
        for (secs, expected) in cases {
            let mut run = run_doc();
            run.outputs
                .insert("rendering".to_string(), json!({"duration_secs": secs}));
            let record = check(&run);
            let codes: Vec<&str> = record.issues.iter().map(|i| i.code.as_str()).collect();
            match expected {
                Some(code) => assert_eq!(codes, vec![code], "duration {secs}"),
                None => assert!(codes.is_empty(), "duration {secs} raised {codes:?}"),
            }
        }
    }

    #[test]
    fn degraded_stage_count_has_cap() {
        let mut run = run_doc();
        run.quality.mark_degraded("research");
        assert_eq!(
            check(&run).decision,
            PublishDecision::AutoPublishWithWarning
        );

        run.quality.mark_degraded("synthesis");
        run.quality.mark_degraded("rendering");
        let record = check(&run);
        assert!(record
            .issues
            .iter()
            .any(|i| i.code == "MANY_DEGRADED_STAGES"
                && i.severity == IssueSeverity::Major));
    }

    #[test]
    fn broken_detector_is_swallowed() {
        let mut run = run_doc();
        // impossible ratio makes the source-loss detector bail
        run.outputs.insert(
            "sourcing".to_string(),
            json!({"sources_total": 2, "sources_failed": 9}),
        );

        let record = check(&run);
        assert_eq!(record.decision, PublishDecision::AutoPublish);
        assert!(record.issues.is_empty());
    }

    #[test]
    fn metrics_mirror_quality_context() {
        let mut run = run_doc();
        run.quality.mark_degraded("research");
        run.quality.record_fallback("writing", "backup-llm");

        let record = check(&run);
        assert_eq!(record.metrics.degraded_stages, 1);
        assert_eq!(record.metrics.fallbacks_used, 1);
    }
}
