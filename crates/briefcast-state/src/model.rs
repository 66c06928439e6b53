//! Persisted run-state data model for the Briefcast pipeline.
//!
//! One [`RunDocument`] exists per logical run key (a calendar date). It is
//! created once, mutated only by the stage executor, and terminal once its
//! status reaches `completed` or `failed`. Stage records, persisted stage
//! outputs, and the publish decision all live as sub-fields of the same
//! document so the whole run can be resumed or audited from a single read.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Maximum age of a `running` run before it is considered abandoned and may
/// be superseded by a new attempt.
pub const MAX_RUN_AGE_HOURS: i64 = 4;

// ---------------------------------------------------------------------------
// Run key
// ---------------------------------------------------------------------------

/// Logical run identifier — one per calendar date (e.g. `"2026-08-23"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunKey(pub String);

impl RunKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunKey {
    fn from(s: &str) -> Self {
        RunKey(s.to_string())
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Statuses and severity taxonomy
// ---------------------------------------------------------------------------

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// True when the status represents a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Status of a single stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    /// True when the status represents a terminal state for the stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Per-error severity classification.
///
/// Describes how a specific failure should be handled, independently of
/// which stage raised it. Ordered worst-first so `Critical < Degraded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Degraded,
    Recoverable,
}

/// Static per-stage failure-policy tier.
///
/// Same three levels as [`Severity`] but a different role: criticality is a
/// deployment-time property of the stage, consulted only when an error's own
/// severity is ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Critical,
    Degraded,
    Recoverable,
}

// ---------------------------------------------------------------------------
// Stage records
// ---------------------------------------------------------------------------

/// Which tier of the provider chain served a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTier {
    Primary,
    Fallback,
}

/// Provider metadata recorded for a completed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderInfo {
    /// Provider name (e.g. `"claude"`, `"elevenlabs"`).
    pub name: String,
    /// Primary or fallback tier.
    pub tier: ProviderTier,
    /// Number of providers tried before this one succeeded, inclusive.
    pub attempts: u32,
}

/// Structured error captured on a failed stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `"SOURCE_FETCH_FAILED"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Severity when the failure carried one; `None` means the stage's
    /// static criticality decides.
    pub severity: Option<Severity>,
}

/// Execution record for one stage, written incrementally as it progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub provider: Option<ProviderInfo>,
    pub cost: Option<f64>,
    pub retry_attempts: u32,
    pub error: Option<ErrorInfo>,
}

impl Default for StageRecord {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            provider: None,
            cost: None,
            retry_attempts: 0,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Quality context
// ---------------------------------------------------------------------------

/// Run-scoped quality evidence, accumulated monotonically.
///
/// Never shrinks within a run: merges only add degraded stages, fallback
/// usages, and flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityContext {
    /// Stage names that failed with a degraded-quality outcome.
    pub degraded_stages: BTreeSet<String>,
    /// `"stage:provider"` entries for every fallback-tier provider used.
    pub fallbacks_used: Vec<String>,
    /// Free-form warning flags raised by stages.
    pub flags: Vec<String>,
}

impl QualityContext {
    /// Mark a stage as degraded.
    pub fn mark_degraded(&mut self, stage: &str) {
        self.degraded_stages.insert(stage.to_string());
    }

    /// Record that a fallback-tier provider served a stage.
    pub fn record_fallback(&mut self, stage: &str, provider: &str) {
        let entry = format!("{stage}:{provider}");
        if !self.fallbacks_used.contains(&entry) {
            self.fallbacks_used.push(entry);
        }
    }

    /// Append warning flags, deduplicated.
    pub fn add_flags<I: IntoIterator<Item = String>>(&mut self, flags: I) {
        for flag in flags {
            if !self.flags.contains(&flag) {
                self.flags.push(flag);
            }
        }
    }

    /// Whether a fallback was recorded for the given stage.
    pub fn used_fallback(&self, stage: &str) -> bool {
        let prefix = format!("{stage}:");
        self.fallbacks_used.iter().any(|f| f.starts_with(&prefix))
    }
}

// ---------------------------------------------------------------------------
// Publish decision
// ---------------------------------------------------------------------------

/// Severity of a single quality issue found by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Major,
    Minor,
}

/// One issue raised by a gate detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityIssue {
    /// Stable issue code (e.g. `"RENDER_FALLBACK"`).
    pub code: String,
    pub severity: IssueSeverity,
    /// Stage the issue pertains to.
    pub stage: String,
    pub message: String,
}

/// The three possible publish outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishDecision {
    AutoPublish,
    AutoPublishWithWarning,
    HumanReview,
}

/// Aggregate counters captured alongside a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateMetrics {
    pub major_issues: u32,
    pub minor_issues: u32,
    pub degraded_stages: u32,
    pub fallbacks_used: u32,
}

/// Persisted publish decision for a run. Written once, immutable after
/// creation — review resolutions are recorded separately as review items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision: PublishDecision,
    pub issues: Vec<QualityIssue>,
    pub reasons: Vec<String>,
    pub metrics: GateMetrics,
    pub decided_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Run document
// ---------------------------------------------------------------------------

/// The per-run persisted document: one per run key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    /// Run key (calendar date string).
    pub run_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Aggregate cost across completed stages.
    pub total_cost: f64,
    pub quality: QualityContext,
    /// Per-stage execution records, keyed by stage name.
    pub stages: BTreeMap<String, StageRecord>,
    /// Persisted stage output payloads for resumption, keyed by stage name.
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// SHA-256 digest of each persisted output payload.
    pub output_digests: BTreeMap<String, String>,
    /// Terminal error when the run aborted.
    pub error: Option<ErrorInfo>,
    /// Publish decision, written once after the run completes.
    pub decision: Option<DecisionRecord>,
}

impl RunDocument {
    /// Create a fresh running document for the given run key.
    pub fn new(run_id: &RunKey, now: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.0.clone(),
            status: RunStatus::Running,
            started_at: now,
            ended_at: None,
            total_cost: 0.0,
            quality: QualityContext::default(),
            stages: BTreeMap::new(),
            outputs: BTreeMap::new(),
            output_digests: BTreeMap::new(),
            error: None,
            decision: None,
        }
    }

    /// A `running` run older than [`MAX_RUN_AGE_HOURS`] is abandoned and may
    /// be superseded by a new attempt.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::Running
            && now - self.started_at > Duration::hours(MAX_RUN_AGE_HOURS)
    }

    /// True when a new attempt with the same key must be refused.
    pub fn blocks_new_run(&self, now: DateTime<Utc>) -> bool {
        self.status == RunStatus::Running && !self.is_stale(now)
    }
}

/// SHA-256 hex digest of a JSON payload, used to fingerprint persisted stage
/// outputs for preview references and resume verification.
pub fn payload_digest(payload: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn run_status_terminal_semantics() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
    }

    #[test]
    fn stage_status_terminal_semantics() {
        assert!(!StageStatus::Pending.is_terminal());
        assert!(!StageStatus::Running.is_terminal());
        assert!(StageStatus::Completed.is_terminal());
        assert!(StageStatus::Failed.is_terminal());
        assert!(StageStatus::Skipped.is_terminal());
    }

    #[test]
    fn fresh_run_is_not_stale() {
        let doc = RunDocument::new(&RunKey::from("2026-08-23"), Utc::now());
        assert!(!doc.is_stale(Utc::now()));
        assert!(doc.blocks_new_run(Utc::now()));
    }

    #[test]
    fn old_running_run_is_stale_and_does_not_block() {
        let started = Utc::now() - Duration::hours(MAX_RUN_AGE_HOURS + 1);
        let doc = RunDocument::new(&RunKey::from("2026-08-23"), started);
        assert!(doc.is_stale(Utc::now()));
        assert!(!doc.blocks_new_run(Utc::now()));
    }

    #[test]
    fn terminal_run_never_blocks() {
        let mut doc = RunDocument::new(&RunKey::from("2026-08-23"), Utc::now());
        doc.status = RunStatus::Completed;
        assert!(!doc.blocks_new_run(Utc::now()));
        assert!(!doc.is_stale(Utc::now()));
    }

    #[test]
    fn quality_context_accumulates_monotonically() {
        let mut ctx = QualityContext::default();
        ctx.mark_degraded("research");
        ctx.mark_degraded("research");
        ctx.record_fallback("writing", "gpt");
        ctx.record_fallback("writing", "gpt");
        ctx.add_flags(vec!["low_source_count".to_string()]);
        ctx.add_flags(vec!["low_source_count".to_string()]);

        assert_eq!(ctx.degraded_stages.len(), 1);
        assert_eq!(ctx.fallbacks_used, vec!["writing:gpt".to_string()]);
        assert_eq!(ctx.flags.len(), 1);
        assert!(ctx.used_fallback("writing"));
        assert!(!ctx.used_fallback("rendering"));
    }

    #[test]
    fn payload_digest_is_deterministic() {
        let a = json!({ "script": "hello", "words": 2 });
        let b = json!({ "script": "hello", "words": 2 });
        assert_eq!(payload_digest(&a), payload_digest(&b));
        assert_ne!(payload_digest(&a), payload_digest(&json!({ "script": "bye" })));
    }

    #[test]
    fn serde_roundtrip_run_document() {
        let mut doc = RunDocument::new(&RunKey::from("2026-08-23"), Utc::now());
        doc.stages.insert(
            "sourcing".to_string(),
            StageRecord {
                status: StageStatus::Completed,
                provider: Some(ProviderInfo {
                    name: "newsapi".to_string(),
                    tier: ProviderTier::Primary,
                    attempts: 1,
                }),
                cost: Some(0.02),
                ..Default::default()
            },
        );
        let json = serde_json::to_string(&doc).unwrap();
        let back: RunDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }
}
