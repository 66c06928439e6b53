//! Storage trait for Briefcast run state.
//!
//! [`RunStateStore`] is the single persistence abstraction consumed by the
//! stage executor and the publish gate. It is document-oriented: one
//! [`RunDocument`](crate::model::RunDocument) per run key, with every write
//! scoped to a single run id and expressed as a merge-patch. Backends are
//! async and interchangeable; an in-memory fake lives in [`crate::memory`]
//! and a SurrealDB implementation in [`crate::surreal`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{
    DecisionRecord, ErrorInfo, ProviderInfo, QualityContext, RunDocument, RunKey, StageRecord,
    StageStatus,
};

/// Merge-patch for a single stage record.
///
/// `None` fields are left untouched; `Some` fields overwrite. Applied
/// atomically to one stage entry within one run document.
#[derive(Debug, Clone, Default)]
pub struct StagePatch {
    pub status: Option<StageStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub provider: Option<ProviderInfo>,
    pub cost: Option<f64>,
    pub retry_attempts: Option<u32>,
    pub error: Option<ErrorInfo>,
}

impl StagePatch {
    /// Patch that marks a stage running as of `now`.
    pub fn running(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(StageStatus::Running),
            started_at: Some(now),
            ..Default::default()
        }
    }

    /// Patch that marks a stage completed with its outcome metadata.
    pub fn completed(
        now: DateTime<Utc>,
        duration_ms: u64,
        provider: ProviderInfo,
        cost: f64,
    ) -> Self {
        Self {
            status: Some(StageStatus::Completed),
            ended_at: Some(now),
            duration_ms: Some(duration_ms),
            provider: Some(provider),
            cost: Some(cost),
            ..Default::default()
        }
    }

    /// Patch that marks a stage failed with its error.
    pub fn failed(now: DateTime<Utc>, error: ErrorInfo) -> Self {
        Self {
            status: Some(StageStatus::Failed),
            ended_at: Some(now),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Patch that marks a stage skipped, carrying the error that caused it.
    pub fn skipped(now: DateTime<Utc>, error: ErrorInfo) -> Self {
        Self {
            status: Some(StageStatus::Skipped),
            ended_at: Some(now),
            error: Some(error),
            ..Default::default()
        }
    }

    /// Apply this patch to a stage record in place.
    pub fn apply(&self, record: &mut StageRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(t) = self.started_at {
            record.started_at = Some(t);
        }
        if let Some(t) = self.ended_at {
            record.ended_at = Some(t);
        }
        if let Some(d) = self.duration_ms {
            record.duration_ms = Some(d);
        }
        if let Some(p) = &self.provider {
            record.provider = Some(p.clone());
        }
        if let Some(c) = self.cost {
            record.cost = Some(c);
        }
        if let Some(r) = self.retry_attempts {
            record.retry_attempts = r;
        }
        if let Some(e) = &self.error {
            record.error = Some(e.clone());
        }
    }
}

/// Run-state persistence.
///
/// Guarantees:
/// - One document per run key; `initialize_run` is idempotent
///   (create-if-absent, never resets an existing document).
/// - All stage-level writes are merge-patches scoped to one run id.
/// - From the executor's point of view every write except `initialize_run`
///   is best-effort: callers log and swallow failures.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Create the run document if it does not exist. Idempotent; the only
    /// store call whose failure is fatal to starting a run.
    async fn initialize_run(&self, run_id: &RunKey) -> StoreResult<()>;

    /// Fetch the run document, or `None` if no run exists for the key.
    async fn get_run(&self, run_id: &RunKey) -> StoreResult<Option<RunDocument>>;

    /// Re-arm an existing run: status back to running, `started_at` reset,
    /// `ended_at` cleared. Used by resume and stale-run supersede.
    async fn mark_running(&self, run_id: &RunKey) -> StoreResult<()>;

    /// Merge-patch one stage record. Creates the record if absent.
    async fn update_stage(&self, run_id: &RunKey, stage: &str, patch: StagePatch)
        -> StoreResult<()>;

    /// Record the retry attempt counter for a stage.
    async fn update_retry_attempts(
        &self,
        run_id: &RunKey,
        stage: &str,
        attempts: u32,
    ) -> StoreResult<()>;

    /// Persist a stage's output payload (and its content digest) for resume.
    async fn persist_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()>;

    /// Load a previously persisted stage output, if any.
    async fn load_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
    ) -> StoreResult<Option<serde_json::Value>>;

    /// Overwrite the run's quality context (contexts only grow, so a full
    /// overwrite of the latest accumulated value is safe).
    async fn update_quality_context(
        &self,
        run_id: &RunKey,
        context: &QualityContext,
    ) -> StoreResult<()>;

    /// Record the aggregate run cost.
    async fn update_total_cost(&self, run_id: &RunKey, cost: f64) -> StoreResult<()>;

    /// Terminal transition: run completed.
    async fn mark_complete(&self, run_id: &RunKey) -> StoreResult<()>;

    /// Terminal transition: run failed with the aborting error.
    async fn mark_failed(&self, run_id: &RunKey, error: &ErrorInfo) -> StoreResult<()>;

    /// Persist the publish decision. Written once per run.
    async fn persist_decision(
        &self,
        run_id: &RunKey,
        decision: &DecisionRecord,
    ) -> StoreResult<()>;
}

/// Shared helper: current time. Split out so backends stay consistent.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}
