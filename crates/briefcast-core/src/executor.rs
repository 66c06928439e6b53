//! Stage executor: the ordered pipeline runner.
//!
//! Walks the static stage order, chaining each stage's output into the next
//! stage's input, invoking every stage through the retry wrapper, applying
//! the abort/skip/degrade failure policy, and persisting progress to the run
//! state store as it goes. Supports full execution and resume-from-stage.
//!
//! Persistence policy: `initialize_run` is the only store call whose failure
//! aborts anything. Every other write is best-effort — logged and swallowed —
//! so the in-memory result stays authoritative for the caller even when the
//! store is unhealthy.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use briefcast_state::{
    QualityContext, RunKey, RunStateStore, RunStatus, Severity, StagePatch, StageStatus,
    StoreResult,
};

use crate::error::{EngineError, Result, StageFailure};
use crate::policy::{decide, FailureAction, RunAccumulator};
use crate::retry::with_retry;
use crate::stage::{Stage, StageHandlers, StageInput};

/// Attempts for creating the run document (1 initial + 2 retries).
const INIT_ATTEMPTS: u32 = 3;
/// Linear backoff unit between initialization attempts.
const INIT_BACKOFF: Duration = Duration::from_millis(500);

/// Terminal error surfaced in a [`RunResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunErrorSummary {
    pub code: String,
    pub message: String,
    pub stage: String,
    pub severity: Option<Severity>,
}

/// Outcome of a full or resumed run, returned to the trigger layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub run_id: String,
    pub status: RunStatus,
    pub completed_stages: Vec<String>,
    pub skipped_stages: Vec<String>,
    pub quality: QualityContext,
    pub total_duration_ms: u64,
    pub total_cost: f64,
    pub error: Option<RunErrorSummary>,
}

/// The pipeline orchestrator.
pub struct StageExecutor {
    store: Arc<dyn RunStateStore>,
    handlers: StageHandlers,
}

impl StageExecutor {
    pub fn new(store: Arc<dyn RunStateStore>, handlers: StageHandlers) -> Self {
        Self { store, handlers }
    }

    /// Execute the full pipeline for `run_id`.
    ///
    /// Fails fast with [`EngineError::AlreadyRunning`] when a non-stale run
    /// with the same key is active; a stale one (older than the maximum run
    /// age) is superseded. Run-document creation is retried with linear
    /// backoff and its exhaustion is the only store failure that aborts.
    pub async fn execute(&self, run_id: &RunKey) -> Result<RunResult> {
        let started = Instant::now();
        let now = Utc::now();

        let existing = self.store.get_run(run_id).await?;
        if let Some(doc) = &existing {
            if doc.blocks_new_run(now) {
                return Err(EngineError::AlreadyRunning(run_id.to_string()));
            }
            if doc.is_stale(now) {
                warn!(run_id = %run_id, started_at = %doc.started_at,
                    "superseding stale running run");
            }
        }

        self.initialize_with_retry(run_id).await?;
        if existing.is_some() {
            // Re-arm the pre-existing document so started_at reflects this
            // attempt (initialize_run never resets an existing doc).
            best_effort("mark_running", self.store.mark_running(run_id)).await;
        }

        info!(run_id = %run_id, "starting pipeline run");
        Ok(self
            .run_loop(run_id, 0, RunAccumulator::new(), started)
            .await)
    }

    /// Resume an existing run.
    ///
    /// The resume point is `from` when given, otherwise one past the last
    /// completed stage (scanning from the end of the order). The chaining
    /// input is reloaded from the persisted output of the stage immediately
    /// preceding the resume point.
    pub async fn resume(&self, run_id: &RunKey, from: Option<Stage>) -> Result<RunResult> {
        let started = Instant::now();

        let doc = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound(run_id.to_string()))?;

        let order = Stage::ordered();
        let resume_index = match from {
            Some(stage) => order
                .iter()
                .position(|s| *s == stage)
                .ok_or_else(|| EngineError::UnknownStage(stage.name().to_string()))?,
            None => order
                .iter()
                .rposition(|s| {
                    doc.stages
                        .get(s.name())
                        .map(|r| r.status == StageStatus::Completed)
                        .unwrap_or(false)
                })
                .map(|i| i + 1)
                .unwrap_or(0),
        };

        // Reload the chaining payload from the stage just before the resume
        // point; fall back to an empty payload when it was never persisted.
        let (chain, chain_stage) = if resume_index == 0 {
            (json!({}), None)
        } else {
            let prev = order[resume_index - 1];
            match self.store.load_stage_output(run_id, prev.name()).await {
                Ok(Some(payload)) => (payload, Some(prev)),
                Ok(None) => {
                    warn!(run_id = %run_id, stage = prev.name(),
                        "no persisted output for chaining input, resuming with empty payload");
                    (json!({}), Some(prev))
                }
                Err(err) => {
                    warn!(run_id = %run_id, stage = prev.name(), error = %err,
                        "failed to load chaining input, resuming with empty payload");
                    (json!({}), Some(prev))
                }
            }
        };

        let completed: Vec<Stage> = order[..resume_index]
            .iter()
            .copied()
            .filter(|s| {
                doc.stages
                    .get(s.name())
                    .map(|r| r.status == StageStatus::Completed)
                    .unwrap_or(false)
            })
            .collect();

        // Seed the fold with the aggregate cost already persisted so the
        // post-run update_total_cost write does not erase pre-resume spend.
        let acc = RunAccumulator::seeded(
            completed,
            doc.quality.clone(),
            doc.total_cost,
            chain,
            chain_stage,
        );

        best_effort("mark_running", self.store.mark_running(run_id)).await;

        info!(
            run_id = %run_id,
            from = order.get(resume_index).map(|s| s.name()).unwrap_or("end"),
            "resuming pipeline run"
        );
        Ok(self.run_loop(run_id, resume_index, acc, started).await)
    }

    // -- internals -----------------------------------------------------------

    async fn initialize_with_retry(&self, run_id: &RunKey) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            match self.store.initialize_run(run_id).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt + 1 < INIT_ATTEMPTS => {
                    attempt += 1;
                    // Linear, not exponential: the document create is cheap
                    // and the store is either back quickly or down hard.
                    let delay = INIT_BACKOFF * attempt;
                    warn!(run_id = %run_id, attempt, error = %err,
                        "run initialization failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(run_id = %run_id, error = %err,
                        "run initialization failed after retries, aborting run");
                    return Err(EngineError::InitFailed {
                        run_id: run_id.to_string(),
                        source: err,
                    });
                }
            }
        }
    }

    /// The shared stage loop for execute and resume.
    async fn run_loop(
        &self,
        run_id: &RunKey,
        start_index: usize,
        mut acc: RunAccumulator,
        started: Instant,
    ) -> RunResult {
        for stage in Stage::ordered().into_iter().skip(start_index) {
            acc = self.run_stage(run_id, stage, acc).await;
            if acc.aborted() {
                break;
            }
        }

        // The notification hook runs exactly once, aborted or not, and its
        // failure never changes the run outcome.
        self.notify(run_id, &acc).await;

        if let Some(cause) = &acc.abort {
            best_effort(
                "mark_failed",
                self.store
                    .mark_failed(run_id, &cause.failure.to_error_info()),
            )
            .await;
        } else {
            best_effort("mark_complete", self.store.mark_complete(run_id)).await;
        }
        best_effort(
            "update_total_cost",
            self.store.update_total_cost(run_id, acc.total_cost),
        )
        .await;

        let result = Self::build_result(run_id, acc, started);
        if result.success {
            info!(run_id = %run_id, cost = result.total_cost,
                duration_ms = result.total_duration_ms, "pipeline run completed");
        } else {
            error!(run_id = %run_id,
                stage = result.error.as_ref().map(|e| e.stage.as_str()).unwrap_or("unknown"),
                "pipeline run failed");
        }
        result
    }

    /// Execute one stage through the retry wrapper and fold the outcome.
    async fn run_stage(
        &self,
        run_id: &RunKey,
        stage: Stage,
        acc: RunAccumulator,
    ) -> RunAccumulator {
        let policy = stage.retry_policy();
        let input = StageInput {
            run_id: run_id.to_string(),
            previous_stage: acc.chain_stage.map(|s| s.name().to_string()),
            data: acc.chain.clone(),
            retry: policy,
            quality: acc.quality.clone(),
        };

        info!(run_id = %run_id, stage = stage.name(), "executing stage");
        best_effort(
            "update_stage",
            self.store
                .update_stage(run_id, stage.name(), StagePatch::running(Utc::now())),
        )
        .await;

        let handler = Arc::clone(self.handlers.handler(stage));
        let outcome = with_retry(
            &policy,
            || {
                let handler = Arc::clone(&handler);
                let input = input.clone();
                async move { handler.run(input).await }
            },
            |attempt, delay, failure| {
                warn!(run_id = %run_id, stage = stage.name(), attempt,
                    delay_ms = delay.as_millis() as u64, code = %failure.code,
                    "stage attempt failed, backing off");
            },
        )
        .await;

        match outcome {
            Ok(retried) => {
                let output = retried.value;
                best_effort(
                    "update_retry_attempts",
                    self.store
                        .update_retry_attempts(run_id, stage.name(), retried.attempts - 1),
                )
                .await;
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::completed(
                            Utc::now(),
                            output.duration_ms,
                            output.provider.clone(),
                            output.cost,
                        ),
                    ),
                )
                .await;
                best_effort(
                    "persist_stage_output",
                    self.store
                        .persist_stage_output(run_id, stage.name(), &output.data),
                )
                .await;

                let acc = acc.complete(stage, &output);
                best_effort(
                    "update_quality_context",
                    self.store.update_quality_context(run_id, &acc.quality),
                )
                .await;
                acc
            }
            Err(failure) => {
                best_effort(
                    "update_retry_attempts",
                    self.store.update_retry_attempts(
                        run_id,
                        stage.name(),
                        failure.attempts.saturating_sub(1),
                    ),
                )
                .await;
                self.apply_failure(run_id, stage, failure, acc).await
            }
        }
    }

    /// Fold an exhausted stage failure per the abort/skip/degrade table.
    async fn apply_failure(
        &self,
        run_id: &RunKey,
        stage: Stage,
        failure: StageFailure,
        acc: RunAccumulator,
    ) -> RunAccumulator {
        let action = decide(failure.effective_severity(), stage.criticality());
        let now = Utc::now();

        match action {
            FailureAction::Abort => {
                error!(run_id = %run_id, stage = stage.name(), code = %failure.code,
                    "stage failed critically, aborting run");
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::failed(now, failure.to_error_info()),
                    ),
                )
                .await;
                acc.abort(stage, failure)
            }
            FailureAction::Skip => {
                info!(run_id = %run_id, stage = stage.name(), code = %failure.code,
                    "stage failed recoverably, skipping");
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::skipped(now, failure.to_error_info()),
                    ),
                )
                .await;
                acc.skip(stage)
            }
            FailureAction::Degrade => {
                warn!(run_id = %run_id, stage = stage.name(), code = %failure.code,
                    "stage failed, continuing degraded");
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::skipped(now, failure.to_error_info()),
                    ),
                )
                .await;
                let acc = acc.degrade(stage);
                best_effort(
                    "update_quality_context",
                    self.store.update_quality_context(run_id, &acc.quality),
                )
                .await;
                acc
            }
        }
    }

    /// Invoke the notification hook exactly once with a synthetic input
    /// describing the run outcome. Failures are logged and swallowed.
    async fn notify(&self, run_id: &RunKey, acc: &RunAccumulator) {
        let stage = Stage::Notification;
        let data = json!({
            "aborted": acc.aborted(),
            "failed_stage": acc.abort.as_ref().map(|c| c.stage.name()),
            "error": acc.abort.as_ref().map(|c| json!({
                "code": c.failure.code,
                "message": c.failure.message,
            })),
            "completed": acc.completed.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "skipped": acc.skipped.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "total_cost": acc.total_cost,
        });
        let input = StageInput {
            run_id: run_id.to_string(),
            previous_stage: None,
            data,
            retry: stage.retry_policy(),
            quality: acc.quality.clone(),
        };

        best_effort(
            "update_stage",
            self.store
                .update_stage(run_id, stage.name(), StagePatch::running(Utc::now())),
        )
        .await;

        match self.handlers.notification.run(input).await {
            Ok(output) => {
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::completed(
                            Utc::now(),
                            output.duration_ms,
                            output.provider,
                            output.cost,
                        ),
                    ),
                )
                .await;
            }
            Err(failure) => {
                warn!(run_id = %run_id, code = %failure.code,
                    "notification stage failed; run outcome unaffected");
                best_effort(
                    "update_stage",
                    self.store.update_stage(
                        run_id,
                        stage.name(),
                        StagePatch::failed(Utc::now(), failure.to_error_info()),
                    ),
                )
                .await;
            }
        }
    }

    fn build_result(run_id: &RunKey, acc: RunAccumulator, started: Instant) -> RunResult {
        let error = acc.abort.as_ref().map(|cause| RunErrorSummary {
            code: cause.failure.code.clone(),
            message: cause.failure.message.clone(),
            stage: cause.stage.name().to_string(),
            severity: cause.failure.effective_severity(),
        });
        let success = error.is_none();

        RunResult {
            success,
            run_id: run_id.to_string(),
            status: if success {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            },
            completed_stages: acc.completed.iter().map(|s| s.name().to_string()).collect(),
            skipped_stages: acc.skipped.iter().map(|s| s.name().to_string()).collect(),
            quality: acc.quality,
            total_duration_ms: started.elapsed().as_millis() as u64,
            total_cost: acc.total_cost,
            error,
        }
    }
}

/// Await a store write and swallow its failure with a warning. Durability of
/// observability data is best-effort; execution correctness never depends on
/// a status write landing.
async fn best_effort<T>(op: &'static str, fut: impl Future<Output = StoreResult<T>>) {
    if let Err(err) = fut.await {
        warn!(op, error = %err, "best-effort state write failed");
    }
}
