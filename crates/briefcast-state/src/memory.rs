//! In-memory fake for the run-state store (testing only)
//!
//! Provides [`MemoryRunStore`], which satisfies the [`RunStateStore`] trait
//! contract without any external dependencies.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    payload_digest, DecisionRecord, ErrorInfo, QualityContext, RunDocument, RunKey, RunStatus,
    StageRecord,
};
use crate::store::{now, RunStateStore, StagePatch};

/// In-memory run store backed by a `Mutex<BTreeMap<run_id, RunDocument>>`.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: Mutex<BTreeMap<String, RunDocument>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a run's start time, for exercising staleness handling.
    pub fn backdate_run(
        &self,
        run_id: &RunKey,
        started_at: chrono::DateTime<chrono::Utc>,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.started_at = started_at;
        })
    }

    fn with_doc<T>(
        &self,
        run_id: &RunKey,
        f: impl FnOnce(&mut RunDocument) -> T,
    ) -> StoreResult<T> {
        let mut runs = self.runs.lock().unwrap();
        let doc = runs
            .get_mut(run_id.as_str())
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        Ok(f(doc))
    }
}

#[async_trait]
impl RunStateStore for MemoryRunStore {
    async fn initialize_run(&self, run_id: &RunKey) -> StoreResult<()> {
        let mut runs = self.runs.lock().unwrap();
        runs.entry(run_id.as_str().to_string())
            .or_insert_with(|| RunDocument::new(run_id, now()));
        Ok(())
    }

    async fn get_run(&self, run_id: &RunKey) -> StoreResult<Option<RunDocument>> {
        let runs = self.runs.lock().unwrap();
        Ok(runs.get(run_id.as_str()).cloned())
    }

    async fn mark_running(&self, run_id: &RunKey) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.status = RunStatus::Running;
            doc.started_at = now();
            doc.ended_at = None;
        })
    }

    async fn update_stage(
        &self,
        run_id: &RunKey,
        stage: &str,
        patch: StagePatch,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            let record = doc
                .stages
                .entry(stage.to_string())
                .or_insert_with(StageRecord::default);
            patch.apply(record);
        })
    }

    async fn update_retry_attempts(
        &self,
        run_id: &RunKey,
        stage: &str,
        attempts: u32,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            let record = doc
                .stages
                .entry(stage.to_string())
                .or_insert_with(StageRecord::default);
            record.retry_attempts = attempts;
        })
    }

    async fn persist_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.output_digests
                .insert(stage.to_string(), payload_digest(payload));
            doc.outputs.insert(stage.to_string(), payload.clone());
        })
    }

    async fn load_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        let runs = self.runs.lock().unwrap();
        let doc = runs
            .get(run_id.as_str())
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))?;
        Ok(doc.outputs.get(stage).cloned())
    }

    async fn update_quality_context(
        &self,
        run_id: &RunKey,
        context: &QualityContext,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.quality = context.clone();
        })
    }

    async fn update_total_cost(&self, run_id: &RunKey, cost: f64) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.total_cost = cost;
        })
    }

    async fn mark_complete(&self, run_id: &RunKey) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.status = RunStatus::Completed;
            doc.ended_at = Some(now());
        })
    }

    async fn mark_failed(&self, run_id: &RunKey, error: &ErrorInfo) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            doc.status = RunStatus::Failed;
            doc.ended_at = Some(now());
            doc.error = Some(error.clone());
        })
    }

    async fn persist_decision(
        &self,
        run_id: &RunKey,
        decision: &DecisionRecord,
    ) -> StoreResult<()> {
        self.with_doc(run_id, |doc| {
            // Decisions are written once; keep the first.
            if doc.decision.is_none() {
                doc.decision = Some(decision.clone());
            }
        })
    }
}
