//! SurrealDB-backed RunStateStore implementation.
//!
//! One document per run key in the `runs` table. Writes fetch the current
//! document, apply the merge-patch in Rust, and `UPDATE ... CONTENT` the row
//! back — all writes are scoped to a single run id, and within a run the
//! executor's sequential stage loop orders them, so no write races occur.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migrations;
use crate::model::{
    payload_digest, DecisionRecord, ErrorInfo, QualityContext, RunDocument, RunKey, RunStatus,
    StageRecord,
};
use crate::store::{now, RunStateStore, StagePatch};

/// SurrealDB-backed implementation of [`RunStateStore`].
pub struct SurrealRunStore {
    db: Surreal<Any>,
}

impl SurrealRunStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `briefcast/main`, and runs `init_schema`.
    pub async fn in_memory() -> StoreResult<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        db.use_ns("briefcast")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;

        info!("SurrealRunStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment.
    ///
    /// Honors `BRIEFCAST_DB_URL` when set; otherwise falls back to local
    /// persistence under `.briefcast/db`.
    pub async fn from_env() -> StoreResult<Self> {
        if let Ok(url) = std::env::var("BRIEFCAST_DB_URL") {
            let db = surrealdb::engine::any::connect(&url)
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;

            db.use_ns("briefcast")
                .use_db("main")
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?;

            migrations::init_schema(&db).await?;
            info!("SurrealRunStore connected ({})", url);
            return Ok(Self { db });
        }

        let path = ".briefcast/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StoreError::Connection(format!("failed to create database directory {path}: {e}"))
        })?;
        let url = format!("surrealkv://{path}");
        info!("no BRIEFCAST_DB_URL set, using local persistence: {}", url);

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to {url}: {e}")))?;

        db.use_ns("briefcast")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        Ok(Self { db })
    }

    // -- private helpers -----------------------------------------------------

    /// Fetch a run document by key, or `None` if absent.
    async fn fetch_run(&self, run_id: &RunKey) -> StoreResult<Option<RunDocument>> {
        let rid = run_id.as_str().to_string();
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE run_id = $rid")
            .bind(("rid", rid))
            .await?;

        let rows: Vec<RunDocument> = res.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Fetch a run document or fail with `RunNotFound`.
    async fn fetch_required(&self, run_id: &RunKey) -> StoreResult<RunDocument> {
        self.fetch_run(run_id)
            .await?
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    /// Write the full document back under its run key.
    async fn put_run(&self, doc: RunDocument) -> StoreResult<()> {
        let rid = doc.run_id.clone();
        self.db
            .query("UPDATE runs CONTENT $doc WHERE run_id = $rid")
            .bind(("doc", doc))
            .bind(("rid", rid))
            .await?;
        Ok(())
    }

    /// Fetch-modify-update a run document.
    async fn mutate(
        &self,
        run_id: &RunKey,
        f: impl FnOnce(&mut RunDocument) + Send,
    ) -> StoreResult<()> {
        let mut doc = self.fetch_required(run_id).await?;
        f(&mut doc);
        self.put_run(doc).await
    }
}

#[async_trait]
impl RunStateStore for SurrealRunStore {
    async fn initialize_run(&self, run_id: &RunKey) -> StoreResult<()> {
        if self.fetch_run(run_id).await?.is_some() {
            debug!(run_id = %run_id, "run already initialized");
            return Ok(());
        }

        let doc = RunDocument::new(run_id, now());
        debug!(run_id = %run_id, "creating run document");

        let _created: Option<RunDocument> = self.db.create("runs").content(doc).await?;
        Ok(())
    }

    async fn get_run(&self, run_id: &RunKey) -> StoreResult<Option<RunDocument>> {
        self.fetch_run(run_id).await
    }

    async fn mark_running(&self, run_id: &RunKey) -> StoreResult<()> {
        self.mutate(run_id, |doc| {
            doc.status = RunStatus::Running;
            doc.started_at = now();
            doc.ended_at = None;
        })
        .await
    }

    async fn update_stage(
        &self,
        run_id: &RunKey,
        stage: &str,
        patch: StagePatch,
    ) -> StoreResult<()> {
        self.mutate(run_id, |doc| {
            let record = doc
                .stages
                .entry(stage.to_string())
                .or_insert_with(StageRecord::default);
            patch.apply(record);
        })
        .await
    }

    async fn update_retry_attempts(
        &self,
        run_id: &RunKey,
        stage: &str,
        attempts: u32,
    ) -> StoreResult<()> {
        self.mutate(run_id, |doc| {
            let record = doc
                .stages
                .entry(stage.to_string())
                .or_insert_with(StageRecord::default);
            record.retry_attempts = attempts;
        })
        .await
    }

    async fn persist_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<()> {
        let digest = payload_digest(payload);
        let payload = payload.clone();
        self.mutate(run_id, move |doc| {
            doc.output_digests.insert(stage.to_string(), digest);
            doc.outputs.insert(stage.to_string(), payload);
        })
        .await
    }

    async fn load_stage_output(
        &self,
        run_id: &RunKey,
        stage: &str,
    ) -> StoreResult<Option<serde_json::Value>> {
        let doc = self.fetch_required(run_id).await?;
        Ok(doc.outputs.get(stage).cloned())
    }

    async fn update_quality_context(
        &self,
        run_id: &RunKey,
        context: &QualityContext,
    ) -> StoreResult<()> {
        let context = context.clone();
        self.mutate(run_id, move |doc| {
            doc.quality = context;
        })
        .await
    }

    async fn update_total_cost(&self, run_id: &RunKey, cost: f64) -> StoreResult<()> {
        self.mutate(run_id, move |doc| {
            doc.total_cost = cost;
        })
        .await
    }

    async fn mark_complete(&self, run_id: &RunKey) -> StoreResult<()> {
        self.mutate(run_id, |doc| {
            doc.status = RunStatus::Completed;
            doc.ended_at = Some(now());
        })
        .await
    }

    async fn mark_failed(&self, run_id: &RunKey, error: &ErrorInfo) -> StoreResult<()> {
        let error = error.clone();
        self.mutate(run_id, move |doc| {
            doc.status = RunStatus::Failed;
            doc.ended_at = Some(now());
            doc.error = Some(error);
        })
        .await
    }

    async fn persist_decision(
        &self,
        run_id: &RunKey,
        decision: &DecisionRecord,
    ) -> StoreResult<()> {
        let decision = decision.clone();
        self.mutate(run_id, move |doc| {
            if doc.decision.is_none() {
                doc.decision = Some(decision);
            }
        })
        .await
    }
}
