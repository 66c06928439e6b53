//! Thin trigger layer over the stage executor.
//!
//! The engine exposes no network protocol of its own; an HTTP handler or CLI
//! command builds a request and hands it here. `wait: true` blocks for the
//! full [`RunResult`]; `wait: false` detaches the run onto the runtime and
//! acknowledges immediately. Input validation (unknown stage names) happens
//! before detaching so the caller still sees those errors.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use briefcast_state::RunKey;

use crate::error::{EngineError, Result};
use crate::executor::{RunResult, StageExecutor};
use crate::stage::Stage;

/// Request to start a fresh run.
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub run_id: String,
    #[serde(default)]
    pub wait: bool,
}

/// Request to resume an existing run.
#[derive(Debug, Clone, Deserialize)]
pub struct ResumeRequest {
    pub run_id: String,
    pub from_stage: Option<String>,
    #[serde(default)]
    pub wait: bool,
}

/// What the trigger layer hands back to its caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum TriggerResponse {
    /// The caller waited; here is the full outcome.
    Finished(RunResult),
    /// The run was detached; poll the run store for progress.
    Accepted { run_id: String },
}

/// Entry points for starting and resuming runs.
pub struct RunTrigger {
    executor: Arc<StageExecutor>,
}

impl RunTrigger {
    pub fn new(executor: Arc<StageExecutor>) -> Self {
        Self { executor }
    }

    /// Start a run, blocking for the result when `wait` is set.
    pub async fn start(&self, request: StartRequest) -> Result<TriggerResponse> {
        let run_id = RunKey::from(request.run_id.as_str());
        if request.wait {
            return Ok(TriggerResponse::Finished(
                self.executor.execute(&run_id).await?,
            ));
        }

        let executor = Arc::clone(&self.executor);
        info!(run_id = %run_id, "run detached");
        tokio::spawn(async move {
            if let Err(err) = executor.execute(&run_id).await {
                error!(run_id = %run_id, error = %err, "detached run failed to start");
            }
        });
        Ok(TriggerResponse::Accepted {
            run_id: request.run_id,
        })
    }

    /// Resume a run, optionally from an explicit stage name.
    pub async fn resume(&self, request: ResumeRequest) -> Result<TriggerResponse> {
        let run_id = RunKey::from(request.run_id.as_str());
        let from = match &request.from_stage {
            Some(name) => Some(
                Stage::from_name(name)
                    .ok_or_else(|| EngineError::UnknownStage(name.clone()))?,
            ),
            None => None,
        };

        if request.wait {
            return Ok(TriggerResponse::Finished(
                self.executor.resume(&run_id, from).await?,
            ));
        }

        let executor = Arc::clone(&self.executor);
        info!(run_id = %run_id, "resume detached");
        tokio::spawn(async move {
            if let Err(err) = executor.resume(&run_id, from).await {
                error!(run_id = %run_id, error = %err, "detached resume failed to start");
            }
        });
        Ok(TriggerResponse::Accepted {
            run_id: request.run_id,
        })
    }
}
