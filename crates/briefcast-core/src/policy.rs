//! Failure policy and the run-state fold.
//!
//! [`decide`] is the pure abort/skip/degrade decision table; the
//! [`RunAccumulator`] is the immutable fold the executor threads through the
//! stage loop, so each stage transition is unit-testable without running the
//! whole pipeline.

use briefcast_state::{Criticality, QualityContext, Severity};

use crate::error::StageFailure;
use crate::stage::{Stage, StageOutput};

/// What the executor does with a stage whose retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Stop processing remaining stages; the run fails.
    Abort,
    /// Record the stage as skipped and continue unchanged.
    Skip,
    /// Record as skipped, flag the stage as degraded, and continue.
    Degrade,
}

/// The abort/skip/degrade decision table.
///
/// `effective` is the failure's effective severity (original severity when
/// retries escalated, otherwise its own); `tier` is the stage's static
/// criticality, which decides when the severity is ambiguous:
///
/// - effective Critical, or unclassified on a Critical stage -> Abort
/// - effective Recoverable, or unclassified on a Recoverable stage -> Skip
/// - effective Degraded, or unclassified on a Degraded stage -> Degrade
pub fn decide(effective: Option<Severity>, tier: Criticality) -> FailureAction {
    match effective {
        Some(Severity::Critical) => FailureAction::Abort,
        Some(Severity::Recoverable) => FailureAction::Skip,
        Some(Severity::Degraded) => FailureAction::Degrade,
        None => match tier {
            Criticality::Critical => FailureAction::Abort,
            Criticality::Recoverable => FailureAction::Skip,
            Criticality::Degraded => FailureAction::Degrade,
        },
    }
}

/// The error that aborted a run, with the stage that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct AbortCause {
    pub stage: Stage,
    pub failure: StageFailure,
}

/// Immutable fold state threaded through the stage loop.
///
/// Every transition consumes the accumulator and returns the next one;
/// nothing mutates in place across loop iterations.
#[derive(Debug, Clone)]
pub struct RunAccumulator {
    pub completed: Vec<Stage>,
    pub skipped: Vec<Stage>,
    pub quality: QualityContext,
    pub total_cost: f64,
    /// Output payload chained into the next stage.
    pub chain: serde_json::Value,
    /// Name of the stage whose output `chain` holds.
    pub chain_stage: Option<Stage>,
    pub abort: Option<AbortCause>,
}

impl RunAccumulator {
    /// Fresh accumulator with an empty chaining payload.
    pub fn new() -> Self {
        Self {
            completed: Vec::new(),
            skipped: Vec::new(),
            quality: QualityContext::default(),
            total_cost: 0.0,
            chain: serde_json::json!({}),
            chain_stage: None,
            abort: None,
        }
    }

    /// Accumulator seeded for resume: prior completions, persisted quality
    /// context, the cost already accrued by the interrupted attempt, and the
    /// reloaded chaining payload.
    pub fn seeded(
        completed: Vec<Stage>,
        quality: QualityContext,
        total_cost: f64,
        chain: serde_json::Value,
        chain_stage: Option<Stage>,
    ) -> Self {
        Self {
            completed,
            skipped: Vec::new(),
            quality,
            total_cost,
            chain,
            chain_stage,
            abort: None,
        }
    }

    /// Fold a successful stage: cost accrues, fallback/warning evidence
    /// merges into the quality context, and the chain cursor advances.
    pub fn complete(mut self, stage: Stage, output: &StageOutput) -> Self {
        self.completed.push(stage);
        self.total_cost += output.cost;
        if output.provider.tier == briefcast_state::ProviderTier::Fallback {
            self.quality
                .record_fallback(stage.name(), &output.provider.name);
        }
        self.quality.add_flags(output.warnings.iter().cloned());
        self.chain = output.data.clone();
        self.chain_stage = Some(stage);
        self
    }

    /// Fold a skipped stage: the chain cursor does not advance.
    pub fn skip(mut self, stage: Stage) -> Self {
        self.skipped.push(stage);
        self
    }

    /// Fold a degraded stage: skipped plus a degraded-quality mark.
    pub fn degrade(mut self, stage: Stage) -> Self {
        self.quality.mark_degraded(stage.name());
        self.skipped.push(stage);
        self
    }

    /// Fold an aborting failure. Terminal for the loop.
    pub fn abort(mut self, stage: Stage, failure: StageFailure) -> Self {
        self.abort = Some(AbortCause { stage, failure });
        self
    }

    /// Whether the loop should stop.
    pub fn aborted(&self) -> bool {
        self.abort.is_some()
    }
}

impl Default for RunAccumulator {
    fn default() -> Self {
        Self::new()
    }
}
