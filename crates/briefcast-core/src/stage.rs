//! Stage identifiers, policy tables, and the stage-handler interface.
//!
//! Stages form a closed set so criticality and retry policy are exhaustive
//! compile-time tables instead of runtime name lookups. [`Stage::ordered`]
//! is the fixed pipeline order; [`Stage::Notification`] is excluded from it
//! and always runs exactly once at the end of a run, aborted or not.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use briefcast_state::{Criticality, QualityContext};

use crate::error::StageFailure;
use crate::retry::RetryPolicy;

/// The stages of the daily content-production pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetch candidate source material for the day.
    Sourcing,
    /// Produce the research brief from the sourced material.
    Research,
    /// Write the episode script from the brief.
    Writing,
    /// Synthesize speech audio from the script.
    Synthesis,
    /// Render and composite the final video.
    Rendering,
    /// Upload to the publishing platform.
    Publishing,
    /// Send run-outcome notifications. Terminal hook, not part of the loop.
    Notification,
}

impl Stage {
    /// The pipeline stages in execution order. Notification is excluded:
    /// it is the always-run terminal hook.
    pub fn ordered() -> [Stage; 6] {
        [
            Stage::Sourcing,
            Stage::Research,
            Stage::Writing,
            Stage::Synthesis,
            Stage::Rendering,
            Stage::Publishing,
        ]
    }

    /// Stage name as persisted in stage records.
    pub fn name(self) -> &'static str {
        match self {
            Stage::Sourcing => "sourcing",
            Stage::Research => "research",
            Stage::Writing => "writing",
            Stage::Synthesis => "synthesis",
            Stage::Rendering => "rendering",
            Stage::Publishing => "publishing",
            Stage::Notification => "notification",
        }
    }

    /// Parse a stage name, e.g. from a resume request.
    pub fn from_name(name: &str) -> Option<Stage> {
        match name {
            "sourcing" => Some(Stage::Sourcing),
            "research" => Some(Stage::Research),
            "writing" => Some(Stage::Writing),
            "synthesis" => Some(Stage::Synthesis),
            "rendering" => Some(Stage::Rendering),
            "publishing" => Some(Stage::Publishing),
            "notification" => Some(Stage::Notification),
            _ => None,
        }
    }

    /// Static failure-policy tier, consulted when an error's own severity
    /// is ambiguous. Deployment-time policy; never changes at runtime.
    pub fn criticality(self) -> Criticality {
        match self {
            Stage::Sourcing => Criticality::Critical,
            Stage::Research => Criticality::Degraded,
            Stage::Writing => Criticality::Critical,
            Stage::Synthesis => Criticality::Degraded,
            Stage::Rendering => Criticality::Critical,
            Stage::Publishing => Criticality::Critical,
            Stage::Notification => Criticality::Recoverable,
        }
    }

    /// Per-stage retry policy.
    pub fn retry_policy(self) -> RetryPolicy {
        match self {
            // External fetches are flaky but cheap to retry.
            Stage::Sourcing => RetryPolicy::new(3, Duration::from_secs(2)),
            Stage::Research => RetryPolicy::new(2, Duration::from_secs(5)),
            Stage::Writing => RetryPolicy::new(2, Duration::from_secs(5)),
            Stage::Synthesis => RetryPolicy::new(2, Duration::from_secs(10)),
            // Renders are expensive; one retry only.
            Stage::Rendering => RetryPolicy::new(1, Duration::from_secs(30)),
            Stage::Publishing => RetryPolicy::new(3, Duration::from_secs(10)),
            Stage::Notification => RetryPolicy::new(0, Duration::from_secs(1)),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ---------------------------------------------------------------------------
// Stage I/O
// ---------------------------------------------------------------------------

/// Input handed to a stage handler: the previous stage's output plus run
/// context.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Run key (calendar date string).
    pub run_id: String,
    /// Name of the stage whose output is being chained, if any.
    pub previous_stage: Option<String>,
    /// Previous stage's output payload (empty object for the first stage).
    pub data: serde_json::Value,
    /// Resolved retry policy for this invocation.
    pub retry: RetryPolicy,
    /// Quality context accumulated so far in the run.
    pub quality: QualityContext,
}

/// Output produced by a successful stage invocation.
#[derive(Debug, Clone)]
pub struct StageOutput {
    /// Payload chained into the next stage and persisted for resume.
    pub data: serde_json::Value,
    /// Which provider served the stage, at which tier.
    pub provider: briefcast_state::ProviderInfo,
    /// Cost incurred by the stage.
    pub cost: f64,
    /// Wall time reported by the stage.
    pub duration_ms: u64,
    /// Quality warnings to merge into the run's quality context.
    pub warnings: Vec<String>,
}

/// The collaborator interface implemented by each stage's business logic.
///
/// Handlers own their provider fan-out (typically via
/// [`with_fallback`](crate::fallback::with_fallback)) and their own internal
/// timeouts; the engine sequences, retries, persists, and judges.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(&self, input: StageInput) -> std::result::Result<StageOutput, StageFailure>;
}

/// One handler per stage, resolved exhaustively — no name lookup can miss.
#[derive(Clone)]
pub struct StageHandlers {
    pub sourcing: Arc<dyn StageHandler>,
    pub research: Arc<dyn StageHandler>,
    pub writing: Arc<dyn StageHandler>,
    pub synthesis: Arc<dyn StageHandler>,
    pub rendering: Arc<dyn StageHandler>,
    pub publishing: Arc<dyn StageHandler>,
    pub notification: Arc<dyn StageHandler>,
}

impl StageHandlers {
    /// Resolve the handler for a stage.
    pub fn handler(&self, stage: Stage) -> &Arc<dyn StageHandler> {
        match stage {
            Stage::Sourcing => &self.sourcing,
            Stage::Research => &self.research,
            Stage::Writing => &self.writing,
            Stage::Synthesis => &self.synthesis,
            Stage::Rendering => &self.rendering,
            Stage::Publishing => &self.publishing,
            Stage::Notification => &self.notification,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_excludes_notification() {
        let order = Stage::ordered();
        assert_eq!(order.len(), 6);
        assert!(!order.contains(&Stage::Notification));
        assert_eq!(order[0], Stage::Sourcing);
        assert_eq!(order[5], Stage::Publishing);
    }

    #[test]
    fn names_roundtrip() {
        for stage in Stage::ordered() {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
        assert_eq!(
            Stage::from_name("notification"),
            Some(Stage::Notification)
        );
        assert_eq!(Stage::from_name("mastering"), None);
    }

    #[test]
    fn criticality_table() {
        assert_eq!(Stage::Sourcing.criticality(), Criticality::Critical);
        assert_eq!(Stage::Research.criticality(), Criticality::Degraded);
        assert_eq!(Stage::Synthesis.criticality(), Criticality::Degraded);
        assert_eq!(Stage::Notification.criticality(), Criticality::Recoverable);
    }

    #[test]
    fn rendering_retries_once() {
        assert_eq!(Stage::Rendering.retry_policy().max_retries, 1);
    }
}
