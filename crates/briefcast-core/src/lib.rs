//! Briefcast engine: pipeline execution and publish gating for the daily
//! content-production workflow.
//!
//! The engine walks a fixed stage order (sourcing → research → writing →
//! synthesis → rendering → publishing), chaining each stage's output into
//! the next stage's input. Stages run through a bounded-backoff retry
//! wrapper; exhausted failures fold through an abort/skip/degrade policy
//! keyed on error severity and static stage criticality. Progress persists
//! to a run state store (see `briefcast-state`) so interrupted runs resume.
//! After a run, the publish quality gate judges the evidence and either
//! auto-publishes, publishes with a warning, or escalates to human review.

pub mod error;
pub mod executor;
pub mod fakes;
pub mod fallback;
pub mod gate;
pub mod policy;
pub mod retry;
pub mod review;
pub mod stage;
pub mod telemetry;
pub mod trigger;

pub use error::{EngineError, Result, StageFailure};
pub use executor::{RunErrorSummary, RunResult, StageExecutor};
pub use fallback::{with_fallback, FallbackOutcome, FallbackProvider, ProviderAttempt};
pub use gate::{GateService, GateThresholds, QualityGate};
pub use policy::{decide, FailureAction, RunAccumulator};
pub use retry::{with_retry, Retried, RetryPolicy};
pub use review::{
    BufferPool, FallbackArtifact, Resolution, ReviewError, ReviewItem, ReviewQueue,
    ReviewResolver, ReviewResult, ReviewStatus,
};
pub use stage::{Stage, StageHandler, StageHandlers, StageInput, StageOutput};
pub use telemetry::{init_tracing, LogFormat};
pub use trigger::{ResumeRequest, RunTrigger, StartRequest, TriggerResponse};
