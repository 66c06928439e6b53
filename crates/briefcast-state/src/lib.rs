//! Briefcast run-state persistence (Layer 0).
//!
//! Document-oriented storage for pipeline runs: one document per run key,
//! merge-patched as stages progress, queried for resume and for the publish
//! quality gate. Backends: [`SurrealRunStore`] for production and
//! [`memory::MemoryRunStore`] as the in-memory fake for tests.

pub mod error;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod store;
pub mod surreal;

pub use error::{StoreError, StoreResult};
pub use model::{
    payload_digest, Criticality, DecisionRecord, ErrorInfo, GateMetrics, IssueSeverity,
    ProviderInfo, ProviderTier, PublishDecision, QualityContext, QualityIssue, RunDocument,
    RunKey, RunStatus, Severity, StageRecord, StageStatus, MAX_RUN_AGE_HOURS,
};
pub use store::{RunStateStore, StagePatch};
pub use surreal::SurrealRunStore;
