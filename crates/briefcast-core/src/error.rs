//! Engine-level error taxonomy for Briefcast.
//!
//! Two layers: [`EngineError`] for failures that propagate to the trigger
//! layer (lock conflicts, initialization failure), and [`StageFailure`] for
//! per-stage errors that the executor catches locally and converts into an
//! abort/skip/degrade decision.

use briefcast_state::{ErrorInfo, Severity, StoreError};

/// Errors that reach the caller of `execute`/`resume`.
///
/// Everything else — including every stage failure — is absorbed by the
/// executor's failure policy and surfaces only as the `error` field of the
/// run result.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A non-stale run with the same key is already active.
    #[error("run {0} is already running")]
    AlreadyRunning(String),

    /// Run-document creation failed after bounded retries.
    #[error("failed to initialize run {run_id}: {source}")]
    InitFailed {
        run_id: String,
        #[source]
        source: StoreError,
    },

    /// Resume was asked for a run that was never started.
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// A stage name from the trigger layer does not map to a known stage.
    #[error("unknown stage: {0}")]
    UnknownStage(String),

    /// Store read failure during the pre-flight lock check.
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// A failure raised by a stage handler or one of the execution primitives.
///
/// Carries the severity taxonomy of the failure policy. `original_severity`
/// is stamped by the retry wrapper on exhaustion when the error carried a
/// sub-critical severity, so the policy table still sees what the failure
/// originally was instead of treating every exhausted retry as critical.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    /// Stable error code (e.g. `"VOICE_SYNTH_FAILED"`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Severity claimed by the failing operation, if any.
    pub severity: Option<Severity>,
    /// Total invocation attempts, filled in by the retry wrapper.
    pub attempts: u32,
    /// Pre-exhaustion severity preserved across retry escalation.
    pub original_severity: Option<Severity>,
}

impl StageFailure {
    /// A failure with an explicit severity.
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: Some(severity),
            attempts: 1,
            original_severity: None,
        }
    }

    /// A failure whose severity is unknown; the stage's static criticality
    /// will decide how it is handled.
    pub fn unclassified(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            severity: None,
            attempts: 1,
            original_severity: None,
        }
    }

    /// Effective severity for the failure policy: the preserved original
    /// severity when retries escalated, otherwise the error's own severity.
    pub fn effective_severity(&self) -> Option<Severity> {
        self.original_severity.or(self.severity)
    }

    /// Persisted form of this failure.
    pub fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code.clone(),
            message: self.message.clone(),
            severity: self.effective_severity(),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StageFailure {}
