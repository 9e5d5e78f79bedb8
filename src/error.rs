use crate::database::{FailureKind, TaskStatus};
use thiserror::Error;

/// Typed error hierarchy for every pipeline stage.
///
/// The variant decides what a worker does with the task it holds:
/// upstream, malformed and invariant errors fail the task with a legible
/// reason, storage errors abort the invocation and leave the task alone.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("upstream service error: {0}")]
    Upstream(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {task_id} is no longer held: claimed as {held}, now {found}")]
    ClaimLost {
        task_id: String,
        held: TaskStatus,
        found: TaskStatus,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// The failure kind persisted on the task, or `None` when the error
    /// cannot be durably recorded and the invocation must abort.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Upstream(_) => Some(FailureKind::Upstream),
            Self::MalformedResponse(_) => Some(FailureKind::Malformed),
            Self::NotFound(_) | Self::InvariantViolation(_) | Self::InvalidInput(_) => {
                Some(FailureKind::Invariant)
            }
            Self::Storage(_)
            | Self::InvalidTransition { .. }
            | Self::ClaimLost { .. }
            | Self::Config(_) => None,
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

/// Serialize as a plain string so command output stays a flat JSON message.
impl serde::Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

// ── From impls ─────────────────────────────────────────────────────────────

/// The database layer speaks `anyhow`; typed errors raised inside it are
/// recovered here, everything else is a storage failure.
impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<PipelineError>() {
            Ok(typed) => typed,
            Err(other) => PipelineError::Storage(format!("{:#}", other)),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(e: rusqlite::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        PipelineError::Upstream(e.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::MalformedResponse(e.to_string())
    }
}
