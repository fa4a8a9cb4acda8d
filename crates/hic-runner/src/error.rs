//! Error taxonomy for the event pipeline.
//!
//! Failures fall into two classes. Everything in [`EventFailure`] is
//! recoverable at event granularity: the orchestrator deletes the event and
//! moves on. [`StoreError::Corruption`] is fatal and aborts the batch.

use std::io;
use std::path::PathBuf;

use crate::records::RecordError;
use crate::stage::Stage;

/// A stage subprocess ran to completion and reported failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{stage} stage {}: {command}", describe_exit(.exit_code))]
pub struct StageFailure {
    pub stage: Stage,
    pub command: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with status {code}"),
        None => "terminated by signal".to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Failed(#[from] StageFailure),

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl StageError {
    pub fn command(&self) -> &str {
        match self {
            Self::Failed(failure) => &failure.command,
            Self::Spawn { command, .. } => command,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed(failure) => failure.exit_code,
            Self::Spawn { .. } => None,
        }
    }
}

/// Failures that cost one event but never the batch.
#[derive(Debug, thiserror::Error)]
pub enum EventFailure {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("precondition violated for event {event}: {reason}")]
    Precondition { event: String, reason: String },

    #[error("{stage} stage broke its output contract: {reason}")]
    MalformedOutput { stage: Stage, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl EventFailure {
    /// Stable machine-readable name, used in logs and batch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stage(_) => "stage_failure",
            Self::Precondition { .. } => "precondition_violation",
            Self::MalformedOutput { .. } => "malformed_output",
            Self::Io(_) => "io",
        }
    }

    pub(crate) fn precondition(event: &str, reason: impl Into<String>) -> Self {
        Self::Precondition {
            event: event.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(stage: Stage, err: RecordError) -> Self {
        Self::MalformedOutput {
            stage,
            reason: err.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The on-disk structure violates a store invariant. Never recovered.
    #[error("store corruption at {}: {reason}", .path.display())]
    Corruption { path: PathBuf, reason: String },

    #[error("invalid group name {0:?}")]
    InvalidName(String),

    #[error("store i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("store json error at {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn corruption(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corruption {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }
}

/// Errors that stop the whole batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("initial-condition stage failed: {0}")]
    InitialConditions(#[from] StageError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Error from a single orchestrator step.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Event(#[from] EventFailure),

    #[error(transparent)]
    Fatal(StoreError),
}

impl From<StageError> for PipelineError {
    fn from(err: StageError) -> Self {
        Self::Event(EventFailure::Stage(err))
    }
}

impl From<io::Error> for PipelineError {
    fn from(err: io::Error) -> Self {
        Self::Event(EventFailure::Io(err))
    }
}

impl From<StoreError> for PipelineError {
    /// Only corruption is fatal; plain store I/O interrupts the event alone.
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Io { source, .. } => Self::Event(EventFailure::Io(source)),
            other => Self::Fatal(other),
        }
    }
}
