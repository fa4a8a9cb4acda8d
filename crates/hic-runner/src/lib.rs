//! Event pipeline for heavy-ion collision simulations.
//!
//! Every event runs initial condition, hydrodynamics, particle sampling and
//! a hadronic afterburner as external stages, and its results land in one
//! shared [`store::ResultStore`].

pub mod config;
pub mod error;
pub mod oversample;
pub mod pipeline;
pub mod records;
pub mod stage;
pub mod store;

pub use config::{ConfigError, StageArgs, StagePrograms, Workspace};
pub use error::{BatchError, EventFailure, PipelineError, StageError, StageFailure, StoreError};
pub use pipeline::{BatchReport, EventReport, EventState, FailureRecord, Orchestrator, Outcome};
pub use stage::{ProcessRunner, Stage, StageRunner};
pub use store::{EventStatus, EventSummary, InitialAttrs, InitialCondition, ResultStore, StoreSummary};
