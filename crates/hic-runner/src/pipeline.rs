//! Per-event orchestration.
//!
//! Each event walks an explicit state machine:
//!
//! ```text
//! Start -> IcReady -> HydroDone -> EndedNoSurface
//!                               \-> Sampled -> EndedNoParticles
//!                                           \-> Afterburned -> Parsed -> Committed
//! ```
//!
//! Any stage failure or precondition violation leaves the machine; the event
//! is then deleted from the store and the batch carries on with the next one.
//! Only store corruption stops the batch.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{StageArgs, Workspace};
use crate::error::{BatchError, EventFailure, PipelineError, StoreError};
use crate::oversample;
use crate::records::{self, ParticleColumns, SAMPLER_HEADER_LINES};
use crate::stage::{
    self, Stage, StageRunner, AFTERBURNER_INPUT, AFTERBURNER_OUTPUT, HYDRO_INPUT, HYDRO_SURFACE,
    SAMPLER_OUTPUT, SAMPLER_SURFACE,
};
use crate::store::{EventStatus, InitialCondition, ResultStore};

#[derive(Debug, Clone, PartialEq)]
pub enum EventState {
    Start,
    /// Hydro input written.
    IcReady { mult: f64 },
    HydroDone { mult: f64 },
    Sampled { oversamples: usize },
    Afterburned { oversamples: usize },
    Parsed { groups: Vec<ParticleColumns> },
    EndedNoSurface,
    EndedNoParticles,
    Committed { oversamples: usize, particles: usize },
}

impl EventState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::IcReady { .. } => "ic_ready",
            Self::HydroDone { .. } => "hydro_done",
            Self::Sampled { .. } => "sampled",
            Self::Afterburned { .. } => "afterburned",
            Self::Parsed { .. } => "parsed",
            Self::EndedNoSurface => "ended_no_surface",
            Self::EndedNoParticles => "ended_no_particles",
            Self::Committed { .. } => "committed",
        }
    }

    /// `Some` once the machine has reached a terminal success state.
    pub fn outcome(&self) -> Option<Outcome> {
        match *self {
            Self::EndedNoSurface => Some(Outcome::NoSurface),
            Self::EndedNoParticles => Some(Outcome::NoParticles),
            Self::Committed {
                oversamples,
                particles,
            } => Some(Outcome::Committed {
                oversamples,
                particles,
            }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Hydro produced an empty hypersurface; only `initial` is stored.
    NoSurface,
    /// The sampler emitted nothing past its header; only `initial` is stored.
    NoParticles,
    Committed { oversamples: usize, particles: usize },
}

/// Serializable digest of an [`EventFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub kind: &'static str,
    pub message: String,
    pub command: Option<String>,
    pub exit_code: Option<i32>,
}

impl From<&EventFailure> for FailureRecord {
    fn from(failure: &EventFailure) -> Self {
        let (command, exit_code) = match failure {
            EventFailure::Stage(err) => (Some(err.command().to_string()), err.exit_code()),
            _ => (None, None),
        };
        Self {
            kind: failure.kind(),
            message: failure.to_string(),
            command,
            exit_code,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventReport {
    pub event: String,
    pub result: Result<Outcome, FailureRecord>,
}

/// One entry per processed event, in store iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub events: Vec<EventReport>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.events.len()
    }

    pub fn succeeded(&self) -> usize {
        self.events.iter().filter(|e| e.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// The batch fails as a whole only when no event succeeded.
    pub fn is_failure(&self) -> bool {
        self.succeeded() == 0
    }
}

pub struct Orchestrator<R> {
    store: ResultStore,
    runner: R,
    workspace: Workspace,
    args: StageArgs,
}

impl<R: StageRunner> Orchestrator<R> {
    pub fn new(store: ResultStore, runner: R, workspace: Workspace, args: StageArgs) -> Self {
        Self {
            store,
            runner,
            workspace,
            args,
        }
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Runs the initial-condition stage for `nevents` events and adopts its
    /// raw output into per-event subtrees.
    pub fn run_initial_conditions(&mut self, nevents: usize) -> Result<Vec<String>, BatchError> {
        self.workspace.prepare()?;
        let args = join_args(&[
            &nevents.to_string(),
            "--output",
            &self.store.root().display().to_string(),
            &self.args.ic_stage_args,
        ]);
        let workdir = self.workspace.stage_dir(Stage::InitialCondition);
        self.runner.run(Stage::InitialCondition, &args, &workdir)?;
        let adopted = self.store.adopt_raw_initials()?;
        info!(events = adopted.len(), "adopted initial conditions");
        Ok(adopted)
    }

    /// Processes every pending event once. Per-event failures are recorded
    /// in the report; only store corruption and scratch setup errors stop it.
    pub fn run_batch(&mut self) -> Result<BatchReport, BatchError> {
        self.workspace.prepare()?;
        let mut report = BatchReport::default();
        for event in self.store.pending_events()? {
            let result = self.process_event(&event)?;
            report.events.push(EventReport {
                event,
                result: result.map_err(|failure| FailureRecord::from(&failure)),
            });
        }
        info!(
            succeeded = report.succeeded(),
            total = report.total(),
            "batch finished"
        );
        Ok(report)
    }

    /// Runs one event to a terminal state. A failed event is removed from
    /// the store before returning.
    pub fn process_event(&mut self, event: &str) -> Result<Result<Outcome, EventFailure>, StoreError> {
        match self.run_event(event) {
            Ok(outcome) => {
                info!(event, outcome = ?outcome, "event finished");
                Ok(Ok(outcome))
            }
            Err(PipelineError::Event(failure)) => {
                let (command, exit_code) = match &failure {
                    EventFailure::Stage(err) => (Some(err.command()), err.exit_code()),
                    _ => (None, None),
                };
                warn!(
                    event,
                    kind = failure.kind(),
                    command = command.unwrap_or("-"),
                    exit_code = ?exit_code,
                    error = %failure,
                    "event failed"
                );
                self.store.delete_event(event)?;
                Ok(Err(failure))
            }
            Err(PipelineError::Fatal(err)) => Err(err),
        }
    }

    pub fn run_event(&mut self, event: &str) -> Result<Outcome, PipelineError> {
        let mut state = EventState::Start;
        loop {
            if let Some(outcome) = state.outcome() {
                return Ok(outcome);
            }
            debug!(event, state = state.name(), "advancing event");
            state = self.step(event, state)?;
        }
    }

    /// Performs exactly one transition. Terminal states are returned as-is.
    pub fn step(&mut self, event: &str, state: EventState) -> Result<EventState, PipelineError> {
        match state {
            EventState::Start => {
                if self.store.has_particles(event)? {
                    return Err(EventFailure::precondition(
                        event,
                        "pending event already holds particles from an interrupted commit",
                    )
                    .into());
                }
                let initial = self.load_initial(event)?;
                write_hydro_input(
                    &self.workspace.stage_dir(Stage::Hydro).join(HYDRO_INPUT),
                    &initial,
                )?;
                Ok(EventState::IcReady {
                    mult: initial.attrs.mult,
                })
            }
            EventState::IcReady { mult } => {
                let workdir = self.workspace.stage_dir(Stage::Hydro);
                let args = self.args.hydro_stage_args.clone();
                self.run_stage(Stage::Hydro, &args, &workdir, HYDRO_SURFACE)?;
                Ok(EventState::HydroDone { mult })
            }
            EventState::HydroDone { mult } => {
                let surface = self.workspace.stage_dir(Stage::Hydro).join(HYDRO_SURFACE);
                if artifact_len(Stage::Hydro, &surface)? == 0 {
                    self.store.mark_outcome(event, EventStatus::NoSurface)?;
                    return Ok(EventState::EndedNoSurface);
                }
                let oversamples = oversample::estimate(event, mult)?;
                let sampler_dir = self.workspace.stage_dir(Stage::Sampler);
                stage::relocate(&surface, &sampler_dir.join(SAMPLER_SURFACE))?;
                self.run_stage(
                    Stage::Sampler,
                    &format!("oversamples={oversamples}"),
                    &sampler_dir,
                    SAMPLER_OUTPUT,
                )?;
                Ok(EventState::Sampled { oversamples })
            }
            EventState::Sampled { oversamples } => {
                let sampled = self.workspace.stage_dir(Stage::Sampler).join(SAMPLER_OUTPUT);
                artifact_len(Stage::Sampler, &sampled)?;
                let reader = BufReader::new(File::open(&sampled)?);
                let has_records = records::has_records_after_header(reader, SAMPLER_HEADER_LINES)
                    .map_err(|e| EventFailure::malformed(Stage::Sampler, e))?;
                if !has_records {
                    self.store.mark_outcome(event, EventStatus::NoParticles)?;
                    return Ok(EventState::EndedNoParticles);
                }
                let afterburner_dir = self.workspace.stage_dir(Stage::Afterburner);
                stage::relocate(&sampled, &afterburner_dir.join(AFTERBURNER_INPUT))?;
                self.run_stage(Stage::Afterburner, "", &afterburner_dir, AFTERBURNER_OUTPUT)?;
                Ok(EventState::Afterburned { oversamples })
            }
            EventState::Afterburned { oversamples } => {
                let output = self
                    .workspace
                    .stage_dir(Stage::Afterburner)
                    .join(AFTERBURNER_OUTPUT);
                artifact_len(Stage::Afterburner, &output)?;
                let groups = records::parse_blocks(BufReader::new(File::open(&output)?))
                    .and_then(|blocks| records::reconcile(blocks, oversamples))
                    .map_err(|e| EventFailure::malformed(Stage::Afterburner, e))?;
                Ok(EventState::Parsed { groups })
            }
            EventState::Parsed { groups } => {
                self.store.write_particles(event, &groups)?;
                self.store.mark_outcome(event, EventStatus::Committed)?;
                Ok(EventState::Committed {
                    oversamples: groups.len(),
                    particles: groups.iter().map(ParticleColumns::len).sum(),
                })
            }
            terminal => Ok(terminal),
        }
    }

    /// Runs a stage after removing whatever `output` a previous event left in
    /// the shared working directory, so a stage that exits 0 without writing
    /// is caught as a missing artifact.
    fn run_stage(
        &mut self,
        stage: Stage,
        args: &str,
        workdir: &Path,
        output: &str,
    ) -> Result<(), PipelineError> {
        clear_artifact(&workdir.join(output))?;
        self.runner.run(stage, args, workdir)?;
        Ok(())
    }

    /// Reads the event's initial condition. Anything short of corruption is
    /// an upstream precondition violation.
    fn load_initial(&self, event: &str) -> Result<InitialCondition, PipelineError> {
        let initial = match self.store.read_initial(event) {
            Ok(initial) => initial,
            Err(err) if err.is_corruption() => return Err(PipelineError::Fatal(err)),
            Err(err) => return Err(EventFailure::precondition(event, err.to_string()).into()),
        };
        let width = initial.grid.first().map_or(0, Vec::len);
        if width == 0 || initial.grid.iter().any(|row| row.len() != width) {
            return Err(EventFailure::precondition(
                event,
                "initial grid must be a non-empty rectangular array",
            )
            .into());
        }
        Ok(initial)
    }
}

fn join_args(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn clear_artifact(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Size of a stage artifact the stage was obliged to write.
fn artifact_len(stage: Stage, path: &Path) -> Result<u64, EventFailure> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EventFailure::MalformedOutput {
            stage,
            reason: format!("missing artifact {}", path.display()),
        }),
        Err(e) => Err(e.into()),
    }
}

/// One grid row per line, whitespace separated.
fn write_hydro_input(path: &Path, initial: &InitialCondition) -> std::io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for row in &initial.grid {
        let line = row
            .iter()
            .map(f64::to_string)
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{line}")?;
    }
    out.flush()
}
