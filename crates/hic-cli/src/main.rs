use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hic_runner::{
    BatchReport, EventReport, EventStatus, EventSummary, Orchestrator, Outcome, ProcessRunner,
    ResultStore, StageArgs, StagePrograms, StoreSummary, Workspace,
};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hic", version, about = "Heavy-ion collision event pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every pending event of a store.
    Run {
        #[arg(long)]
        store: PathBuf,
        /// Root of the per-stage scratch directories.
        #[arg(long, default_value = "work")]
        workdir: PathBuf,
        /// Flat `key = value` file with `ic_stage_args` / `hydro_stage_args`.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Generate this many initial conditions before processing.
        #[arg(long)]
        nevents: Option<usize>,
        #[arg(long)]
        ic_program: Option<String>,
        #[arg(long)]
        hydro_program: Option<String>,
        #[arg(long)]
        sampler_program: Option<String>,
        #[arg(long)]
        afterburner_program: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Check the structural invariants of a store.
    Verify {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List events with their outcome and oversample counts. The outcome is
    /// read from each event's bookkeeping marker, not from a dataset group.
    Inspect {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

struct CommandOutput {
    payload: Option<Value>,
    ok: bool,
}

impl CommandOutput {
    fn done(payload: Option<Value>) -> Self {
        Self { payload, ok: true }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(output) => {
            if let Some(payload) = &output.payload {
                emit_json(payload);
            }
            if !output.ok {
                std::process::exit(1);
            }
            Ok(())
        }
        Err(err) => {
            if json_mode {
                emit_json(&json!({
                    "ok": false,
                    "error": { "code": "command_failed", "message": format!("{:#}", err) }
                }));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<CommandOutput> {
    match command {
        Commands::Run {
            store,
            workdir,
            config,
            nevents,
            ic_program,
            hydro_program,
            sampler_program,
            afterburner_program,
            json,
        } => {
            let args = match &config {
                Some(path) => StageArgs::from_file(path)?,
                None => StageArgs::default(),
            };
            let mut programs = StagePrograms::default();
            override_program(&mut programs.ic, ic_program);
            override_program(&mut programs.hydro, hydro_program);
            override_program(&mut programs.sampler, sampler_program);
            override_program(&mut programs.afterburner, afterburner_program);

            let result_store = ResultStore::create(&store)
                .with_context(|| format!("opening store {}", store.display()))?;
            let mut orchestrator = Orchestrator::new(
                result_store,
                ProcessRunner::new(programs),
                Workspace::new(workdir),
                args,
            );
            if let Some(n) = nevents {
                orchestrator.run_initial_conditions(n)?;
            }
            let report = orchestrator.run_batch()?;

            let payload = if json {
                Some(json!({
                    "ok": !report.is_failure(),
                    "command": "run",
                    "store": store.display().to_string(),
                    "report": report_to_json(&report),
                }))
            } else {
                print_report(&report);
                None
            };
            Ok(CommandOutput {
                payload,
                ok: !report.is_failure(),
            })
        }
        Commands::Verify { store, json } => {
            let summary = open_store(&store)?.verify()?;
            if json {
                return Ok(CommandOutput::done(Some(json!({
                    "ok": true,
                    "command": "verify",
                    "summary": summary_to_json(&summary),
                }))));
            }
            println!("ok");
            print_summary(&summary);
            Ok(CommandOutput::done(None))
        }
        Commands::Inspect { store, json } => {
            let result_store = open_store(&store)?;
            let mut events = Vec::new();
            for name in result_store.events()? {
                events.push(result_store.describe_event(&name)?);
            }
            if json {
                return Ok(CommandOutput::done(Some(json!({
                    "ok": true,
                    "command": "inspect",
                    "events": events,
                }))));
            }
            for event in &events {
                println!("{}", describe_line(event));
            }
            Ok(CommandOutput::done(None))
        }
    }
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } => *json,
        Commands::Verify { json, .. } => *json,
        Commands::Inspect { json, .. } => *json,
    }
}

fn override_program(slot: &mut String, value: Option<String>) {
    if let Some(program) = value {
        *slot = program;
    }
}

fn open_store(path: &Path) -> Result<ResultStore> {
    ResultStore::open(path).with_context(|| format!("opening store {}", path.display()))
}

fn emit_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn report_to_json(report: &BatchReport) -> Value {
    json!({
        "total": report.total(),
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "events": report.events.iter().map(event_report_to_json).collect::<Vec<_>>(),
    })
}

fn event_report_to_json(entry: &EventReport) -> Value {
    match &entry.result {
        Ok(outcome) => json!({
            "event": entry.event,
            "ok": true,
            "result": outcome,
        }),
        Err(failure) => json!({
            "event": entry.event,
            "ok": false,
            "failure": failure,
        }),
    }
}

fn summary_to_json(summary: &StoreSummary) -> Value {
    json!({
        "events": summary.events,
        "pending": summary.pending,
        "committed": summary.committed,
        "oversamples": summary.oversamples,
        "particles": summary.particles,
    })
}

fn print_report(report: &BatchReport) {
    for entry in &report.events {
        match &entry.result {
            Ok(Outcome::NoSurface) => println!("{}: ok (no hypersurface)", entry.event),
            Ok(Outcome::NoParticles) => println!("{}: ok (no particles)", entry.event),
            Ok(Outcome::Committed {
                oversamples,
                particles,
            }) => println!(
                "{}: ok ({} oversamples, {} particles)",
                entry.event, oversamples, particles
            ),
            Err(failure) => {
                let exit = failure
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}: failed [{}] command: {} exit: {} ({})",
                    entry.event,
                    failure.kind,
                    failure.command.as_deref().unwrap_or("-"),
                    exit,
                    failure.message
                );
            }
        }
    }
    println!(
        "{}/{} events succeeded",
        report.succeeded(),
        report.total()
    );
}

fn print_summary(summary: &StoreSummary) {
    println!("events: {}", summary.events);
    println!("pending: {}", summary.pending);
    println!("committed: {}", summary.committed);
    println!("oversamples: {}", summary.oversamples);
    println!("particles: {}", summary.particles);
}

fn describe_line(event: &EventSummary) -> String {
    let status = match event.status {
        None => "pending",
        Some(EventStatus::NoSurface) => "no_surface",
        Some(EventStatus::NoParticles) => "no_particles",
        Some(EventStatus::Committed) => "committed",
    };
    match event.oversamples {
        Some(n) => format!(
            "{}: {} ({} oversamples, {} particles)",
            event.name, status, n, event.particles
        ),
        None => format!("{}: {}", event.name, status),
    }
}
