//! Stage runner: one external computation stage per call, as a blocking
//! subprocess. Stages talk to each other only through well-known files in
//! their working directories.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};

use tracing::info;

use crate::config::StagePrograms;
use crate::error::{StageError, StageFailure};

/// Grid written for the hydro stage, relative to its working directory.
pub const HYDRO_INPUT: &str = "initial.dat";
/// Hypersurface produced by the hydro stage.
pub const HYDRO_SURFACE: &str = "surface.dat";
/// Hypersurface as read by the sampler.
pub const SAMPLER_SURFACE: &str = "surface.dat";
pub const SAMPLER_OUTPUT: &str = "particles_in.dat";
pub const AFTERBURNER_INPUT: &str = "particles_in.dat";
pub const AFTERBURNER_OUTPUT: &str = "particles_out.dat";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    InitialCondition,
    Hydro,
    Sampler,
    Afterburner,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::InitialCondition,
        Stage::Hydro,
        Stage::Sampler,
        Stage::Afterburner,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::InitialCondition => "ic",
            Stage::Hydro => "hydro",
            Stage::Sampler => "sampler",
            Stage::Afterburner => "afterburner",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one stage to completion. Implementations never retry.
pub trait StageRunner {
    fn run(&mut self, stage: Stage, args: &str, workdir: &Path) -> Result<(), StageError>;
}

/// Spawns the configured executable for each stage.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    programs: StagePrograms,
}

impl ProcessRunner {
    pub fn new(programs: StagePrograms) -> Self {
        Self { programs }
    }
}

impl StageRunner for ProcessRunner {
    fn run(&mut self, stage: Stage, args: &str, workdir: &Path) -> Result<(), StageError> {
        let program = self.programs.program(stage);
        let argv: Vec<&str> = args.split_ascii_whitespace().collect();
        let command = command_line(program, &argv);
        info!(
            stage = stage.as_str(),
            cwd = %workdir.display(),
            command = %command,
            "running stage"
        );

        let status = Command::new(program)
            .args(&argv)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| StageError::Spawn {
                command: command.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(StageFailure {
                stage,
                command,
                exit_code: status.code(),
            }
            .into())
        }
    }
}

fn command_line(program: &str, argv: &[&str]) -> String {
    std::iter::once(program)
        .chain(argv.iter().copied())
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,+".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

/// Moves an artifact from one stage directory to another, replacing any
/// stale file at the destination.
pub fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // scratch dirs on different filesystems
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "hic_stage_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn runner_with(program: &str) -> ProcessRunner {
        ProcessRunner::new(StagePrograms {
            ic: program.to_string(),
            hydro: program.to_string(),
            sampler: program.to_string(),
            afterburner: program.to_string(),
        })
    }

    #[test]
    fn command_line_quotes_only_when_needed() {
        assert_eq!(
            command_line("vishnew", &["initialuse=1", "etas=0.08"]),
            "vishnew initialuse=1 etas=0.08"
        );
        assert_eq!(command_line("echo", &["a b"]), "echo 'a b'");
        assert_eq!(shell_quote("it's"), "'it'\"'\"'s'");
    }

    #[cfg(unix)]
    #[test]
    fn successful_stage_runs_in_its_working_directory() {
        let dir = temp_dir("ok");
        let mut runner = runner_with("touch");
        runner
            .run(Stage::Hydro, "  surface.dat   marker ", &dir)
            .expect("touch succeeds");
        assert!(dir.join("surface.dat").exists());
        assert!(dir.join("marker").exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_is_a_typed_stage_failure() {
        let dir = temp_dir("fail");
        let mut runner = runner_with("false");
        let err = runner
            .run(Stage::Sampler, "oversamples=4", &dir)
            .expect_err("false exits non-zero");
        match err {
            StageError::Failed(failure) => {
                assert_eq!(failure.stage, Stage::Sampler);
                assert_eq!(failure.exit_code, Some(1));
                assert_eq!(failure.command, "false oversamples=4");
            }
            other => panic!("expected stage failure, got {other}"),
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let dir = temp_dir("spawn");
        let mut runner = runner_with("hic-no-such-stage-binary");
        let err = runner
            .run(Stage::Afterburner, "", &dir)
            .expect_err("spawn must fail");
        assert!(matches!(err, StageError::Spawn { .. }));
        assert_eq!(err.command(), "hic-no-such-stage-binary");
        assert_eq!(err.exit_code(), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn relocate_replaces_stale_destination() {
        let dir = temp_dir("relocate");
        let from = dir.join("hydro").join(HYDRO_SURFACE);
        let to = dir.join("sampler").join(SAMPLER_SURFACE);
        fs::create_dir_all(from.parent().expect("parent")).expect("hydro dir");
        fs::create_dir_all(to.parent().expect("parent")).expect("sampler dir");
        fs::write(&from, "fresh").expect("write surface");
        fs::write(&to, "stale").expect("write stale");

        relocate(&from, &to).expect("relocate");
        assert!(!from.exists());
        assert_eq!(fs::read_to_string(&to).expect("read"), "fresh");
        let _ = fs::remove_dir_all(dir);
    }
}
