//! Run configuration: extra stage arguments, stage executables and the
//! scratch workspace layout.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::stage::Stage;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("config line {line}: expected `key = value`, got {text:?}")]
    Syntax { line: usize, text: String },
}

/// Extra arguments appended verbatim to the IC and hydro invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageArgs {
    pub ic_stage_args: String,
    pub hydro_stage_args: String,
}

impl StageArgs {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses flat `key = value` lines. Unknown keys are ignored.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut args = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Syntax {
                line: idx + 1,
                text: raw.to_string(),
            })?;
            let (key, value) = (key.trim(), value.trim());
            match key {
                "ic_stage_args" => args.ic_stage_args = value.to_string(),
                "hydro_stage_args" => args.hydro_stage_args = value.to_string(),
                other => debug!(key = other, "ignoring unrecognized config key"),
            }
        }
        Ok(args)
    }
}

/// Executable invoked for each stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePrograms {
    pub ic: String,
    pub hydro: String,
    pub sampler: String,
    pub afterburner: String,
}

impl Default for StagePrograms {
    fn default() -> Self {
        Self {
            ic: "trento".to_string(),
            hydro: "vishnew".to_string(),
            sampler: "frzout".to_string(),
            afterburner: "urqmd".to_string(),
        }
    }
}

impl StagePrograms {
    pub fn program(&self, stage: Stage) -> &str {
        match stage {
            Stage::InitialCondition => &self.ic,
            Stage::Hydro => &self.hydro,
            Stage::Sampler => &self.sampler,
            Stage::Afterburner => &self.afterburner,
        }
    }
}

/// Fixed per-stage scratch directories, reused by every event.
///
/// Events run strictly one after another; the next event's inputs overwrite
/// whatever a previous (possibly failed) event left behind.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.as_str())
    }

    pub fn prepare(&self) -> io::Result<()> {
        for stage in Stage::ALL {
            fs::create_dir_all(self.stage_dir(stage))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_recognized_keys_and_ignores_others() {
        let text = "\
# stage arguments
ic_stage_args = Pb Pb --reduced-thickness 0.0

hydro_stage_args=etas_min=0.08  tau0=0.5
grid_step = 0.1
";
        let args = StageArgs::parse(text).expect("config parses");
        assert_eq!(args.ic_stage_args, "Pb Pb --reduced-thickness 0.0");
        assert_eq!(args.hydro_stage_args, "etas_min=0.08  tau0=0.5");
    }

    #[test]
    fn parse_keeps_last_duplicate_and_defaults_missing_keys() {
        let args = StageArgs::parse("hydro_stage_args = a\nhydro_stage_args = b\n")
            .expect("config parses");
        assert_eq!(args.hydro_stage_args, "b");
        assert_eq!(args.ic_stage_args, "");
    }

    #[test]
    fn parse_rejects_line_without_separator() {
        let err = StageArgs::parse("ic_stage_args = x\nnonsense\n").expect_err("should fail");
        match err {
            ConfigError::Syntax { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn workspace_lays_out_one_dir_per_stage() {
        let ws = Workspace::new("/scratch/run");
        assert_eq!(ws.stage_dir(Stage::Hydro), PathBuf::from("/scratch/run/hydro"));
        assert_eq!(
            ws.stage_dir(Stage::Afterburner),
            PathBuf::from("/scratch/run/afterburner")
        );
    }
}
