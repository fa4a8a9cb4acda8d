//! Particle record parsing.
//!
//! The afterburner writes one header block per oversample followed by that
//! oversample's particle rows:
//!
//! ```text
//! # afterburner 3.4
//! # oversample
//! # ID charge mass pT phi eta
//! 211 1 0.13957 0.512 1.203 -0.44
//! ...
//! ```
//!
//! Each maximal run of data rows becomes one oversample, numbered in stream
//! order. Oversamples that emitted nothing leave no rows behind, so the parsed
//! block count can fall short of the requested count; [`reconcile`] pads it.

use std::io::{self, BufRead};
use std::num::{ParseFloatError, ParseIntError};

use serde::{Deserialize, Serialize};

/// Lines starting with this prefix are headers.
pub const HEADER_PREFIX: char = '#';
/// Fixed header length of the sampler output.
pub const SAMPLER_HEADER_LINES: usize = 3;
pub const COLUMN_NAMES: [&str; 6] = ["ID", "charge", "mass", "pT", "phi", "eta"];

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("line {line}: {reason}")]
    Row { line: usize, reason: String },

    #[error("found {found} oversample blocks but only {expected} were requested")]
    TooManyBlocks { found: usize, expected: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Equal-length typed columns of one oversample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticleColumns {
    pub id: Vec<i32>,
    pub charge: Vec<i32>,
    pub mass: Vec<f64>,
    pub pt: Vec<f64>,
    pub phi: Vec<f64>,
    pub eta: Vec<f64>,
}

impl ParticleColumns {
    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }

    pub fn is_consistent(&self) -> bool {
        let n = self.id.len();
        [
            self.charge.len(),
            self.mass.len(),
            self.pt.len(),
            self.phi.len(),
            self.eta.len(),
        ]
        .iter()
        .all(|&len| len == n)
    }

    pub fn push_row(&mut self, id: i32, charge: i32, mass: f64, pt: f64, phi: f64, eta: f64) {
        self.id.push(id);
        self.charge.push(charge);
        self.mass.push(mass);
        self.pt.push(pt);
        self.phi.push(phi);
        self.eta.push(eta);
    }

    fn push_line(&mut self, line: &str) -> Result<(), String> {
        let fields: Vec<&str> = line.split_ascii_whitespace().collect();
        if fields.len() < COLUMN_NAMES.len() {
            return Err(format!(
                "expected {} columns, found {}",
                COLUMN_NAMES.len(),
                fields.len()
            ));
        }
        let int = |i: usize| -> Result<i32, String> {
            fields[i]
                .parse()
                .map_err(|e: ParseIntError| format!("{}: {:?}: {}", COLUMN_NAMES[i], fields[i], e))
        };
        let float = |i: usize| -> Result<f64, String> {
            let value: f64 = fields[i]
                .parse()
                .map_err(|e: ParseFloatError| format!("{}: {:?}: {}", COLUMN_NAMES[i], fields[i], e))?;
            if value.is_finite() {
                Ok(value)
            } else {
                Err(format!("{}: {:?}: not finite", COLUMN_NAMES[i], fields[i]))
            }
        };
        let row = (int(0)?, int(1)?, float(2)?, float(3)?, float(4)?, float(5)?);
        self.push_row(row.0, row.1, row.2, row.3, row.4, row.5);
        Ok(())
    }
}

fn is_header(line: &str) -> bool {
    line.trim_start().starts_with(HEADER_PREFIX)
}

/// Splits the stream into oversample blocks at header lines.
///
/// Blank lines neither split a block nor count as data.
pub fn parse_blocks<R: BufRead>(reader: R) -> Result<Vec<ParticleColumns>, RecordError> {
    let mut blocks = Vec::new();
    let mut current: Option<ParticleColumns> = None;

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if is_header(&line) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            continue;
        }
        current
            .get_or_insert_with(ParticleColumns::default)
            .push_line(&line)
            .map_err(|reason| RecordError::Row {
                line: idx + 1,
                reason,
            })?;
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Pads `blocks` with empty oversamples up to `expected`. More blocks than
/// requested means the sampler ignored its arguments; that is rejected.
pub fn reconcile(
    mut blocks: Vec<ParticleColumns>,
    expected: usize,
) -> Result<Vec<ParticleColumns>, RecordError> {
    if blocks.len() > expected {
        return Err(RecordError::TooManyBlocks {
            found: blocks.len(),
            expected,
        });
    }
    blocks.resize_with(expected, ParticleColumns::default);
    Ok(blocks)
}

/// True if anything follows the first `header_lines` lines.
pub fn has_records_after_header<R: BufRead>(
    reader: R,
    header_lines: usize,
) -> Result<bool, RecordError> {
    match reader.lines().nth(header_lines) {
        Some(line) => {
            line?;
            Ok(true)
        }
        None => Ok(false),
    }
}
