//! Result store: one hierarchical on-disk container shared by every event of
//! a run.
//!
//! ```text
//! {root}/store.json
//! {root}/{event}/initial/{grid,attrs}.json
//! {root}/{event}/outcome.json
//! {root}/{event}/particles/attrs.json
//! {root}/{event}/particles/{index}/{ID,charge,mass,pT,phi,eta}.json
//! ```
//!
//! `outcome.json` is run bookkeeping, not a dataset group: the dataset layout
//! of a finished event is `initial`, plus `particles` once committed.
//!
//! Entries whose name starts with `.` are staging areas and never part of
//! the visible layout. The `particles` subtree is assembled under a staging
//! name and renamed into place in one step, so a reader never observes a
//! partially written oversample.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::records::{ParticleColumns, COLUMN_NAMES};

pub const SCHEMA_VERSION: &str = "hic_store_v1";

const MANIFEST_FILE: &str = "store.json";
const INITIAL_GROUP: &str = "initial";
const PARTICLES_GROUP: &str = "particles";
const GRID_FILE: &str = "grid.json";
const ATTRS_FILE: &str = "attrs.json";
const OUTCOME_FILE: &str = "outcome.json";
const PARTICLES_STAGING: &str = ".particles.partial";
const INITIAL_STAGING: &str = ".initial.partial";
const ADOPT_SUFFIX: &str = ".adopt";

#[derive(Debug, Serialize, Deserialize)]
struct StoreManifest {
    schema_version: String,
    created_at: String,
}

/// Scalar attributes attached to an event's initial condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialAttrs {
    pub impact_parameter: f64,
    pub npart: u32,
    pub mult: f64,
    pub eccentricities: Vec<f64>,
}

/// Entropy density profile and its summary attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialCondition {
    pub grid: Vec<Vec<f64>>,
    pub attrs: InitialAttrs,
}

/// Terminal state recorded for a processed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    NoSurface,
    NoParticles,
    Committed,
}

#[derive(Debug, Serialize, Deserialize)]
struct OutcomeRecord {
    outcome: EventStatus,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParticlesAttrs {
    oversamples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub name: String,
    pub status: Option<EventStatus>,
    pub oversamples: Option<usize>,
    pub particles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreSummary {
    pub events: usize,
    pub pending: usize,
    pub committed: usize,
    pub oversamples: usize,
    pub particles: usize,
}

#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Opens the store at `root`, initializing it if no manifest exists yet.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE);
        if manifest_path.exists() {
            return Self::open(root);
        }
        fs::create_dir_all(&root).map_err(StoreError::io(&root))?;
        let manifest = StoreManifest {
            schema_version: SCHEMA_VERSION.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        atomic_write_json(&manifest_path, &manifest)?;
        debug!(root = %root.display(), "created result store");
        Ok(Self { root })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(StoreError::corruption(&root, "missing store manifest"));
        }
        let manifest: StoreManifest = read_json(&manifest_path).map_err(|e| match e {
            StoreError::Json { path, source } => {
                StoreError::corruption(path, format!("unreadable manifest: {source}"))
            }
            other => other,
        })?;
        if manifest.schema_version != SCHEMA_VERSION {
            return Err(StoreError::corruption(
                &manifest_path,
                format!("unsupported schema version {:?}", manifest.schema_version),
            ));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a `/`-separated group path below the store root.
    fn group_path(&self, path: &str) -> Result<PathBuf, StoreError> {
        let mut resolved = self.root.clone();
        for segment in path.split('/') {
            validate_name(segment)?;
            resolved.push(segment);
        }
        Ok(resolved)
    }

    fn event_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.root.join(name))
    }

    fn existing_event_dir(&self, name: &str) -> Result<PathBuf, StoreError> {
        let dir = self.event_dir(name)?;
        if !dir.is_dir() {
            return Err(StoreError::corruption(&dir, "event does not exist"));
        }
        Ok(dir)
    }

    pub fn create_event_subtree(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.event_dir(name)?;
        match fs::create_dir(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(StoreError::corruption(&dir, "event already exists"))
            }
            Err(e) => Err(StoreError::io(&dir)(e)),
        }
    }

    /// Writes the immutable `initial` group of an event.
    pub fn attach_initial(&self, name: &str, initial: &InitialCondition) -> Result<(), StoreError> {
        let dir = self.existing_event_dir(name)?;
        let target = dir.join(INITIAL_GROUP);
        if target.exists() {
            return Err(StoreError::corruption(&target, "initial condition already attached"));
        }
        let staging = dir.join(INITIAL_STAGING);
        reset_dir(&staging)?;
        write_json(&staging.join(GRID_FILE), &initial.grid)?;
        write_json(&staging.join(ATTRS_FILE), &initial.attrs)?;
        fs::rename(&staging, &target).map_err(StoreError::io(&target))
    }

    pub fn read_initial(&self, name: &str) -> Result<InitialCondition, StoreError> {
        let dir = self.existing_event_dir(name)?.join(INITIAL_GROUP);
        let grid: Vec<Vec<f64>> = read_json(&dir.join(GRID_FILE))?;
        let attrs: InitialAttrs = read_json(&dir.join(ATTRS_FILE))?;
        Ok(InitialCondition { grid, attrs })
    }

    /// Event names in store iteration order.
    pub fn events(&self) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(StoreError::io(&self.root))?;
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&self.root))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    /// Events not yet taken to a terminal state.
    pub fn pending_events(&self) -> Result<Vec<String>, StoreError> {
        let mut pending = Vec::new();
        for name in self.events()? {
            if self.status(&name)?.is_none() {
                pending.push(name);
            }
        }
        Ok(pending)
    }

    pub fn status(&self, name: &str) -> Result<Option<EventStatus>, StoreError> {
        let path = self.existing_event_dir(name)?.join(OUTCOME_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let record: OutcomeRecord = read_json(&path)?;
        Ok(Some(record.outcome))
    }

    pub fn mark_outcome(&self, name: &str, status: EventStatus) -> Result<(), StoreError> {
        let path = self.existing_event_dir(name)?.join(OUTCOME_FILE);
        atomic_write_json(&path, &OutcomeRecord { outcome: status })
    }

    /// Creates the `particles` subtree with one group per oversample, in
    /// index order. The subtree appears as a whole or not at all.
    pub fn write_particles(&self, name: &str, groups: &[ParticleColumns]) -> Result<(), StoreError> {
        let dir = self.existing_event_dir(name)?;
        if !dir.join(INITIAL_GROUP).is_dir() {
            return Err(StoreError::corruption(&dir, "event has no initial condition"));
        }
        let target = dir.join(PARTICLES_GROUP);
        if target.exists() {
            return Err(StoreError::corruption(&target, "particles already written"));
        }
        if let Some(index) = groups.iter().position(|g| !g.is_consistent()) {
            return Err(StoreError::corruption(
                &target,
                format!("oversample {index} has columns of unequal length"),
            ));
        }

        let staging = dir.join(PARTICLES_STAGING);
        let written = stage_particles(&staging, groups)
            .and_then(|()| fs::rename(&staging, &target).map_err(StoreError::io(&target)));
        if written.is_err() {
            let _ = fs::remove_dir_all(&staging);
        }
        written?;
        debug!(event = name, oversamples = groups.len(), "wrote particles");
        Ok(())
    }

    pub fn has_particles(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self.existing_event_dir(name)?.join(PARTICLES_GROUP).exists())
    }

    pub fn read_particles(&self, name: &str) -> Result<Option<Vec<ParticleColumns>>, StoreError> {
        let dir = self.existing_event_dir(name)?.join(PARTICLES_GROUP);
        if !dir.exists() {
            return Ok(None);
        }
        let attrs: ParticlesAttrs = read_json(&dir.join(ATTRS_FILE))?;
        let mut groups = Vec::with_capacity(attrs.oversamples);
        for index in 0..attrs.oversamples {
            let group = dir.join(index.to_string());
            if !group.is_dir() {
                return Err(StoreError::corruption(&group, "missing oversample group"));
            }
            groups.push(ParticleColumns {
                id: read_json(&group.join(column_file(0)))?,
                charge: read_json(&group.join(column_file(1)))?,
                mass: read_json(&group.join(column_file(2)))?,
                pt: read_json(&group.join(column_file(3)))?,
                phi: read_json(&group.join(column_file(4)))?,
                eta: read_json(&group.join(column_file(5)))?,
            });
        }
        Ok(Some(groups))
    }

    /// Removes an event and everything below it. Deleting an absent event is
    /// not an error.
    pub fn delete_event(&self, name: &str) -> Result<(), StoreError> {
        let dir = self.event_dir(name)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir)(e)),
        }
    }

    /// Renames the last segment of `path`, keeping it under the same parent.
    pub fn rename_group(&self, path: &str, new_name: &str) -> Result<(), StoreError> {
        let dst = match path.rsplit_once('/') {
            Some((parent, _)) => format!("{parent}/{new_name}"),
            None => new_name.to_string(),
        };
        self.move_group(path, &dst)
    }

    /// Moves a group to a new location. The destination's parent must exist
    /// and the destination itself must not.
    pub fn move_group(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let from = self.group_path(src)?;
        let to = self.group_path(dst)?;
        if !from.exists() {
            return Err(StoreError::corruption(&from, "group does not exist"));
        }
        if to.exists() {
            return Err(StoreError::corruption(&to, "destination group already exists"));
        }
        if to.starts_with(&from) {
            return Err(StoreError::corruption(&to, "cannot move a group into itself"));
        }
        if !to.parent().is_some_and(Path::is_dir) {
            return Err(StoreError::corruption(&to, "destination parent does not exist"));
        }
        fs::rename(&from, &to).map_err(StoreError::io(&to))?;
        debug!(from = src, to = dst, "moved group");
        Ok(())
    }

    /// Relocates raw initial conditions written by the IC stage at the store
    /// root (`{name}/{grid,attrs}.json`) into `{name}/initial`. Returns the
    /// adopted event names.
    ///
    /// A raw group is parked under a hidden name while its event subtree is
    /// created. Groups left parked by an interrupted adoption are finished
    /// first.
    pub fn adopt_raw_initials(&self) -> Result<Vec<String>, StoreError> {
        let mut adopted = self.recover_parked_initials()?;
        for name in self.events()? {
            let dir = self.root.join(&name);
            let is_raw = dir.join(GRID_FILE).is_file()
                && dir.join(ATTRS_FILE).is_file()
                && !dir.join(INITIAL_GROUP).exists();
            if !is_raw {
                continue;
            }
            let parked = self.root.join(parked_name(&name));
            fs::rename(&dir, &parked).map_err(StoreError::io(&parked))?;
            self.create_event_subtree(&name)?;
            let target = dir.join(INITIAL_GROUP);
            fs::rename(&parked, &target).map_err(StoreError::io(&target))?;
            debug!(event = %name, "adopted raw initial condition");
            adopted.push(name);
        }
        adopted.sort();
        adopted.dedup();
        Ok(adopted)
    }

    fn recover_parked_initials(&self) -> Result<Vec<String>, StoreError> {
        let mut recovered = Vec::new();
        let entries = fs::read_dir(&self.root).map_err(StoreError::io(&self.root))?;
        for entry in entries {
            let entry = entry.map_err(StoreError::io(&self.root))?;
            let Ok(file_name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(name) = file_name
                .strip_prefix('.')
                .and_then(|rest| rest.strip_suffix(ADOPT_SUFFIX))
            else {
                continue;
            };
            validate_name(name)?;
            let parked = entry.path();
            let dir = self.root.join(name);
            if !dir.exists() {
                // crashed right after parking: the raw group goes back and is
                // adopted by the regular pass
                fs::rename(&parked, &dir).map_err(StoreError::io(&dir))?;
                continue;
            }
            let target = dir.join(INITIAL_GROUP);
            if target.exists() {
                return Err(StoreError::corruption(
                    &parked,
                    "parked initial condition for an event that already has one",
                ));
            }
            fs::rename(&parked, &target).map_err(StoreError::io(&target))?;
            debug!(event = name, "finished interrupted adoption");
            recovered.push(name.to_string());
        }
        Ok(recovered)
    }

    /// Status comes from the `outcome.json` marker; the group counts cover
    /// only the `particles` dataset.
    pub fn describe_event(&self, name: &str) -> Result<EventSummary, StoreError> {
        let status = self.status(name)?;
        let particles = self.read_particles(name)?;
        Ok(EventSummary {
            name: name.to_string(),
            status,
            oversamples: particles.as_ref().map(Vec::len),
            particles: particles
                .as_ref()
                .map_or(0, |groups| groups.iter().map(ParticleColumns::len).sum()),
        })
    }

    /// Checks every structural invariant, reporting the first violation as
    /// corruption.
    ///
    /// An event's `outcome.json` is bookkeeping and is only checked for
    /// agreement with the presence of `particles`; it is not counted as a
    /// group.
    pub fn verify(&self) -> Result<StoreSummary, StoreError> {
        Self::open(self.root.clone())?;
        let mut summary = StoreSummary::default();
        for name in self.events()? {
            let dir = self.root.join(&name);
            summary.events += 1;

            let initial = dir.join(INITIAL_GROUP);
            for file in [GRID_FILE, ATTRS_FILE] {
                if !initial.join(file).is_file() {
                    return Err(StoreError::corruption(&initial, format!("missing {file}")));
                }
            }

            let status = self.status(&name)?;
            let has_particles = dir.join(PARTICLES_GROUP).exists();
            match (status, has_particles) {
                (None, _) => summary.pending += 1,
                (Some(EventStatus::Committed), true) => summary.committed += 1,
                (Some(EventStatus::NoSurface | EventStatus::NoParticles), false) => {}
                (Some(status), has) => {
                    return Err(StoreError::corruption(
                        &dir,
                        format!("outcome {status:?} inconsistent with particles present = {has}"),
                    ));
                }
            }
            if !has_particles {
                continue;
            }

            let particles_dir = dir.join(PARTICLES_GROUP);
            let groups = self.read_particles(&name)?.unwrap_or_default();
            let group_dirs = fs::read_dir(&particles_dir)
                .map_err(StoreError::io(&particles_dir))?
                .filter_map(Result::ok)
                .filter(|e| e.path().is_dir())
                .count();
            if group_dirs != groups.len() {
                return Err(StoreError::corruption(
                    &particles_dir,
                    format!(
                        "{} oversample groups on disk but {} recorded",
                        group_dirs,
                        groups.len()
                    ),
                ));
            }
            if let Some(index) = groups.iter().position(|g| !g.is_consistent()) {
                return Err(StoreError::corruption(
                    particles_dir.join(index.to_string()),
                    "columns of unequal length",
                ));
            }
            summary.oversamples += groups.len();
            summary.particles += groups.iter().map(ParticleColumns::len).sum::<usize>();
        }
        Ok(summary)
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if invalid {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

fn parked_name(name: &str) -> String {
    format!(".{name}{ADOPT_SUFFIX}")
}

fn column_file(index: usize) -> String {
    format!("{}.json", COLUMN_NAMES[index])
}

fn stage_particles(staging: &Path, groups: &[ParticleColumns]) -> Result<(), StoreError> {
    reset_dir(staging)?;
    for (index, group) in groups.iter().enumerate() {
        let dir = staging.join(index.to_string());
        fs::create_dir(&dir).map_err(StoreError::io(&dir))?;
        write_json(&dir.join(column_file(0)), &group.id)?;
        write_json(&dir.join(column_file(1)), &group.charge)?;
        write_json(&dir.join(column_file(2)), &group.mass)?;
        write_json(&dir.join(column_file(3)), &group.pt)?;
        write_json(&dir.join(column_file(4)), &group.phi)?;
        write_json(&dir.join(column_file(5)), &group.eta)?;
    }
    write_json(
        &staging.join(ATTRS_FILE),
        &ParticlesAttrs {
            oversamples: groups.len(),
        },
    )
}

/// Leftovers from an interrupted write are discarded.
fn reset_dir(dir: &Path) -> Result<(), StoreError> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(StoreError::io(dir))?;
    }
    fs::create_dir(dir).map_err(StoreError::io(dir))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path).map_err(StoreError::io(path))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, bytes).map_err(StoreError::io(path))
}

fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let write = || -> io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(StoreError::io(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> ResultStore {
        let root = std::env::temp_dir().join(format!(
            "hic_store_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ResultStore::create(root).expect("create store")
    }

    fn initial(mult: f64) -> InitialCondition {
        InitialCondition {
            grid: vec![vec![0.0, 1.5, 0.0], vec![2.0, 9.25, 1.0]],
            attrs: InitialAttrs {
                impact_parameter: 4.2,
                npart: 310,
                mult,
                eccentricities: vec![0.11, 0.23, 0.05, 0.02],
            },
        }
    }

    fn seeded_event(store: &ResultStore, name: &str) {
        store.create_event_subtree(name).expect("create event");
        store.attach_initial(name, &initial(2500.0)).expect("attach initial");
    }

    fn group(rows: usize) -> ParticleColumns {
        let mut cols = ParticleColumns::default();
        for i in 0..rows {
            cols.push_row(211, 1, 0.13957, 0.1 * i as f64, 0.5, -0.2);
        }
        cols
    }

    #[test]
    fn initial_condition_round_trips() {
        let store = temp_store("initial");
        seeded_event(&store, "event_0");
        let read = store.read_initial("event_0").expect("read initial");
        assert_eq!(read, initial(2500.0));
        let err = store
            .attach_initial("event_0", &initial(1.0))
            .expect_err("initial is immutable");
        assert!(err.is_corruption());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn particles_round_trip_with_empty_groups() {
        let store = temp_store("particles");
        seeded_event(&store, "event_0");
        let groups = vec![group(3), group(0), group(1), group(0), group(0)];
        store.write_particles("event_0", &groups).expect("write");
        store
            .mark_outcome("event_0", EventStatus::Committed)
            .expect("mark");

        let read = store
            .read_particles("event_0")
            .expect("read")
            .expect("particles present");
        assert_eq!(read.len(), 5);
        let lens: Vec<usize> = read.iter().map(ParticleColumns::len).collect();
        assert_eq!(lens, vec![3, 0, 1, 0, 0]);
        assert_eq!(read, groups);

        let summary = store.verify().expect("store valid");
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.oversamples, 5);
        assert_eq!(summary.particles, 4);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn second_particle_write_is_corruption() {
        let store = temp_store("twice");
        seeded_event(&store, "event_0");
        store.write_particles("event_0", &[group(1), group(0)]).expect("write");
        let err = store
            .write_particles("event_0", &[group(1)])
            .expect_err("must refuse");
        assert!(err.is_corruption());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn inconsistent_columns_are_never_written() {
        let store = temp_store("ragged");
        seeded_event(&store, "event_0");
        let mut ragged = group(2);
        ragged.eta.pop();
        let err = store
            .write_particles("event_0", &[group(1), ragged])
            .expect_err("ragged columns");
        assert!(err.is_corruption());
        assert_eq!(store.read_particles("event_0").expect("read"), None);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn stale_staging_is_replaced_and_hidden() {
        let store = temp_store("staging");
        seeded_event(&store, "event_0");
        let staging = store.root().join("event_0").join(PARTICLES_STAGING);
        fs::create_dir_all(staging.join("7")).expect("stale staging");
        assert!(store.read_particles("event_0").expect("read").is_none());

        store.write_particles("event_0", &[group(2), group(1)]).expect("write");
        assert!(!staging.exists());
        let read = store.read_particles("event_0").expect("read").expect("present");
        assert_eq!(read.len(), 2);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn delete_event_removes_whole_subtree_and_is_idempotent() {
        let store = temp_store("delete");
        seeded_event(&store, "event_0");
        seeded_event(&store, "event_1");
        store.write_particles("event_0", &[group(1), group(1)]).expect("write");
        store.delete_event("event_0").expect("delete");
        store.delete_event("event_0").expect("delete again");
        assert_eq!(store.events().expect("events"), vec!["event_1".to_string()]);
        assert!(!store.root().join("event_0").exists());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn pending_events_skip_terminal_ones() {
        let store = temp_store("pending");
        for name in ["event_2", "event_0", "event_1"] {
            seeded_event(&store, name);
        }
        store
            .mark_outcome("event_1", EventStatus::NoSurface)
            .expect("mark");
        assert_eq!(
            store.pending_events().expect("pending"),
            vec!["event_0".to_string(), "event_2".to_string()]
        );
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn raw_initials_are_adopted_into_event_subtrees() {
        let store = temp_store("adopt");
        let raw = store.root().join("event_5");
        fs::create_dir_all(&raw).expect("raw dir");
        let ic = initial(800.0);
        write_json(&raw.join(GRID_FILE), &ic.grid).expect("grid");
        write_json(&raw.join(ATTRS_FILE), &ic.attrs).expect("attrs");
        seeded_event(&store, "event_1");

        let adopted = store.adopt_raw_initials().expect("adopt");
        assert_eq!(adopted, vec!["event_5".to_string()]);
        assert_eq!(store.read_initial("event_5").expect("read"), ic);
        assert!(!raw.join(GRID_FILE).exists());
        assert_eq!(
            store.events().expect("events"),
            vec!["event_1".to_string(), "event_5".to_string()]
        );
        assert!(store.adopt_raw_initials().expect("adopt again").is_empty());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn interrupted_adoption_is_hidden_and_finished_on_next_pass() {
        let store = temp_store("adopt_resume");
        let ic = initial(640.0);

        // parked before the event subtree existed
        let early = store.root().join(parked_name("event_2"));
        fs::create_dir_all(&early).expect("parked dir");
        write_json(&early.join(GRID_FILE), &ic.grid).expect("grid");
        write_json(&early.join(ATTRS_FILE), &ic.attrs).expect("attrs");

        // parked after the event subtree was created
        let late = store.root().join(parked_name("event_3"));
        fs::create_dir_all(&late).expect("parked dir");
        write_json(&late.join(GRID_FILE), &ic.grid).expect("grid");
        write_json(&late.join(ATTRS_FILE), &ic.attrs).expect("attrs");
        store.create_event_subtree("event_3").expect("event dir");

        assert_eq!(store.events().expect("events"), vec!["event_3".to_string()]);

        let adopted = store.adopt_raw_initials().expect("adopt");
        assert_eq!(adopted, vec!["event_2".to_string(), "event_3".to_string()]);
        for name in ["event_2", "event_3"] {
            assert_eq!(store.read_initial(name).expect("read"), ic);
        }
        assert!(!early.exists());
        assert!(!late.exists());
        store.verify().expect("store valid");
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn move_and_rename_guard_destinations() {
        let store = temp_store("move");
        seeded_event(&store, "a");
        seeded_event(&store, "b");
        let err = store.rename_group("a", "b").expect_err("destination exists");
        assert!(err.is_corruption());
        let err = store.move_group("a", "a/initial/x").expect_err("into itself");
        assert!(err.is_corruption());
        assert!(matches!(
            store.move_group("a", "../escape").expect_err("bad name"),
            StoreError::InvalidName(_)
        ));
        store.rename_group("a/initial", "seed").expect("rename nested");
        assert!(store.root().join("a").join("seed").join(GRID_FILE).is_file());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn names_reserved_for_staging_are_rejected() {
        let store = temp_store("names");
        for bad in ["", ".hidden", "a/b", "..", "x\\y"] {
            assert!(
                matches!(
                    store.create_event_subtree(bad).expect_err("invalid"),
                    StoreError::InvalidName(_)
                ),
                "{bad:?} accepted"
            );
        }
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn open_requires_manifest() {
        let dir = std::env::temp_dir().join(format!(
            "hic_store_nomanifest_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("dir");
        let err = ResultStore::open(&dir).expect_err("no manifest");
        assert!(err.is_corruption());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn terminal_event_without_particles_holds_initial_and_outcome_marker() {
        let store = temp_store("terminal_layout");
        seeded_event(&store, "event_0");
        store
            .mark_outcome("event_0", EventStatus::NoParticles)
            .expect("mark");

        let mut entries: Vec<String> = fs::read_dir(store.root().join("event_0"))
            .expect("read event dir")
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        entries.sort();
        assert_eq!(entries, vec![INITIAL_GROUP.to_string(), OUTCOME_FILE.to_string()]);

        let summary = store.verify().expect("store valid");
        assert_eq!((summary.events, summary.oversamples), (1, 0));
        let described = store.describe_event("event_0").expect("describe");
        assert_eq!(described.oversamples, None);
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn verify_flags_particles_without_committed_outcome() {
        let store = temp_store("verify");
        seeded_event(&store, "event_0");
        store.write_particles("event_0", &[group(1), group(0)]).expect("write");
        store
            .mark_outcome("event_0", EventStatus::NoSurface)
            .expect("mark");
        let err = store.verify().expect_err("inconsistent");
        assert!(err.is_corruption());
        let _ = fs::remove_dir_all(store.root());
    }

    #[test]
    fn verify_flags_missing_oversample_group() {
        let store = temp_store("verify_missing");
        seeded_event(&store, "event_0");
        store
            .write_particles("event_0", &[group(1), group(2), group(0)])
            .expect("write");
        store
            .mark_outcome("event_0", EventStatus::Committed)
            .expect("mark");
        fs::remove_dir_all(store.root().join("event_0").join(PARTICLES_GROUP).join("1"))
            .expect("remove group");
        assert!(store.verify().expect_err("missing group").is_corruption());
        let _ = fs::remove_dir_all(store.root());
    }
}
