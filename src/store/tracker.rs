//! Staleness detection for user-editable files.
//!
//! The tracker remembers, per owning asset, the modification time of every file it observed.
//! On the next run a file whose mtime is not strictly newer than the remembered one is
//! reported as absent, so the resolver falls back to the state-file copy instead of
//! re-reading and deep-comparing a file nobody touched.

use crate::{error::PipelineError, store::state::write_atomic};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs, io,
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

/// Persisted form: owner asset key -> relative path -> mtime (ns since the Unix epoch).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModificationRecord {
    owners: BTreeMap<String, BTreeMap<PathBuf, u64>>,
}

impl ModificationRecord {
    pub fn get(&self, owner: &str, path: &Path) -> Option<u64> {
        self.owners.get(owner).and_then(|files| files.get(path)).copied()
    }

    pub fn owners(&self) -> impl Iterator<Item = &str> {
        self.owners.keys().map(String::as_str)
    }
}

#[derive(Debug)]
pub struct ModificationTracker {
    directory: PathBuf,
    record_path: PathBuf,
    enabled: bool,
    previous: HashMap<PathBuf, u64>,
    current: ModificationRecord,
    preserved: HashMap<String, BTreeSet<PathBuf>>,
}

impl ModificationTracker {
    /// Load the record written by the previous run. A missing or unreadable record starts
    /// empty.
    pub fn load(directory: &Path, record_file: &str, enabled: bool) -> Self {
        let record_path = directory.join(record_file);
        let record = if enabled {
            read_record(&record_path)
        } else {
            ModificationRecord::default()
        };
        let previous = record
            .owners
            .values()
            .flat_map(|files| files.iter().map(|(path, mtime)| (path.clone(), *mtime)))
            .collect();
        ModificationTracker {
            directory: directory.to_path_buf(),
            record_path,
            enabled,
            previous,
            current: record,
            preserved: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether `name` exists and changed since the previous run. Missing and unchanged files
    /// both report `false`. The observed mtime is recorded for `owner` either way.
    pub fn check_modified(&mut self, name: &Path, owner: &str) -> Result<bool, PipelineError> {
        let Some(mtime) = mtime_nanos(&self.directory.join(name))? else {
            return Ok(false);
        };
        if !self.enabled {
            return Ok(true);
        }
        self.current
            .owners
            .entry(owner.to_string())
            .or_default()
            .insert(name.to_path_buf(), mtime);
        match self.previous.get(name) {
            Some(previous) if mtime <= *previous => {
                tracing::debug!("[Tracker] {:?} unchanged since last run", name);
                self.preserved
                    .entry(owner.to_string())
                    .or_default()
                    .insert(name.to_path_buf());
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Remember the current mtime of `name` as written by `owner`.
    pub fn record(&mut self, name: &Path, owner: &str) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(mtime) = mtime_nanos(&self.directory.join(name))? {
            self.current
                .owners
                .entry(owner.to_string())
                .or_default()
                .insert(name.to_path_buf(), mtime);
        }
        Ok(())
    }

    /// Forget everything recorded for `owner`.
    pub fn purge(&mut self, owner: &str) {
        self.current.owners.remove(owner);
        self.preserved.remove(owner);
    }

    /// Whether any file of `owner` was seen on disk this run and found unchanged.
    pub fn has_preserved_files(&self, owner: &str) -> bool {
        self.preserved
            .get(owner)
            .is_some_and(|files| !files.is_empty())
    }

    pub fn record_snapshot(&self) -> &ModificationRecord {
        &self.current
    }

    pub fn save(&self) -> Result<(), PipelineError> {
        if !self.enabled {
            return Ok(());
        }
        let contents = serde_json::to_vec_pretty(&self.current)?;
        write_atomic(&self.record_path, &contents)
    }

    /// Delete the persisted record and forget all observations.
    pub fn destroy(&mut self) -> Result<(), PipelineError> {
        self.current = ModificationRecord::default();
        self.previous.clear();
        self.preserved.clear();
        match fs::remove_file(&self.record_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::persistence(&self.record_path, e)),
        }
    }
}

fn read_record(path: &Path) -> ModificationRecord {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ModificationRecord::default(),
        Err(e) => {
            tracing::warn!("[Tracker] Could not read {:?}, ignoring it: {}", path, e);
            return ModificationRecord::default();
        }
    };
    serde_json::from_slice(&raw).unwrap_or_else(|e| {
        tracing::warn!("[Tracker] Corrupt modification record {:?}, ignoring it: {}", path, e);
        ModificationRecord::default()
    })
}

fn mtime_nanos(path: &Path) -> Result<Option<u64>, PipelineError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if !metadata.is_file() {
        return Ok(None);
    }
    let nanos = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    Ok(Some(nanos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::FileTime;
    use tempfile::TempDir;

    const RECORD: &str = "mtimes.json";

    fn touch(dir: &Path, name: &str, unix_seconds: i64) {
        let path = dir.join(name);
        if !path.exists() {
            fs::write(&path, name).unwrap();
        }
        filetime::set_file_mtime(&path, FileTime::from_unix_time(unix_seconds, 0)).unwrap();
    }

    #[test]
    fn first_sighting_counts_as_modified() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", 1_000);
        let mut tracker = ModificationTracker::load(dir.path(), RECORD, true);

        assert!(tracker.check_modified(Path::new("a.txt"), "owner").unwrap());
        assert!(!tracker.check_modified(Path::new("missing.txt"), "owner").unwrap());
        assert!(!tracker.has_preserved_files("owner"));
    }

    #[test]
    fn unchanged_files_are_preserved_across_runs() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", 1_000);
        touch(dir.path(), "b.txt", 1_000);

        let mut first = ModificationTracker::load(dir.path(), RECORD, true);
        first.record(Path::new("a.txt"), "owner").unwrap();
        first.record(Path::new("b.txt"), "owner").unwrap();
        first.save().unwrap();

        touch(dir.path(), "b.txt", 2_000);
        let mut second = ModificationTracker::load(dir.path(), RECORD, true);
        assert!(!second.check_modified(Path::new("a.txt"), "owner").unwrap());
        assert!(second.check_modified(Path::new("b.txt"), "owner").unwrap());
        assert!(second.has_preserved_files("owner"));

        second.purge("owner");
        assert!(!second.has_preserved_files("owner"));
        assert!(second.record_snapshot().get("owner", Path::new("a.txt")).is_none());
    }

    #[test]
    fn older_mtime_is_not_a_modification() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", 5_000);
        let mut first = ModificationTracker::load(dir.path(), RECORD, true);
        first.record(Path::new("a.txt"), "owner").unwrap();
        first.save().unwrap();

        touch(dir.path(), "a.txt", 4_000);
        let mut second = ModificationTracker::load(dir.path(), RECORD, true);
        assert!(!second.check_modified(Path::new("a.txt"), "owner").unwrap());
    }

    #[test]
    fn untouched_owners_are_carried_over() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", 1_000);
        let mut first = ModificationTracker::load(dir.path(), RECORD, true);
        first.record(Path::new("a.txt"), "kept").unwrap();
        first.save().unwrap();

        let second = ModificationTracker::load(dir.path(), RECORD, true);
        second.save().unwrap();
        let third = ModificationTracker::load(dir.path(), RECORD, true);
        assert_eq!(
            third.record_snapshot().get("kept", Path::new("a.txt")),
            Some(1_000_000_000_000)
        );
    }

    #[test]
    fn corrupt_record_starts_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(RECORD), "[[[").unwrap();
        touch(dir.path(), "a.txt", 1_000);
        let mut tracker = ModificationTracker::load(dir.path(), RECORD, true);
        assert!(tracker.check_modified(Path::new("a.txt"), "owner").unwrap());
    }

    #[test]
    fn disabled_tracker_reports_every_existing_file() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.txt", 1_000);
        let mut tracker = ModificationTracker::load(dir.path(), RECORD, false);
        tracker.record(Path::new("a.txt"), "owner").unwrap();
        assert!(tracker.check_modified(Path::new("a.txt"), "owner").unwrap());
        tracker.save().unwrap();
        assert!(!dir.path().join(RECORD).exists());
    }
}
