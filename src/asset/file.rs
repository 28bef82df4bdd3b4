//! On-disk representation of writable assets.
//!
//! Every path handled here is relative to the store's working directory. Absolute paths are
//! only formed at the moment of touching the filesystem.

use crate::{asset::AssetValue, error::PipelineError, store::tracker::ModificationTracker};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// One file backing a writable asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    pub filename: PathBuf,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

impl File {
    pub fn new(filename: impl Into<PathBuf>, data: impl Into<Vec<u8>>) -> Self {
        File {
            filename: filename.into(),
            data: data.into(),
        }
    }

    pub fn contents(&self) -> Result<&str, PipelineError> {
        std::str::from_utf8(&self.data).map_err(|e| {
            PipelineError::Serialization(format!("{:?} is not valid UTF-8: {e}", self.filename))
        })
    }
}

/// Read access to the working directory, as seen by [`crate::asset::Asset::load`].
pub trait FileFetcher {
    /// Fetch a single file. `None` when it is absent (or unchanged since the previous run, when
    /// modification tracking is active).
    fn fetch_by_name(&mut self, name: &Path) -> Result<Option<File>, PipelineError>;

    /// Fetch every file matching a shell glob, sorted by relative path.
    fn fetch_by_pattern(&mut self, pattern: &str) -> Result<Vec<File>, PipelineError>;
}

/// [`FileFetcher`] over a real directory, optionally filtered through a
/// [`ModificationTracker`] on behalf of one asset.
pub struct DiskFetcher<'a> {
    directory: &'a Path,
    tracking: Option<(&'a mut ModificationTracker, &'static str)>,
}

impl<'a> DiskFetcher<'a> {
    pub fn new(directory: &'a Path) -> Self {
        DiskFetcher {
            directory,
            tracking: None,
        }
    }

    pub fn tracked(
        directory: &'a Path,
        tracker: &'a mut ModificationTracker,
        owner: &'static str,
    ) -> Self {
        DiskFetcher {
            directory,
            tracking: Some((tracker, owner)),
        }
    }

    fn matching(&self, pattern: &str) -> Result<Vec<PathBuf>, PipelineError> {
        // glob drops `.` components from its results, so match under an absolute root.
        let root = std::path::absolute(self.directory)?;
        let root_str = root.to_str().ok_or_else(|| {
            PipelineError::Io(format!("{:?} is not a valid UTF-8 path", self.directory))
        })?;
        let full_pattern = format!(
            "{}/{}",
            glob::Pattern::escape(root_str.trim_end_matches('/')),
            pattern
        );
        let mut names = Vec::new();
        for entry in glob::glob(&full_pattern)? {
            let path = entry?;
            if !path.is_file() {
                continue;
            }
            names.push(path.strip_prefix(&root)?.to_path_buf());
        }
        names.sort();
        Ok(names)
    }
}

impl FileFetcher for DiskFetcher<'_> {
    fn fetch_by_name(&mut self, name: &Path) -> Result<Option<File>, PipelineError> {
        if let Some((tracker, owner)) = &mut self.tracking {
            if !tracker.check_modified(name, owner)? {
                return Ok(None);
            }
        }
        read_file(self.directory, name)
    }

    fn fetch_by_pattern(&mut self, pattern: &str) -> Result<Vec<File>, PipelineError> {
        let names = self.matching(pattern)?;
        if let Some((tracker, owner)) = &mut self.tracking {
            // Every match is checked so all of them get recorded for this owner.
            let mut any_modified = false;
            for name in &names {
                any_modified |= tracker.check_modified(name, owner)?;
            }
            if !any_modified {
                return Ok(Vec::new());
            }
        }
        let mut files = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(file) = read_file(self.directory, name)? {
                files.push(file);
            }
        }
        Ok(files)
    }
}

fn read_file(directory: &Path, name: &Path) -> Result<Option<File>, PipelineError> {
    match fs::read(directory.join(name)) {
        Ok(data) => Ok(Some(File::new(name, data))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write every file of `asset` under `directory`, creating parent directories as needed.
pub fn persist_to_file(asset: &dyn AssetValue, directory: &Path) -> Result<(), PipelineError> {
    for file in asset.files() {
        let path = directory.join(&file.filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::persistence(parent, e))?;
        }
        fs::write(&path, &file.data).map_err(|e| PipelineError::persistence(&path, e))?;
    }
    Ok(())
}

/// Remove every file of `asset` from `directory`, then any parent directories left empty.
/// Files that are already gone are skipped.
pub fn delete_from_disk(asset: &dyn AssetValue, directory: &Path) -> Result<(), PipelineError> {
    for file in asset.files() {
        let path = directory.join(&file.filename);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::persistence(&path, e)),
        }
        remove_empty_parents(directory, &path);
    }
    Ok(())
}

fn remove_empty_parents(root: &Path, path: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = match fs::read_dir(dir) {
            Ok(mut entries) => entries.next().is_none(),
            Err(_) => false,
        };
        if !is_empty || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
