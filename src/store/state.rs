use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::BTreeMap,
    fs, io,
    io::Write,
    path::{Path, PathBuf},
};

/// Serialized assets from previous runs, keyed by [`crate::Asset::KEY`].
///
/// On disk this is a single pretty-printed JSON object. Keys are ordered so that two runs
/// producing the same assets write byte-identical files.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateFile {
    assets: BTreeMap<String, Value>,
}

impl StateFile {
    /// Read the state file at `path`. A missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("[Store] No state file at {:?}, starting empty", path);
                return Ok(StateFile::default());
            }
            Err(e) => return Err(PipelineError::load("state file", e)),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            PipelineError::load("state file", format!("{}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let contents = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &contents)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.assets.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.assets.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.assets.insert(key.to_string(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.assets.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.assets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Replace `path` with `contents` via a temp file in the same directory and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), PipelineError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| PipelineError::persistence(&parent, e))?;
    let mut temp =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| PipelineError::persistence(path, e))?;
    temp.write_all(contents)
        .map_err(|e| PipelineError::persistence(path, e))?;
    temp.persist(path)
        .map_err(|e| PipelineError::persistence(path, e.error))?;
    Ok(())
}
