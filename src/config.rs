use crate::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

pub const DEFAULT_STATE_FILE: &str = ".asset_pipeline_state.json";
pub const DEFAULT_MODIFICATION_FILE: &str = ".asset_pipeline_mtimes.json";
pub const DEFAULT_NMSTATECTL: &str = "nmstatectl";
pub const DEFAULT_MAX_CONCURRENT_COMPILES: usize = 30;

/// Runtime settings for a [`crate::store::Store`] and its [`crate::nmstate::NetworkConfigCompiler`].
///
/// Every field has a default, so a partial (or missing) TOML file is valid:
///
/// ```toml
/// nmstatectl = "/usr/bin/nmstatectl"
/// max_concurrent_compiles = 8
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run-state file name, relative to the working directory.
    pub state_file: String,
    /// Modification record file name, relative to the working directory.
    pub modification_file: String,
    /// When false, every existing file is treated as freshly modified.
    pub track_modifications: bool,
    pub nmstatectl: PathBuf,
    pub max_concurrent_compiles: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            state_file: DEFAULT_STATE_FILE.to_string(),
            modification_file: DEFAULT_MODIFICATION_FILE.to_string(),
            track_modifications: true,
            nmstatectl: PathBuf::from(DEFAULT_NMSTATECTL),
            max_concurrent_compiles: DEFAULT_MAX_CONCURRENT_COMPILES,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        tracing::debug!("Attempting to read pipeline config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(PipelineConfig::default());
        }
        let content = read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        if config.max_concurrent_compiles == 0 {
            return Err(PipelineError::Custom(
                "max_concurrent_compiles must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        tracing::debug!("Attempting to write pipeline config to: {:?}", path);
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }
}
