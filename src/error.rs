use std::{
    io,
    path::{Path, PathBuf, StripPrefixError},
};

use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum PipelineError {
    #[error("failed to generate asset {asset:?}: {cause}")]
    Generation {
        asset: String,
        cause: Box<PipelineError>,
    },
    #[error("failed to load asset {asset:?}: {reason}")]
    Load { asset: String, reason: String },
    #[error("failed to fetch dependency of {}: {cause}", .chain.join(" -> "))]
    Dependency {
        /// Dependent names, outermost first.
        chain: Vec<String>,
        cause: Box<PipelineError>,
    },
    #[error("Network config compiler error: {0}")]
    Compiler(String),
    #[error("Persistence error at {path:?}: {reason}")]
    Persistence { path: PathBuf, reason: String },
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("Operation cancelled")]
    OperationCancelled,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl PipelineError {
    pub fn generation(asset: &str, cause: PipelineError) -> Self {
        PipelineError::Generation {
            asset: asset.to_string(),
            cause: Box::new(cause),
        }
    }

    pub fn load(asset: &str, reason: impl ToString) -> Self {
        PipelineError::Load {
            asset: asset.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn persistence(path: &Path, reason: impl ToString) -> Self {
        PipelineError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Wrap a failure raised while fetching one of `dependent`'s dependencies, extending the
    /// chain when the failure already came through another dependent.
    pub fn within(self, dependent: &str) -> Self {
        match self {
            PipelineError::Dependency { mut chain, cause } => {
                chain.insert(0, dependent.to_string());
                PipelineError::Dependency { chain, cause }
            }
            other => PipelineError::Dependency {
                chain: vec![dependent.to_string()],
                cause: Box::new(other),
            },
        }
    }

    /// The innermost asset whose generation failed, if any.
    pub fn failing_asset(&self) -> Option<&str> {
        match self {
            PipelineError::Dependency { cause, .. } => cause.failing_asset(),
            PipelineError::Generation { asset, cause } => {
                cause.failing_asset().or(Some(asset.as_str()))
            }
            PipelineError::Load { asset, .. } => Some(asset.as_str()),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            PipelineError::OperationCancelled => true,
            PipelineError::Dependency { cause, .. } | PipelineError::Generation { cause, .. } => {
                cause.is_cancelled()
            }
            _ => false,
        }
    }
}

impl From<StripPrefixError> for PipelineError {
    fn from(src: StripPrefixError) -> PipelineError {
        PipelineError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(src: toml::de::Error) -> PipelineError {
        PipelineError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for PipelineError {
    fn from(src: toml::ser::Error) -> PipelineError {
        PipelineError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for PipelineError {
    fn from(src: JsonError) -> PipelineError {
        PipelineError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(src: serde_yaml::Error) -> PipelineError {
        PipelineError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<glob::PatternError> for PipelineError {
    fn from(src: glob::PatternError) -> PipelineError {
        PipelineError::Serialization(format!("Invalid file pattern: {src}"))
    }
}

impl From<glob::GlobError> for PipelineError {
    fn from(src: glob::GlobError) -> PipelineError {
        PipelineError::Io(format!("Pattern match failed on {:?}: {}", src.path(), src.error()))
    }
}

impl From<tempfile::PersistError> for PipelineError {
    fn from(src: tempfile::PersistError) -> PipelineError {
        PipelineError::Io(format!("Atomic rename failed: {}", src.error))
    }
}

impl From<io::Error> for PipelineError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => PipelineError::NotFound(format!("{x}")),
            _ => PipelineError::Io(format!("IOError: {} ({x})", x.kind())),
        }
    }
}

impl From<RegexError> for PipelineError {
    fn from(x: RegexError) -> Self {
        PipelineError::Serialization(format!("Regex parse failed: {x}"))
    }
}
