//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use asset_pipeline::{Asset, AssetId, File, FileFetcher, Parents, PipelineContext, PipelineError};
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Write `contents` to `dir/name`, creating parent directories.
#[allow(dead_code)]
pub fn write_file(dir: &Path, name: &str, contents: &str) {
    let path = dir.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Move the mtime of `dir/name` well past anything recorded by an earlier run.
#[allow(dead_code)]
pub fn bump_mtime(dir: &Path, name: &str) {
    let now = FileTime::now();
    let later = FileTime::from_unix_time(now.unix_seconds() + 60, 0);
    set_file_mtime(dir.join(name), later).unwrap();
}

/// Root certificate authority: writable, no dependencies.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterCa {
    pub cert: String,
}

#[allow(dead_code)]
impl ClusterCa {
    pub const PATH: &'static str = "tls/root-ca.crt";
}

impl Asset for ClusterCa {
    const KEY: &'static str = "cluster-ca";

    fn name() -> &'static str {
        "Cluster CA"
    }

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Ok(ClusterCa {
            cert: "generated-root-ca".to_string(),
        })
    }

    fn files(&self) -> Vec<File> {
        vec![File::new(Self::PATH, self.cert.as_bytes())]
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        fetcher
            .fetch_by_name(Path::new(Self::PATH))?
            .map(|file| file.contents().map(|cert| ClusterCa { cert: cert.to_string() }))
            .transpose()
    }
}

/// Admin kubeconfig signed by [`ClusterCa`]: writable.
#[allow(dead_code)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminKubeconfig {
    pub contents: String,
}

#[allow(dead_code)]
impl AdminKubeconfig {
    pub const PATH: &'static str = "auth/kubeconfig";
}

impl Asset for AdminKubeconfig {
    const KEY: &'static str = "admin-kubeconfig";

    fn name() -> &'static str {
        "Admin Kubeconfig"
    }

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<ClusterCa>()]
    }

    async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        let ca = parents.get::<ClusterCa>()?;
        Ok(AdminKubeconfig {
            contents: format!("kubeconfig signed by {}", ca.cert),
        })
    }

    fn files(&self) -> Vec<File> {
        vec![File::new(Self::PATH, self.contents.as_bytes())]
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        fetcher
            .fetch_by_name(Path::new(Self::PATH))?
            .map(|file| {
                file.contents().map(|contents| AdminKubeconfig {
                    contents: contents.to_string(),
                })
            })
            .transpose()
    }
}
