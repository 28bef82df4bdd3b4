//! Bounded pool around the `nmstatectl` network-config compiler.
//!
//! Each host's declarative network document is compiled by running `nmstatectl gc <file>`
//! as a child process. Calls share one counting semaphore, so no matter how many hosts are
//! compiled concurrently, at most `ceiling` processes run at once. Every call:
//!
//! 1. waits for a permit (or cancellation),
//! 2. writes the document to a private temp file,
//! 3. runs the compiler with stdout and stderr captured separately,
//! 4. canonicalizes each returned connection profile (see [`keyfile`]).
//!
//! Cancellation kills the child. The temp file and the permit are released on every path.

pub mod keyfile;

use crate::{config::PipelineConfig, error::PipelineError};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{
    fmt::Display,
    io::Write,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::{process::Command, sync::Semaphore};
use tokio_util::sync::CancellationToken;

pub const GC_SUBCOMMAND: &str = "gc";
pub const MAC_INTERFACE_FILE: &str = "mac_interface.ini";
const ERROR_MARKER: &str = "Error:";
const INPUT_PREFIX: &str = "host-config";

static MAC_ADDRESS: OnceCell<Regex> = OnceCell::new();

fn mac_address_pattern() -> Result<&'static Regex, PipelineError> {
    Ok(MAC_ADDRESS.get_or_try_init(|| Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$"))?)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MacInterface {
    pub name: String,
    pub mac_address: String,
}

/// One host's network input: an nmstate document plus the MAC addresses of its NICs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostNetworkConfig {
    pub network_yaml: String,
    #[serde(default)]
    pub interfaces: Vec<MacInterface>,
}

impl HostNetworkConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.network_yaml.trim().is_empty() {
            return Err(PipelineError::Custom(
                "host network document is empty".to_string(),
            ));
        }
        let pattern = mac_address_pattern()?;
        for interface in &self.interfaces {
            if !pattern.is_match(&interface.mac_address) {
                return Err(PipelineError::Custom(format!(
                    "invalid MAC address {:?} for interface {:?}",
                    interface.mac_address, interface.name
                )));
            }
        }
        Ok(())
    }

    /// Directory name for this host's compiled files: hex SHA-256 of the document and MAC map.
    pub fn directory_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.network_yaml.as_bytes());
        hasher.update([0u8]);
        hasher.update(mac_interface_map(&self.interfaces).as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A file produced by the compiler, relative to the caller's output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledFile {
    pub path: PathBuf,
    pub contents: String,
}

#[derive(Debug, Default, Deserialize)]
struct GeneratedConfig {
    #[serde(rename = "NetworkManager", default)]
    network_manager: Vec<(String, String)>,
}

/// `mac=name` lines, stably sorted so hosts with equal inputs produce equal files.
pub fn mac_interface_map(interfaces: &[MacInterface]) -> String {
    let mut lines: Vec<String> = interfaces
        .iter()
        .map(|interface| format!("{}={}", interface.mac_address, interface.name))
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Diagnostic text after the last `Error:` marker in stderr, or the raw exit status.
fn classify_failure(status: impl Display, stderr: &str) -> PipelineError {
    if let Some(index) = stderr.rfind(ERROR_MARKER) {
        let message = stderr[index + ERROR_MARKER.len()..].trim();
        if !message.is_empty() {
            return PipelineError::Compiler(message.to_string());
        }
    }
    PipelineError::Compiler(format!("nmstatectl {status}: {}", stderr.trim()))
}

struct RunningGuard<'a> {
    running: &'a AtomicUsize,
}

impl<'a> RunningGuard<'a> {
    fn enter(running: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        RunningGuard { running }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct NetworkConfigCompiler {
    binary: PathBuf,
    ceiling: usize,
    permits: Arc<Semaphore>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl NetworkConfigCompiler {
    pub fn new(binary: impl Into<PathBuf>, ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        NetworkConfigCompiler {
            binary: binary.into(),
            ceiling,
            permits: Arc::new(Semaphore::new(ceiling)),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        NetworkConfigCompiler::new(config.nmstatectl.clone(), config.max_concurrent_compiles)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Compiler processes alive right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously alive compiler processes seen so far.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Compile one host. Returns the canonical connection profiles sorted by file name,
    /// followed by [`MAC_INTERFACE_FILE`].
    pub async fn compile(
        &self,
        cancel: &CancellationToken,
        host: &HostNetworkConfig,
    ) -> Result<Vec<CompiledFile>, PipelineError> {
        host.validate()?;
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::OperationCancelled),
            permit = self.permits.acquire() => permit.map_err(|_| {
                PipelineError::Compiler("compiler pool is closed".to_string())
            })?,
        };

        let stdout = self.run_gc(cancel, &host.network_yaml).await?;
        let generated: GeneratedConfig = if stdout.trim().is_empty() {
            GeneratedConfig::default()
        } else {
            serde_yaml::from_str(&stdout).map_err(|e| {
                PipelineError::Compiler(format!("unexpected compiler output: {e}"))
            })?
        };

        let mut files = Vec::with_capacity(generated.network_manager.len() + 1);
        for (name, contents) in generated.network_manager {
            if Path::new(&name).file_name().and_then(|n| n.to_str()) != Some(name.as_str()) {
                return Err(PipelineError::Compiler(format!(
                    "compiler produced an invalid file name {name:?}"
                )));
            }
            files.push(CompiledFile {
                path: PathBuf::from(name),
                contents: keyfile::canonicalize(&contents)?,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.push(CompiledFile {
            path: PathBuf::from(MAC_INTERFACE_FILE),
            contents: mac_interface_map(&host.interfaces),
        });
        Ok(files)
    }

    /// Compile every host concurrently, each into its own [`HostNetworkConfig::directory_name`]
    /// directory. The first failure abandons (and kills) the remaining compiles.
    pub async fn compile_all(
        &self,
        cancel: &CancellationToken,
        hosts: &[HostNetworkConfig],
    ) -> Result<Vec<CompiledFile>, PipelineError> {
        let per_host = futures::future::try_join_all(hosts.iter().map(|host| async move {
            let directory = PathBuf::from(host.directory_name());
            let files = self.compile(cancel, host).await?;
            Ok::<_, PipelineError>(
                files
                    .into_iter()
                    .map(|file| CompiledFile {
                        path: directory.join(file.path),
                        contents: file.contents,
                    })
                    .collect::<Vec<_>>(),
            )
        }))
        .await?;

        let mut files: Vec<CompiledFile> = per_host.into_iter().flatten().collect();
        files.sort_by(|a, b| a.path.cmp(&b.path));
        // Identical hosts land in the same directory.
        files.dedup_by(|a, b| a.path == b.path);
        Ok(files)
    }

    async fn run_gc(
        &self,
        cancel: &CancellationToken,
        document: &str,
    ) -> Result<String, PipelineError> {
        let mut input = tempfile::Builder::new()
            .prefix(INPUT_PREFIX)
            .suffix(".yaml")
            .tempfile()?;
        input.write_all(document.as_bytes())?;
        input.flush()?;

        let _running = RunningGuard::enter(&self.running, &self.peak);
        tracing::debug!(
            "[nmstate] Running {:?} {} {:?}",
            self.binary,
            GC_SUBCOMMAND,
            input.path()
        );
        let child = Command::new(&self.binary)
            .arg(GC_SUBCOMMAND)
            .arg(input.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PipelineError::Compiler(format!("failed to start {}: {e}", self.binary.display()))
            })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!("[nmstate] Cancelled, killing {:?}", self.binary);
                return Err(PipelineError::OperationCancelled);
            }
            output = child.wait_with_output() => output.map_err(|e| {
                PipelineError::Compiler(format!("failed to wait for {}: {e}", self.binary.display()))
            })?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = classify_failure(output.status, &stderr);
            tracing::debug!("[nmstate] Compile failed: {}", err);
            return Err(err);
        }
        String::from_utf8(output.stdout)
            .map_err(|e| PipelineError::Compiler(format!("compiler output is not UTF-8: {e}")))
    }
}
