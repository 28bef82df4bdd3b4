use crate::{
    asset::{Asset, AssetId, File, FileFetcher, Parents, PipelineContext},
    error::PipelineError,
    nmstate::{CompiledFile, HostNetworkConfig},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const HOSTS_PATTERN: &str = "network/hosts/*.yaml";
pub const STATIC_NETWORK_DIR: &str = "network/static";

/// User-provided per-host network documents, one YAML file per host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkHosts {
    pub files: Vec<File>,
}

impl NetworkHosts {
    pub fn hosts(&self) -> Result<Vec<HostNetworkConfig>, PipelineError> {
        self.files
            .iter()
            .map(|file| {
                let host: HostNetworkConfig = serde_yaml::from_str(file.contents()?)?;
                host.validate()?;
                Ok(host)
            })
            .collect()
    }
}

impl Asset for NetworkHosts {
    const KEY: &'static str = "network-hosts";

    fn name() -> &'static str {
        "Network Hosts"
    }

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        tracing::debug!("[Assets] No host network documents provided");
        Ok(NetworkHosts::default())
    }

    fn files(&self) -> Vec<File> {
        self.files.clone()
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        let files = fetcher.fetch_by_pattern(HOSTS_PATTERN)?;
        if files.is_empty() {
            return Ok(None);
        }
        let hosts = NetworkHosts { files };
        // Reject malformed documents here rather than deep inside generation.
        hosts.hosts()?;
        Ok(Some(hosts))
    }
}

/// Compiled NetworkManager profiles for every host, under [`STATIC_NETWORK_DIR`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticNetworkConfig {
    /// Paths relative to [`STATIC_NETWORK_DIR`], sorted.
    pub files: Vec<CompiledFile>,
}

impl Asset for StaticNetworkConfig {
    const KEY: &'static str = "static-network-config";

    fn name() -> &'static str {
        "Static Network Config"
    }

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<NetworkHosts>()]
    }

    async fn generate(ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        let hosts = parents.get::<NetworkHosts>()?.hosts()?;
        if hosts.is_empty() {
            return Ok(StaticNetworkConfig::default());
        }
        tracing::info!("[Assets] Compiling network config for {} hosts", hosts.len());
        let files = ctx
            .network_compiler()
            .compile_all(ctx.cancel_token(), &hosts)
            .await?;
        Ok(StaticNetworkConfig { files })
    }

    fn files(&self) -> Vec<File> {
        self.files
            .iter()
            .map(|file| {
                File::new(
                    Path::new(STATIC_NETWORK_DIR).join(&file.path),
                    file.contents.as_bytes(),
                )
            })
            .collect()
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        let found = fetcher.fetch_by_pattern(&format!("{STATIC_NETWORK_DIR}/*/*"))?;
        if found.is_empty() {
            return Ok(None);
        }
        let mut files = Vec::with_capacity(found.len());
        for file in &found {
            files.push(CompiledFile {
                path: file.filename.strip_prefix(STATIC_NETWORK_DIR)?.to_path_buf(),
                contents: file.contents()?.to_string(),
            });
        }
        Ok(Some(StaticNetworkConfig { files }))
    }
}
