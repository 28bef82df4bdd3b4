//! The asset contract.
//!
//! An asset is a typed, serializable artifact produced from its declared dependencies. Each
//! concrete asset type implements [`Asset`]; the resolver works with the erased forms
//! [`AssetId`] (the type as a value, used for identity and dispatch) and [`AssetValue`] (a
//! resolved instance shared through `Arc`).
//!
//! ```rust,no_run
//! use asset_pipeline::{Asset, AssetId, Parents, PipelineContext, PipelineError};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct ClusterName(String);
//!
//! impl Asset for ClusterName {
//!     const KEY: &'static str = "cluster-name";
//!
//!     async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
//!         Ok(ClusterName("demo".to_string()))
//!     }
//! }
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Banner(String);
//!
//! impl Asset for Banner {
//!     const KEY: &'static str = "banner";
//!
//!     fn dependencies() -> Vec<AssetId> {
//!         vec![AssetId::of::<ClusterName>()]
//!     }
//!
//!     async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
//!         let name = parents.get::<ClusterName>()?;
//!         Ok(Banner(format!("welcome to {}", name.0)))
//!     }
//! }
//! ```

pub mod file;
pub mod parents;

pub use file::{delete_from_disk, persist_to_file, DiskFetcher, File, FileFetcher};
pub use parents::Parents;

use crate::{config::PipelineConfig, error::PipelineError, nmstate::NetworkConfigCompiler};
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::{
    any::Any,
    fmt::{self, Debug},
    future::Future,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};
use tokio_util::sync::CancellationToken;

/// A typed artifact of the pipeline.
///
/// Writable assets override [`Asset::files`] and [`Asset::load`]; the defaults describe an
/// asset that only ever lives in the state file.
pub trait Asset: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Stable identity of the asset type. Keys the run state and the persisted state file, so it
    /// must not change between releases that share a working directory.
    const KEY: &'static str;

    /// Human readable name used in logs and error chains.
    fn name() -> &'static str {
        Self::KEY
    }

    fn dependencies() -> Vec<AssetId> {
        Vec::new()
    }

    /// Produce a fresh value from resolved dependencies.
    fn generate(
        ctx: &PipelineContext,
        parents: &Parents,
    ) -> impl Future<Output = Result<Self, PipelineError>> + Send;

    fn files(&self) -> Vec<File> {
        Vec::new()
    }

    /// Reconstruct the asset from the working directory. `Ok(None)` means not found.
    fn load(_fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        Ok(None)
    }
}

/// A resolved asset instance with its concrete type erased.
pub trait AssetValue: Any + Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// The state-file form of the value. Two values are deep-equal when these are equal.
    fn to_state(&self) -> Result<Value, PipelineError>;

    fn files(&self) -> Vec<File>;
}

impl<T: Asset> AssetValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn to_state(&self) -> Result<Value, PipelineError> {
        Ok(serde_json::to_value(self)?)
    }

    fn files(&self) -> Vec<File> {
        Asset::files(self)
    }
}

/// Downcast a shared erased value back to its asset type.
pub fn downcast<T: Asset>(value: Arc<dyn AssetValue>) -> Result<Arc<T>, PipelineError> {
    value.into_any().downcast::<T>().map_err(|_| {
        PipelineError::Custom(format!("resolved value is not a {}", T::name()))
    })
}

/// Per-type operations the resolver dispatches through.
pub(crate) trait ErasedAsset: Send + Sync {
    fn key(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn dependencies(&self) -> Vec<AssetId>;

    fn generate<'a>(
        &'a self,
        ctx: &'a PipelineContext,
        parents: &'a Parents,
    ) -> BoxFuture<'a, Result<Arc<dyn AssetValue>, PipelineError>>;

    fn load(
        &self,
        fetcher: &mut dyn FileFetcher,
    ) -> Result<Option<Arc<dyn AssetValue>>, PipelineError>;

    fn from_state(&self, raw: &Value) -> Result<Arc<dyn AssetValue>, PipelineError>;
}

struct Typed<T>(PhantomData<fn() -> T>);

impl<T: Asset> ErasedAsset for Typed<T> {
    fn key(&self) -> &'static str {
        T::KEY
    }

    fn name(&self) -> &'static str {
        T::name()
    }

    fn dependencies(&self) -> Vec<AssetId> {
        T::dependencies()
    }

    fn generate<'a>(
        &'a self,
        ctx: &'a PipelineContext,
        parents: &'a Parents,
    ) -> BoxFuture<'a, Result<Arc<dyn AssetValue>, PipelineError>> {
        Box::pin(async move {
            let value = T::generate(ctx, parents).await?;
            Ok(Arc::new(value) as Arc<dyn AssetValue>)
        })
    }

    fn load(
        &self,
        fetcher: &mut dyn FileFetcher,
    ) -> Result<Option<Arc<dyn AssetValue>>, PipelineError> {
        Ok(T::load(fetcher)?.map(|value| Arc::new(value) as Arc<dyn AssetValue>))
    }

    fn from_state(&self, raw: &Value) -> Result<Arc<dyn AssetValue>, PipelineError> {
        let value = T::deserialize(raw)?;
        Ok(Arc::new(value))
    }
}

/// An asset type as a value: identity, dependency list and dispatch for one [`Asset`] impl.
#[derive(Clone)]
pub struct AssetId(Arc<dyn ErasedAsset>);

impl AssetId {
    pub fn of<T: Asset>() -> Self {
        AssetId(Arc::new(Typed::<T>(PhantomData)))
    }

    pub fn key(&self) -> &'static str {
        self.0.key()
    }

    pub fn name(&self) -> &'static str {
        self.0.name()
    }

    pub fn dependencies(&self) -> Vec<AssetId> {
        self.0.dependencies()
    }

    pub(crate) fn erased(&self) -> &dyn ErasedAsset {
        self.0.as_ref()
    }
}

impl PartialEq for AssetId {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AssetId {}

impl Hash for AssetId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.key())
    }
}

/// Ambient inputs of generation: cancellation and shared external-tool pools.
#[derive(Clone)]
pub struct PipelineContext {
    cancel: CancellationToken,
    network: Arc<NetworkConfigCompiler>,
}

impl PipelineContext {
    pub fn new(config: &PipelineConfig) -> Self {
        PipelineContext {
            cancel: CancellationToken::new(),
            network: Arc::new(NetworkConfigCompiler::from_config(config)),
        }
    }

    pub fn with_network_compiler(mut self, compiler: Arc<NetworkConfigCompiler>) -> Self {
        self.network = compiler;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn network_compiler(&self) -> &NetworkConfigCompiler {
        &self.network
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        PipelineContext::new(&PipelineConfig::default())
    }
}
