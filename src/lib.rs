//! # asset-pipeline
//!
//! A dependency-driven artifact resolver for cluster bootstrap material.
//!
//! ## Overview
//!
//! Bootstrapping a cluster means producing a graph of typed artifacts: certificates, keys,
//! configuration files, per-host network profiles. Each artifact depends on others, some are
//! supplied (or edited) by the user, and everything must be reproducible across runs in the
//! same working directory.
//!
//! asset-pipeline models each artifact as an [`Asset`] and resolves them through a [`Store`]:
//!
//! - **Depth-first resolution**: dependencies resolve before dependents, and each asset type is
//!   generated at most once per store.
//! - **Provenance**: every asset is taken from the working directory, from the previous run's
//!   state file, or generated, and the store remembers which.
//! - **Dirty propagation**: a user edit on disk invalidates every asset built on top of it.
//! - **Staleness tracking**: file modification times from the previous run let the store skip
//!   re-reading files nobody touched.
//! - **Consumption**: files of intermediate assets read from disk are removed once their content
//!   is captured in the state file.
//! - **Bounded external compilers**: per-host network configuration is compiled by
//!   `nmstatectl`, with a process ceiling shared across all concurrent generations.
//!
//! ## Architecture
//!
//! - **[`asset`]**: the [`Asset`] contract, erased [`AssetId`]/[`AssetValue`] forms, file I/O
//! - **[`store`]**: the resolver, the state file and the modification tracker
//! - **[`nmstate`]**: the bounded `nmstatectl` pool and keyfile canonicalization
//! - **[`assets`]**: concrete network assets built on the pool
//! - **[`config`]**: TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asset_pipeline::{assets::StaticNetworkConfig, PipelineConfig, PipelineContext, Store};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let ctx = PipelineContext::new(&config);
//!     let mut store = Store::with_config("./install-dir", &config)?;
//!
//!     // Resolves network/hosts/*.yaml, compiles them and records both in the state file.
//!     let network = store.fetch::<StaticNetworkConfig>(&ctx, &[]).await?;
//!     println!("{} files", network.files.len());
//!
//!     // Write the compiled profiles back into the working directory.
//!     store.persist::<StaticNetworkConfig>()?;
//!     Ok(())
//! }
//! ```

pub mod asset;
pub mod assets;
pub mod config;
pub mod error;
pub mod nmstate;
pub mod store;
#[cfg(test)]
mod tests;

pub use asset::{Asset, AssetId, AssetValue, File, FileFetcher, Parents, PipelineContext};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use store::{Provenance, Store};
