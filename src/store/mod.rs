//! The asset store: resolves assets from the working directory, the state file of previous
//! runs, or by generation.
//!
//! ## Provenance
//!
//! Every asset touched during a run ends up with exactly one [`Provenance`]:
//!
//! - `OnDisk`: the user placed (or edited) its files in the working directory and they differ
//!   from the state-file copy. The disk copy wins.
//! - `StateFile`: taken from the previous run's state file, either because nothing is on disk
//!   or because the disk copy is deep-equal to it.
//! - `Generated`: produced this run from its resolved dependencies.
//! - `Unfetched`: nothing usable was found. [`Store::fetch`] generates it; [`Store::load`]
//!   reports it as absent.
//!
//! An asset whose dependency is `OnDisk`, or is itself downstream of one, is *dirty*: neither its
//! disk copy nor its state-file copy is trusted, and it is regenerated.
//!
//! ## Consumption
//!
//! After a successful fetch, files of assets that were read from disk are deleted from the
//! working directory ("consumed"), except for the fetch target and any assets the caller
//! asked to preserve. Their content lives on in the state file.

pub mod state;
pub mod tracker;

use crate::{
    asset::{
        delete_from_disk, downcast, persist_to_file, Asset, AssetId, AssetValue, DiskFetcher,
        Parents, PipelineContext,
    },
    config::PipelineConfig,
    error::PipelineError,
};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use state::StateFile;
use std::{
    collections::{HashMap, HashSet},
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracker::ModificationTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Unfetched,
    Generated,
    OnDisk,
    StateFile,
}

struct AssetState {
    id: AssetId,
    value: Option<Arc<dyn AssetValue>>,
    source: Provenance,
    any_parents_dirty: bool,
    present_on_disk: bool,
}

impl AssetState {
    /// Dependents of a dirty asset must be regenerated.
    fn is_dirty(&self) -> bool {
        self.any_parents_dirty || self.source == Provenance::OnDisk
    }
}

pub struct Store {
    directory: PathBuf,
    state_path: PathBuf,
    state_file: StateFile,
    tracker: ModificationTracker,
    assets: HashMap<&'static str, AssetState>,
    generated: Vec<&'static str>,
}

impl Store {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, PipelineError> {
        Store::with_config(directory, &PipelineConfig::default())
    }

    pub fn with_config(
        directory: impl Into<PathBuf>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let directory = directory.into();
        let state_path = directory.join(&config.state_file);
        let state_file = StateFile::load(&state_path)?;
        let tracker = ModificationTracker::load(
            &directory,
            &config.modification_file,
            config.track_modifications,
        );
        tracing::debug!(
            "[Store] Opened {:?} with {} persisted assets",
            directory,
            state_file.len()
        );
        Ok(Store {
            directory,
            state_path,
            state_file,
            tracker,
            assets: HashMap::new(),
            generated: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    pub fn state_file(&self) -> &StateFile {
        &self.state_file
    }

    pub fn provenance(&self, id: &AssetId) -> Provenance {
        self.assets
            .get(id.key())
            .map(|state| state.source)
            .unwrap_or(Provenance::Unfetched)
    }

    pub fn is_present_on_disk(&self, id: &AssetId) -> bool {
        self.assets
            .get(id.key())
            .is_some_and(|state| state.present_on_disk)
    }

    /// Names of the assets generated by the most recent [`Store::fetch`], in generation order.
    pub fn last_generated(&self) -> &[&'static str] {
        &self.generated
    }

    /// Resolve `T` and everything it depends on, generating what cannot be reused.
    ///
    /// On success the state file is rewritten and consumed on-disk assets are purged, except for
    /// `T` itself and the assets in `preserved`. On failure nothing is written.
    pub async fn fetch<T: Asset>(
        &mut self,
        ctx: &PipelineContext,
        preserved: &[AssetId],
    ) -> Result<Arc<T>, PipelineError> {
        let value = self.fetch_id(ctx, &AssetId::of::<T>(), preserved).await?;
        downcast::<T>(value)
    }

    #[tracing::instrument(skip_all, fields(asset = target.name()))]
    pub async fn fetch_id(
        &mut self,
        ctx: &PipelineContext,
        target: &AssetId,
        preserved: &[AssetId],
    ) -> Result<Arc<dyn AssetValue>, PipelineError> {
        self.generated.clear();
        let value = self.resolve(ctx, target.clone(), 0).await?;
        self.save_state()?;

        let mut excluded: HashSet<&'static str> = preserved.iter().map(AssetId::key).collect();
        excluded.insert(target.key());
        self.purge(&excluded)?;
        self.tracker.save()?;
        Ok(value)
    }

    /// Resolve `T` from disk or the state file without generating anything.
    pub fn load<T: Asset>(&mut self) -> Result<Option<Arc<T>>, PipelineError> {
        self.load_id(&AssetId::of::<T>())?
            .map(downcast::<T>)
            .transpose()
    }

    pub fn load_id(&mut self, id: &AssetId) -> Result<Option<Arc<dyn AssetValue>>, PipelineError> {
        self.load_state(id, 0)?;
        Ok(self.reusable(id))
    }

    /// Write the resolved `T` to the working directory and remember its files as unchanged.
    pub fn persist<T: Asset>(&mut self) -> Result<(), PipelineError> {
        self.persist_id(&AssetId::of::<T>())
    }

    pub fn persist_id(&mut self, id: &AssetId) -> Result<(), PipelineError> {
        let value = self.reusable(id).ok_or_else(|| {
            PipelineError::NotFound(format!("{} has not been resolved", id.name()))
        })?;
        persist_to_file(value.as_ref(), &self.directory)?;
        for file in value.files() {
            self.tracker.record(&file.filename, id.key())?;
        }
        self.tracker.save()
    }

    /// Remove `T` from the working directory, the run state and the state file.
    pub fn destroy<T: Asset>(&mut self) -> Result<(), PipelineError> {
        self.destroy_id(&AssetId::of::<T>())
    }

    #[tracing::instrument(skip_all, fields(asset = id.name()))]
    pub fn destroy_id(&mut self, id: &AssetId) -> Result<(), PipelineError> {
        let key = id.key();
        let mut value = self.assets.get(key).and_then(|state| state.value.clone());
        if value.is_none() {
            if let Some(raw) = self.state_file.get(key) {
                value = Some(id.erased().from_state(raw)?);
            }
        }
        if value.is_none() {
            value = id.erased().load(&mut DiskFetcher::new(&self.directory))?;
        }
        match &value {
            Some(value) => {
                tracing::info!("[Store] Destroying {}", id.name());
                delete_from_disk(value.as_ref(), &self.directory)?;
            }
            None => tracing::debug!("[Store] Nothing to destroy for {}", id.name()),
        }
        self.assets.remove(key);
        self.state_file.remove(key);
        self.tracker.purge(key);
        self.save_state()?;
        self.tracker.save()
    }

    /// Delete the state file and modification record. Files in the working directory stay.
    pub fn destroy_state(&mut self) -> Result<(), PipelineError> {
        match fs::remove_file(&self.state_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::persistence(&self.state_path, e)),
        }
        self.state_file = StateFile::default();
        self.tracker.destroy()
    }

    fn reusable(&self, id: &AssetId) -> Option<Arc<dyn AssetValue>> {
        self.assets
            .get(id.key())
            .filter(|state| state.source != Provenance::Unfetched)
            .and_then(|state| state.value.clone())
    }

    fn resolve<'a>(
        &'a mut self,
        ctx: &'a PipelineContext,
        id: AssetId,
        depth: usize,
    ) -> BoxFuture<'a, Result<Arc<dyn AssetValue>, PipelineError>> {
        Box::pin(async move {
            tracing::debug!("[Store] {}Fetching {}", indent(depth), id.name());
            self.load_state(&id, depth)?;
            if let Some(value) = self.reusable(&id) {
                tracing::debug!(
                    "[Store] {}Reusing previously-fetched {}",
                    indent(depth),
                    id.name()
                );
                return Ok(value);
            }

            let mut parents = Parents::default();
            for dependency in id.dependencies() {
                let value = self
                    .resolve(ctx, dependency.clone(), depth + 1)
                    .await
                    .map_err(|e| e.within(id.name()))?;
                parents.insert(&dependency, value);
            }

            if ctx.is_cancelled() {
                return Err(PipelineError::generation(
                    id.name(),
                    PipelineError::OperationCancelled,
                ));
            }
            tracing::info!("[Store] {}Generating {}", indent(depth), id.name());
            let value = id
                .erased()
                .generate(ctx, &parents)
                .await
                .map_err(|e| PipelineError::generation(id.name(), e))?;

            let state = self.assets.get_mut(id.key()).ok_or_else(|| {
                PipelineError::NotFound(format!("{} vanished from the run state", id.name()))
            })?;
            state.value = Some(value.clone());
            state.source = Provenance::Generated;
            self.generated.push(id.name());
            Ok(value)
        })
    }

    /// Decide where `id` comes from without generating anything. Dependencies are decided first
    /// so dirtiness can flow down to dependents. Returns whether `id` makes its dependents dirty.
    fn load_state(&mut self, id: &AssetId, depth: usize) -> Result<bool, PipelineError> {
        if let Some(state) = self.assets.get(id.key()) {
            return Ok(state.is_dirty());
        }

        let mut any_parents_dirty = false;
        for dependency in id.dependencies() {
            if self.load_state(&dependency, depth + 1)? {
                any_parents_dirty = true;
            }
        }

        let key = id.key();
        let mut on_disk = id
            .erased()
            .load(&mut DiskFetcher::tracked(
                &self.directory,
                &mut self.tracker,
                key,
            ))
            .map_err(|e| PipelineError::load(id.name(), e))?;
        if on_disk.is_none() && self.tracker.has_preserved_files(key) && !self.state_file.contains(key)
        {
            tracing::debug!(
                "[Store] {}{} is unchanged on disk but missing from the state file",
                indent(depth),
                id.name()
            );
            on_disk = id
                .erased()
                .load(&mut DiskFetcher::new(&self.directory))
                .map_err(|e| PipelineError::load(id.name(), e))?;
        }
        let present_on_disk = on_disk.is_some() || self.tracker.has_preserved_files(key);

        let (value, source) = if any_parents_dirty {
            if present_on_disk {
                tracing::warn!(
                    "[Store] Discarding the {} that was provided in the target directory because its dependencies are dirty and it needs to be regenerated",
                    id.name()
                );
            }
            (None, Provenance::Unfetched)
        } else {
            let from_state = match self.state_file.get(key) {
                Some(raw) => Some(
                    id.erased()
                        .from_state(raw)
                        .map_err(|e| PipelineError::load(id.name(), e))?,
                ),
                None => None,
            };
            match (on_disk, from_state) {
                (Some(disk), Some(state)) => {
                    if disk.to_state()? == state.to_state()? {
                        tracing::debug!(
                            "[Store] {}On-disk {} matches the state file",
                            indent(depth),
                            id.name()
                        );
                        (Some(state), Provenance::StateFile)
                    } else {
                        tracing::debug!(
                            "[Store] {}Using {} loaded from target directory",
                            indent(depth),
                            id.name()
                        );
                        (Some(disk), Provenance::OnDisk)
                    }
                }
                (Some(disk), None) => {
                    tracing::debug!(
                        "[Store] {}Using {} loaded from target directory",
                        indent(depth),
                        id.name()
                    );
                    (Some(disk), Provenance::OnDisk)
                }
                (None, Some(state)) => {
                    tracing::debug!(
                        "[Store] {}Using {} loaded from state file",
                        indent(depth),
                        id.name()
                    );
                    (Some(state), Provenance::StateFile)
                }
                (None, None) => (None, Provenance::Unfetched),
            }
        };

        let state = AssetState {
            id: id.clone(),
            value,
            source,
            any_parents_dirty,
            present_on_disk,
        };
        let dirty = state.is_dirty();
        self.assets.insert(key, state);
        Ok(dirty)
    }

    fn save_state(&mut self) -> Result<(), PipelineError> {
        for (key, state) in &self.assets {
            if state.source == Provenance::Unfetched {
                continue;
            }
            if let Some(value) = &state.value {
                self.state_file.insert(key, value.to_state()?);
            }
        }
        self.state_file.save(&self.state_path)
    }

    fn purge(&mut self, excluded: &HashSet<&'static str>) -> Result<(), PipelineError> {
        let mut keys: Vec<&'static str> = self.assets.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            if excluded.contains(key) {
                continue;
            }
            let Some(state) = self.assets.get_mut(key) else {
                continue;
            };
            if !state.present_on_disk {
                continue;
            }
            let Some(value) = state.value.clone() else {
                continue;
            };
            tracing::info!(
                "[Store] Consuming {} from target directory",
                state.id.name()
            );
            delete_from_disk(value.as_ref(), &self.directory)?;
            state.present_on_disk = false;
            self.tracker.purge(key);
        }
        Ok(())
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::helpers::{
        AboveBroken, Base, Broken, Bundle, Certificate, Left, NeedsBroken, Right, Top,
    };
    use tempfile::TempDir;

    #[test_log::test(tokio::test)]
    async fn dependencies_generate_first_and_once() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        let ctx = PipelineContext::default();

        let top = store.fetch::<Top>(&ctx, &[]).await.unwrap();
        assert_eq!(top.value, "top(left(base),right(base))");
        assert_eq!(store.last_generated(), &["base", "left", "right", "top"]);
        assert_eq!(store.provenance(&AssetId::of::<Base>()), Provenance::Generated);
    }

    #[test_log::test(tokio::test)]
    async fn second_fetch_reuses_cached_values() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        let ctx = PipelineContext::default();

        let first = store.fetch::<Bundle>(&ctx, &[]).await.unwrap();
        assert_eq!(store.last_generated(), &["certificate", "bundle"]);

        let second = store.fetch::<Bundle>(&ctx, &[]).await.unwrap();
        assert!(store.last_generated().is_empty());
        assert!(Arc::ptr_eq(&first, &second));

        let left = store.fetch::<Left>(&ctx, &[]).await.unwrap();
        assert_eq!(left.value, "left(base)");
        assert_eq!(store.last_generated(), &["base", "left"]);
    }

    #[test_log::test(tokio::test)]
    async fn fetch_writes_every_resolved_asset_to_state() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        store
            .fetch::<Bundle>(&PipelineContext::default(), &[])
            .await
            .unwrap();

        let persisted = StateFile::load(store.state_path()).unwrap();
        assert_eq!(
            persisted.keys().collect::<Vec<_>>(),
            vec!["bundle", "certificate"]
        );
        assert_eq!(
            persisted.get("bundle").unwrap()["contents"],
            "bundle(generated-ca)"
        );
    }

    #[test_log::test(tokio::test)]
    async fn failure_names_the_asset_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();

        let err = store
            .fetch::<AboveBroken>(&PipelineContext::default(), &[])
            .await
            .unwrap_err();
        match &err {
            PipelineError::Dependency { chain, cause } => {
                assert_eq!(chain, &vec!["above-broken".to_string(), "needs-broken".to_string()]);
                assert!(matches!(**cause, PipelineError::Generation { .. }));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.failing_asset(), Some("broken"));
        assert!(!store.state_path().exists());
        assert_eq!(store.provenance(&AssetId::of::<Broken>()), Provenance::Unfetched);
        assert_eq!(
            store.provenance(&AssetId::of::<NeedsBroken>()),
            Provenance::Unfetched
        );
    }

    #[test_log::test(tokio::test)]
    async fn siblings_stay_cached_after_a_failure() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        let ctx = PipelineContext::default();

        store.fetch::<Right>(&ctx, &[]).await.unwrap();
        assert!(store.fetch::<AboveBroken>(&ctx, &[]).await.is_err());
        store.fetch::<Top>(&ctx, &[]).await.unwrap();
        assert_eq!(store.last_generated(), &["left", "top"]);
    }

    #[test_log::test(tokio::test)]
    async fn load_never_generates() {
        let dir = TempDir::new().unwrap();
        let mut empty = Store::new(dir.path()).unwrap();
        assert!(empty.load::<Certificate>().unwrap().is_none());
        assert!(empty.last_generated().is_empty());
        assert!(!empty.state_path().exists());

        let mut first = Store::new(dir.path()).unwrap();
        first
            .fetch::<Bundle>(&PipelineContext::default(), &[])
            .await
            .unwrap();

        let mut second = Store::new(dir.path()).unwrap();
        let bundle = second.load::<Bundle>().unwrap().unwrap();
        assert_eq!(bundle.contents, "bundle(generated-ca)");
        assert_eq!(
            second.provenance(&AssetId::of::<Bundle>()),
            Provenance::StateFile
        );
    }

    #[test_log::test(tokio::test)]
    async fn destroy_removes_files_and_state_entry() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        store
            .fetch::<Bundle>(&PipelineContext::default(), &[])
            .await
            .unwrap();
        store.persist::<Bundle>().unwrap();
        assert!(dir.path().join(Bundle::PATH).exists());

        store.destroy::<Bundle>().unwrap();
        assert!(!dir.path().join(Bundle::PATH).exists());
        let persisted = StateFile::load(store.state_path()).unwrap();
        assert!(!persisted.contains("bundle"));
        assert!(persisted.contains("certificate"));
        assert_eq!(store.provenance(&AssetId::of::<Bundle>()), Provenance::Unfetched);
    }

    #[test_log::test(tokio::test)]
    async fn destroy_state_forgets_previous_runs() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        store
            .fetch::<Certificate>(&PipelineContext::default(), &[])
            .await
            .unwrap();
        store.destroy_state().unwrap();
        assert!(!store.state_path().exists());

        let mut fresh = Store::new(dir.path()).unwrap();
        assert!(fresh.load::<Certificate>().unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn cancelled_context_stops_generation() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        let ctx = PipelineContext::default();
        ctx.cancel_token().cancel();

        let err = store.fetch::<Bundle>(&ctx, &[]).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(!store.state_path().exists());
    }

    #[test_log::test(tokio::test)]
    async fn persist_requires_a_resolved_asset() {
        let dir = TempDir::new().unwrap();
        let mut store = Store::new(dir.path()).unwrap();
        assert!(matches!(
            store.persist::<Certificate>(),
            Err(PipelineError::NotFound(_))
        ));
    }
}
