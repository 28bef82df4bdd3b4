use crate::{
    asset::{Asset, AssetId, AssetValue},
    error::PipelineError,
};
use std::{collections::HashMap, sync::Arc};

/// Resolved dependencies handed to [`Asset::generate`], keyed by asset identity.
#[derive(Debug, Default, Clone)]
pub struct Parents {
    assets: HashMap<&'static str, Arc<dyn AssetValue>>,
}

impl Parents {
    pub fn insert(&mut self, id: &AssetId, value: Arc<dyn AssetValue>) {
        self.assets.insert(id.key(), value);
    }

    /// The resolved value of dependency `T`. Fails when `T` was not declared as a dependency.
    pub fn get<T: Asset>(&self) -> Result<&T, PipelineError> {
        self.assets
            .get(T::KEY)
            .and_then(|value| value.as_any().downcast_ref::<T>())
            .ok_or_else(|| {
                PipelineError::NotFound(format!("{} is not a declared dependency", T::name()))
            })
    }

    pub fn contains(&self, id: &AssetId) -> bool {
        self.assets.contains_key(id.key())
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}
