//! Small asset graphs for exercising the store.
//!
//! - `Certificate` <- `Bundle`: writable assets with one file each.
//! - `Base` <- {`Left`, `Right`} <- `Top`: a diamond of state-only assets.
//! - `Broken` <- `NeedsBroken` <- `AboveBroken`: a chain whose leaf fails to generate.

use crate::{
    asset::{Asset, AssetId, File, FileFetcher, Parents, PipelineContext},
    error::PipelineError,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Certificate {
    pub pem: String,
}

impl Certificate {
    pub const PATH: &'static str = "tls/ca.crt";
}

impl Asset for Certificate {
    const KEY: &'static str = "certificate";

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Ok(Certificate {
            pem: "generated-ca".to_string(),
        })
    }

    fn files(&self) -> Vec<File> {
        vec![File::new(Self::PATH, self.pem.as_bytes())]
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        let Some(file) = fetcher.fetch_by_name(Path::new(Self::PATH))? else {
            return Ok(None);
        };
        Ok(Some(Certificate {
            pem: file.contents()?.to_string(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub contents: String,
}

impl Bundle {
    pub const PATH: &'static str = "bundle.txt";
}

impl Asset for Bundle {
    const KEY: &'static str = "bundle";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<Certificate>()]
    }

    async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        let certificate = parents.get::<Certificate>()?;
        Ok(Bundle {
            contents: format!("bundle({})", certificate.pem),
        })
    }

    fn files(&self) -> Vec<File> {
        vec![File::new(Self::PATH, self.contents.as_bytes())]
    }

    fn load(fetcher: &mut dyn FileFetcher) -> Result<Option<Self>, PipelineError> {
        let Some(file) = fetcher.fetch_by_name(Path::new(Self::PATH))? else {
            return Ok(None);
        };
        Ok(Some(Bundle {
            contents: file.contents()?.to_string(),
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    pub value: String,
}

impl Asset for Base {
    const KEY: &'static str = "base";

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Ok(Base {
            value: "base".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Left {
    pub value: String,
}

impl Asset for Left {
    const KEY: &'static str = "left";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<Base>()]
    }

    async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        Ok(Left {
            value: format!("left({})", parents.get::<Base>()?.value),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Right {
    pub value: String,
}

impl Asset for Right {
    const KEY: &'static str = "right";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<Base>()]
    }

    async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        Ok(Right {
            value: format!("right({})", parents.get::<Base>()?.value),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Top {
    pub value: String,
}

impl Asset for Top {
    const KEY: &'static str = "top";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<Left>(), AssetId::of::<Right>()]
    }

    async fn generate(_ctx: &PipelineContext, parents: &Parents) -> Result<Self, PipelineError> {
        Ok(Top {
            value: format!(
                "top({},{})",
                parents.get::<Left>()?.value,
                parents.get::<Right>()?.value
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Broken;

impl Asset for Broken {
    const KEY: &'static str = "broken";

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Err(PipelineError::Custom("broken generator".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeedsBroken;

impl Asset for NeedsBroken {
    const KEY: &'static str = "needs-broken";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<Broken>()]
    }

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Ok(NeedsBroken)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AboveBroken;

impl Asset for AboveBroken {
    const KEY: &'static str = "above-broken";

    fn dependencies() -> Vec<AssetId> {
        vec![AssetId::of::<NeedsBroken>()]
    }

    async fn generate(_ctx: &PipelineContext, _parents: &Parents) -> Result<Self, PipelineError> {
        Ok(AboveBroken)
    }
}
