//! Iconduit manifest consumer.
//!
//! Wraps a parsed [`Manifest`] and answers the questions the plugin asks of
//! it: where an output lives on disk, which URL it is served under, and what
//! a tag definition looks like once its URL references are substituted.

pub mod manifest;
pub mod render;
pub mod tag;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use url::Url;

pub use manifest::{Manifest, OutputDefinition, OutputSection, TagSection, Urls};
pub use render::render_tag;
pub use tag::{
    resolve_tag_definitions, AttributeDefinition, AttributeValue, ChildDefinition, ResolvedChild,
    ResolvedTag, TagDefinition, UrlReference, UrlResolver,
};

/// Errors raised while reading or resolving a manifest.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Unknown document output `{0}`")]
    UnknownDocument(String),

    #[error("Unknown image output `{0}`")]
    UnknownImage(String),

    #[error("Unknown size `{size}` for image output `{name}`")]
    UnknownImageSize { name: String, size: String },

    #[error("Cannot resolve `{url}` against base URL `{base}`")]
    InvalidUrl {
        base: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Invalid manifest: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error when reading `{0}`")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Read-only view over a manifest. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct Consumer {
    manifest: Arc<Manifest>,
    /// Directory that output paths are relative to.
    base_dir: PathBuf,
}

impl Consumer {
    pub fn new(manifest: Manifest, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest: Arc::new(manifest),
            base_dir: base_dir.into(),
        }
    }

    pub fn from_json(json: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConsumerError> {
        let manifest: Manifest = serde_json::from_str(json)?;
        Ok(Self::new(manifest, base_dir))
    }

    /// Load a manifest file. Output paths resolve against its directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConsumerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConsumerError::Io(path.to_path_buf(), e))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::from_json(&json, base_dir)
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Same manifest, output paths resolved against `base_dir`.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = base_dir.into();
        self
    }

    /// Every tag definition in category order.
    pub fn tag_definitions(&self) -> Vec<TagDefinition> {
        self.manifest.tag.definitions().cloned().collect()
    }

    pub fn document(&self, name: &str) -> Result<&OutputDefinition, ConsumerError> {
        self.manifest
            .output
            .document
            .get(name)
            .ok_or_else(|| ConsumerError::UnknownDocument(name.to_string()))
    }

    pub fn image(&self, name: &str, size: &str) -> Result<&OutputDefinition, ConsumerError> {
        let sizes = self
            .manifest
            .output
            .image
            .get(name)
            .ok_or_else(|| ConsumerError::UnknownImage(name.to_string()))?;

        sizes.get(size).ok_or_else(|| ConsumerError::UnknownImageSize {
            name: name.to_string(),
            size: size.to_string(),
        })
    }

    pub fn document_path(&self, name: &str) -> Result<PathBuf, ConsumerError> {
        Ok(self.base_dir.join(&self.document(name)?.path))
    }

    pub fn absolute_document_path(&self, name: &str) -> Result<PathBuf, ConsumerError> {
        let path = self.document_path(name)?;
        std::path::absolute(&path).map_err(|e| ConsumerError::Io(path, e))
    }

    pub fn image_path(&self, name: &str, size: &str) -> Result<PathBuf, ConsumerError> {
        Ok(self.base_dir.join(&self.image(name, size)?.path))
    }

    /// A new consumer over `f(manifest)`, sharing this one's base directory.
    pub fn transform<F>(&self, f: F) -> Consumer
    where
        F: FnOnce(Manifest) -> Manifest,
    {
        Self {
            manifest: Arc::new(f(Manifest::clone(&self.manifest))),
            base_dir: self.base_dir.clone(),
        }
    }

    pub fn resolve_tag_definitions(
        &self,
        definitions: &[TagDefinition],
    ) -> Result<Vec<ResolvedTag>, ConsumerError> {
        let mut resolver = self.clone();
        resolve_tag_definitions(&mut resolver, definitions)
    }

    fn absolute_url(&self, url: &str) -> Result<String, ConsumerError> {
        join_url(&self.manifest.urls.base, url)
    }
}

impl UrlResolver for Consumer {
    fn document_url(&mut self, name: &str) -> Result<String, ConsumerError> {
        Ok(self.document(name)?.url.clone())
    }

    fn absolute_document_url(&mut self, name: &str) -> Result<String, ConsumerError> {
        let url = self.document(name)?.url.clone();
        self.absolute_url(&url)
    }

    fn image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError> {
        Ok(self.image(name, size)?.url.clone())
    }

    fn absolute_image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError> {
        let url = self.image(name, size)?.url.clone();
        self.absolute_url(&url)
    }
}

/// An inline manifest. Output paths resolve against the build context.
impl<'de> Deserialize<'de> for Consumer {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Manifest::deserialize(deserializer).map(|manifest| Consumer::new(manifest, PathBuf::new()))
    }
}

/// Resolve `url` against `base` the way a browser would.
pub fn join_url(base: &str, url: &str) -> Result<String, ConsumerError> {
    let invalid = |source| ConsumerError::InvalidUrl {
        base: base.to_string(),
        url: url.to_string(),
        source,
    };
    let base_url = Url::parse(base).map_err(invalid)?;
    let joined = base_url.join(url).map_err(invalid)?;
    Ok(joined.to_string())
}
