//! Build host interface.
//!
//! The plugin never talks to a concrete bundler. It sees the host through the
//! traits below: a [`Compilation`] it can spawn child compilers from, a
//! [`LoaderContext`] that resolves asset requests to emitted filenames, and
//! the HTML plugin's tag hook. [`local::LocalCompiler`] is an in-process
//! implementation of the whole contract.

pub mod asset_store;
pub mod local;

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arcstr::ArcStr;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::consumer::render::render_parts;
use crate::consumer::AttributeValue;
use crate::Diagnostic;

pub use asset_store::AssetStore;
pub use local::{BuildOutput, HtmlHookStyle, HtmlPluginConfig, LocalCompiler};

// ---------------------------------------------------------------------------
// Output configuration
// ---------------------------------------------------------------------------

/// The URL prefix under which the host serves build outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublicPath {
    /// Computed by the runtime; unknown at build time.
    #[default]
    Auto,
    Path(String),
}

impl PublicPath {
    /// The prefix when known at build time. `Auto` counts as empty.
    pub fn known(&self) -> Option<&str> {
        match self {
            PublicPath::Auto => None,
            PublicPath::Path(path) if path.is_empty() => None,
            PublicPath::Path(path) => Some(path),
        }
    }
}

impl From<&str> for PublicPath {
    fn from(path: &str) -> Self {
        if path == "auto" {
            PublicPath::Auto
        } else {
            PublicPath::Path(path.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOptions {
    /// Filename template, e.g. `[name].[contenthash].js`.
    pub filename: String,
    pub public_path: PublicPath,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            filename: "[name].js".into(),
            public_path: PublicPath::Auto,
        }
    }
}

// ---------------------------------------------------------------------------
// Compilation results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: usize,
    pub name: String,
    pub hash: String,
}

/// Build metadata of a loaded module.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildInfo {
    /// Filenames of the assets the module emitted.
    pub assets: Vec<ArcStr>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModule {
    pub request: String,
    pub resource: PathBuf,
    pub build_info: BuildInfo,
}

/// An error recorded by a compilation instead of aborting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    /// Underlying cause, when there is one.
    pub error: Option<String>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(error) => write!(f, "{}:\n{}", self.message, error),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChildCompilation {
    pub hash: String,
    pub errors: Vec<CompileError>,
    pub assets: AssetStore,
    /// Files the child build read, for watch invalidation.
    pub file_dependencies: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Loaders and child compilers
// ---------------------------------------------------------------------------

/// What a loader can ask of the host while transforming one module.
#[async_trait]
pub trait LoaderContext: Send + Sync {
    /// The file being transformed.
    fn resource_path(&self) -> &Path;

    fn cacheable(&self, flag: bool);

    fn add_dependency(&self, path: &Path);

    /// Build `request` through the host pipeline.
    async fn load_module(&self, request: &str) -> anyhow::Result<LoadedModule>;
}

/// Transforms a module's source into the code the host compiles.
#[async_trait]
pub trait Loader: Send + Sync + fmt::Debug {
    fn name(&self) -> Cow<'static, str>;

    async fn load(&self, ctx: &dyn LoaderContext, source: String) -> anyhow::Result<String>;
}

/// A single entry module for a child compiler.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub resource: PathBuf,
    pub loader: Arc<dyn Loader>,
    /// Chunk name.
    pub name: String,
}

#[async_trait]
pub trait ChildCompiler: Send {
    fn name(&self) -> &str;

    fn set_context(&mut self, context: PathBuf);

    fn add_entry(&mut self, entry: EntryRequest);

    /// Run to completion. Module failures land in `ChildCompilation::errors`;
    /// `Err` is reserved for the host itself failing.
    async fn run_as_child(&mut self) -> anyhow::Result<(Vec<Chunk>, ChildCompilation)>;
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

pub trait Compilation: Send {
    fn context(&self) -> &Path;

    fn output_options(&self) -> &OutputOptions;

    /// Spawn a child compiler sharing this compilation's context and caches.
    fn create_child_compiler(&self, name: &str, output: OutputOptions) -> Box<dyn ChildCompiler>;

    /// Interpolate an output filename template for `chunk`.
    fn asset_path(&self, template: &str, hash: &str, chunk: &Chunk) -> String;

    fn assets(&self) -> &AssetStore;

    /// Remove an emitted asset. Returns whether it existed.
    fn delete_asset(&mut self, name: &str) -> bool;

    /// The HTML plugin's tag hook, if the host has one.
    fn html_hooks(&mut self) -> Option<HtmlHookPoint<'_>>;

    fn report(&mut self, diagnostic: Diagnostic);
}

/// A plugin participating in the host's build lifecycle.
#[async_trait]
pub trait HostPlugin: Send + Sync {
    fn name(&self) -> Cow<'static, str>;

    /// Called once per compilation, before modules are sealed.
    async fn make(&self, _compilation: &mut dyn Compilation) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called after HTML is rendered, before assets are written.
    async fn emit(&self, _compilation: &mut dyn Compilation) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTML plugin hooks
// ---------------------------------------------------------------------------

/// Identifies one HTML plugin instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HtmlPluginId(pub String);

impl HtmlPluginId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for HtmlPluginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A tag as the current HTML plugin generation expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtmlTag {
    pub attributes: IndexMap<String, AttributeValue>,
    #[serde(rename = "innerHTML")]
    pub inner_html: String,
    pub tag_name: String,
    pub void_tag: bool,
}

impl HtmlTag {
    pub fn to_html(&self) -> String {
        render_parts(&self.tag_name, &self.attributes, &self.inner_html, self.void_tag)
    }
}

/// A tag as the legacy HTML plugin generation expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyHtmlTag {
    pub attributes: IndexMap<String, AttributeValue>,
    #[serde(rename = "innerHTML")]
    pub inner_html: String,
    pub tag_name: String,
    pub self_closing_tag: bool,
}

impl LegacyHtmlTag {
    pub fn to_html(&self) -> String {
        render_parts(
            &self.tag_name,
            &self.attributes,
            &self.inner_html,
            self.self_closing_tag,
        )
    }
}

/// Payload of the `alterAssetTagGroups` hook.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTagGroups {
    pub head_tags: Vec<HtmlTag>,
    pub body_tags: Vec<HtmlTag>,
    pub output_name: String,
    pub plugin: HtmlPluginId,
}

/// Payload of the legacy `htmlPluginAlterAssetTags` hook.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetTags {
    pub head: Vec<LegacyHtmlTag>,
    pub body: Vec<LegacyHtmlTag>,
    pub output_name: String,
    pub plugin: HtmlPluginId,
}

/// The tag hook a host exposes, by generation.
pub enum HtmlHookPoint<'a> {
    AlterAssetTagGroups(&'a mut WaterfallHook<AssetTagGroups>),
    AlterAssetTags(&'a mut WaterfallHook<AssetTags>),
}

#[async_trait]
pub trait TapHandler<T: Send + 'static>: Send + Sync {
    async fn call(&self, data: T) -> anyhow::Result<T>;
}

/// Async series waterfall: each tap receives the previous tap's output.
pub struct WaterfallHook<T: Send + 'static> {
    taps: Vec<(String, Arc<dyn TapHandler<T>>)>,
}

impl<T: Send + 'static> WaterfallHook<T> {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn tap(&mut self, name: impl Into<String>, handler: Arc<dyn TapHandler<T>>) {
        self.taps.push((name.into(), handler));
    }

    pub async fn call(&self, mut data: T) -> anyhow::Result<T> {
        for (name, handler) in &self.taps {
            tracing::trace!(tap = %name, "calling tag hook");
            data = handler.call(data).await?;
        }
        Ok(data)
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn tap_names(&self) -> impl Iterator<Item = &str> {
        self.taps.iter().map(|(name, _)| name.as_str())
    }
}

impl<T: Send + 'static> Default for WaterfallHook<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> fmt::Debug for WaterfallHook<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaterfallHook")
            .field("taps", &self.taps.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .finish()
    }
}
