//! # Iconduit HTML Plugin
//!
//! Injects the tags described by an Iconduit manifest (meta, link and icon
//! references) into the HTML a bundler generates. Every asset the tags refer
//! to is built through a nested child compilation, so the URLs that end up in
//! the page are the same fingerprinted names the host emits.
//!
//! The plugin talks to the bundler only through the traits in [`host`].
//! [`host::LocalCompiler`] implements them in-process and backs
//! [`build_html`].

pub mod bundle;
pub mod consumer;
pub mod host;
pub mod plugin;
pub mod utils;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use consumer::{Consumer, ConsumerError};
pub use host::{HtmlHookStyle, HtmlPluginId, LocalCompiler, PublicPath};
pub use plugin::IconduitPlugin;

/// Name the plugin registers its hooks under.
pub const PLUGIN_NAME: &str = "IconduitWebpackHtmlPlugin";

/// Chunk name of the child entry when none is configured.
pub const DEFAULT_CHUNK_NAME: &str = "iconduit-webpack-plugin";

// ---------------------------------------------------------------------------
// Diagnostic
// ---------------------------------------------------------------------------

/// A structured diagnostic emitted during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticLevel {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// PluginOptions
// ---------------------------------------------------------------------------

/// Plugin configuration, as accepted from JSON.
///
/// Exactly one of `manifest_path` and `consumer` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PluginOptions {
    /// Manifest file, relative to the build context.
    pub manifest_path: Option<PathBuf>,
    /// An already loaded manifest.
    pub consumer: Option<Consumer>,
    /// Chunk name of the child entry. Defaults to [`DEFAULT_CHUNK_NAME`].
    /// When empty, the child compiler is named after the manifest path.
    pub chunk_name: Option<String>,
    /// Only inject into this HTML plugin instance.
    pub html_plugin: Option<HtmlPluginId>,
}

impl PluginOptions {
    pub fn with_manifest_path(path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn with_consumer(consumer: Consumer) -> Self {
        Self {
            consumer: Some(consumer),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| PluginError::Config(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), PluginError> {
        match (&self.manifest_path, &self.consumer) {
            (Some(_), Some(_)) => {
                return Err(PluginError::Config(
                    "`manifestPath` and `consumer` are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(PluginError::Config(
                    "one of `manifestPath` or `consumer` is required".into(),
                ))
            }
            (Some(path), None) if path.as_os_str().is_empty() => {
                return Err(PluginError::Config("`manifestPath` must not be empty".into()))
            }
            _ => {}
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BuildPlan
// ---------------------------------------------------------------------------

/// Describes WHAT to build: one HTML page in a build context.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    /// Build context; relative manifest paths resolve against it.
    pub context: PathBuf,
    /// HTML template the tags are injected into.
    pub template: String,
    /// Output name of the rendered page.
    pub html_filename: String,
    /// Which HTML plugin instance renders the page.
    pub html_plugin: HtmlPluginId,
    pub public_path: PublicPath,
    pub hook_style: HtmlHookStyle,
    /// Output directory. Defaults to `<context>/dist`.
    pub out_dir: Option<PathBuf>,
    /// Whether to write output files to disk.
    pub write_to_disk: bool,
}

impl BuildPlan {
    pub fn new(context: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            template: template.into(),
            html_filename: "index.html".into(),
            html_plugin: HtmlPluginId::new("html-webpack-plugin"),
            public_path: PublicPath::Auto,
            hook_style: HtmlHookStyle::TagGroups,
            out_dir: None,
            write_to_disk: false,
        }
    }
}

// ---------------------------------------------------------------------------
// BuildResult
// ---------------------------------------------------------------------------

/// The output of a successful build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    /// The rendered page.
    pub html: String,
    /// Every emitted asset, page included, by output name.
    pub assets: std::collections::BTreeMap<String, Vec<u8>>,
    /// Diagnostics collected during the build.
    pub diagnostics: Vec<Diagnostic>,
}

// ---------------------------------------------------------------------------
// PluginError
// ---------------------------------------------------------------------------

/// Errors that abort the build.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("Invalid options: {0}")]
    Config(String),

    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("Child compilation failed:\n{0}")]
    ChildCompilation(String),

    #[error("The build host exposes no HTML tag hook; an HTML plugin is required")]
    UnsupportedHtmlHost,

    #[error("No output was resolved for reference `{key}`")]
    UnresolvedReference { key: String },

    #[error("Failed to resolve asset `{request}`")]
    AssetResolution {
        request: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Child compilation produced no entry chunk")]
    NoChildEntry,

    #[error("Child compilation did not emit `{0}`")]
    MissingChildAsset(String),

    #[error("Build produced no `{0}`")]
    MissingOutput(String),

    #[error("Malformed child compilation result: {0}")]
    Extraction(#[source] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Host(#[from] anyhow::Error),
}

impl PluginError {
    /// Recover the typed error from a host boundary, where it travels as
    /// `anyhow::Error`.
    pub fn from_host(err: anyhow::Error) -> Self {
        match err.downcast::<PluginError>() {
            Ok(err) => err,
            Err(err) => PluginError::Host(err),
        }
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Render one HTML page with the Iconduit tags injected.
///
/// Runs the in-process host with an [`IconduitPlugin`] built from `options`:
/// 1. the plugin builds every referenced asset in a child compilation
/// 2. the page template is rendered with the resolved tags in its head
/// 3. the child compilation's own artifact is dropped from the output
pub async fn build_html(plan: BuildPlan, options: PluginOptions) -> Result<BuildResult, PluginError> {
    bundle::execute_build(plan, options).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_require_exactly_one_source() {
        let err = PluginOptions::default().validate().unwrap_err();
        assert!(matches!(err, PluginError::Config(_)));

        let both = PluginOptions {
            manifest_path: Some("a.json".into()),
            consumer: Some(Consumer::from_json(r#"{"urls":{"base":"https://x.org/"}}"#, "").unwrap()),
            ..Default::default()
        };
        assert!(both.validate().unwrap_err().to_string().contains("mutually exclusive"));

        assert!(PluginOptions::with_manifest_path("a.json").validate().is_ok());
    }

    #[test]
    fn options_reject_empty_manifest_path() {
        assert!(PluginOptions::with_manifest_path("").validate().is_err());

        let options = PluginOptions {
            chunk_name: Some(String::new()),
            ..PluginOptions::with_manifest_path("a.json")
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn options_from_json() {
        let options = PluginOptions::from_json(
            r#"{"manifestPath": "dist/iconduit.manifest.json", "chunkName": "icons", "htmlPlugin": "main"}"#,
        )
        .unwrap();
        assert_eq!(options.manifest_path, Some(PathBuf::from("dist/iconduit.manifest.json")));
        assert_eq!(options.chunk_name.as_deref(), Some("icons"));
        assert_eq!(options.html_plugin, Some(HtmlPluginId::new("main")));
    }

    #[test]
    fn options_reject_unknown_fields() {
        let err = PluginOptions::from_json(r#"{"manifestPath": "a.json", "extra": 1}"#).unwrap_err();
        assert!(matches!(err, PluginError::Config(msg) if msg.contains("extra")));
    }

    #[test]
    fn options_accept_inline_consumer() {
        let options = PluginOptions::from_json(
            r#"{"consumer": {"urls": {"base": "https://example.org/"}, "tag": {}}}"#,
        )
        .unwrap();
        let consumer = options.consumer.unwrap();
        assert_eq!(consumer.manifest().urls.base, "https://example.org/");
    }

    #[test]
    fn from_host_recovers_typed_error() {
        let err: anyhow::Error = PluginError::UnsupportedHtmlHost.into();
        assert!(matches!(PluginError::from_host(err), PluginError::UnsupportedHtmlHost));

        let other = PluginError::from_host(anyhow::anyhow!("disk on fire"));
        assert!(matches!(other, PluginError::Host(_)));
        assert_eq!(other.to_string(), "disk on fire");
    }
}
