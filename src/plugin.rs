//! IconduitPlugin - build host plugin that injects Iconduit manifest tags
//!
//! Implements the host plugin hooks to:
//! 1. Build every output referenced by the manifest's tags in a child
//!    compilation (`make`)
//! 2. Append the resolved tags to the HTML plugin's head tags
//! 3. Drop the child compilation's own artifact from the output (`emit`)

pub mod collector;
pub mod loader;
pub mod materializer;
pub mod state;

use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::{Consumer, ResolvedTag};
use crate::host::{
    AssetTagGroups, AssetTags, Compilation, EntryRequest, HostPlugin, HtmlHookPoint, HtmlPluginId,
    HtmlTag, LegacyHtmlTag, OutputOptions, TapHandler,
};
use crate::utils;
use crate::{Diagnostic, DiagnosticLevel, PluginError, PluginOptions, DEFAULT_CHUNK_NAME, PLUGIN_NAME};

use loader::{IconduitLoader, LoaderOptions};
use materializer::{translate_legacy_tag, translate_tag};
use state::BuildState;

/// Filename template of the child compilation's output.
pub const CHILD_FILENAME: &str = "[name]";

/// Document output under which a manifest lists itself.
pub const MANIFEST_DOCUMENT: &str = "iconduitManifest";

#[derive(Debug, Clone)]
enum ManifestSource {
    Path(PathBuf),
    Consumer(Consumer),
}

/// The Iconduit plugin for a build host.
#[derive(Debug, Clone)]
pub struct IconduitPlugin {
    source: ManifestSource,
    chunk_name: String,
    /// Only inject into this HTML plugin instance.
    html_plugin: Option<HtmlPluginId>,
    state: BuildState,
}

impl IconduitPlugin {
    /// Validate `options` and build the plugin. Nothing is registered with a
    /// host until the plugin's hooks run.
    pub fn new(options: PluginOptions) -> Result<Self, PluginError> {
        options.validate()?;

        let source = match options.consumer {
            Some(consumer) => ManifestSource::Consumer(consumer),
            None => ManifestSource::Path(options.manifest_path.unwrap_or_default()),
        };

        Ok(Self {
            source,
            chunk_name: options
                .chunk_name
                .unwrap_or_else(|| DEFAULT_CHUNK_NAME.to_string()),
            html_plugin: options.html_plugin,
            state: BuildState::new(),
        })
    }

    pub fn with_chunk_name(mut self, chunk_name: impl Into<String>) -> Self {
        self.chunk_name = chunk_name.into();
        self
    }

    pub fn with_html_plugin(mut self, id: HtmlPluginId) -> Self {
        self.html_plugin = Some(id);
        self
    }

    pub fn chunk_name(&self) -> &str {
        &self.chunk_name
    }

    /// Shared build state, for inspecting what the last build recorded.
    pub fn state(&self) -> &BuildState {
        &self.state
    }

    async fn handle_make(&self, compilation: &mut dyn Compilation) -> Result<(), PluginError> {
        if compilation.html_hooks().is_none() {
            return Err(PluginError::UnsupportedHtmlHost);
        }

        // Paths handed to the child build are absolute.
        let context = std::path::absolute(compilation.context())?;
        let (manifest_path, consumer) = match &self.source {
            ManifestSource::Path(path) => (context.join(path), None),
            ManifestSource::Consumer(consumer) => {
                let consumer = if consumer.base_dir().as_os_str().is_empty() {
                    consumer.clone().with_base_dir(&context)
                } else {
                    consumer.clone()
                };
                (consumer.absolute_document_path(MANIFEST_DOCUMENT)?, Some(consumer))
            }
        };

        let name = utils::child_compiler_name(&context, Some(self.chunk_name.as_str()), &manifest_path);
        let entry_name = match self.chunk_name.as_str() {
            "" => DEFAULT_CHUNK_NAME.to_string(),
            chunk_name => chunk_name.to_string(),
        };
        let public_path = compilation.output_options().public_path.clone();

        let mut entry_loader = IconduitLoader::new(LoaderOptions {
            public_path: public_path.known().map(str::to_string),
        });
        if let Some(consumer) = consumer {
            entry_loader = entry_loader.with_consumer(consumer);
        }

        let mut child = compilation.create_child_compiler(
            &name,
            OutputOptions {
                filename: CHILD_FILENAME.to_string(),
                public_path,
            },
        );
        child.set_context(context);
        child.add_entry(EntryRequest {
            resource: manifest_path.clone(),
            loader: Arc::new(entry_loader),
            name: entry_name,
        });

        tracing::debug!(compiler = %name, manifest = %manifest_path.display(), "running child compilation");
        let (chunks, child_compilation) = child.run_as_child().await.map_err(PluginError::from_host)?;

        if !child_compilation.errors.is_empty() {
            tracing::warn!(errors = child_compilation.errors.len(), "child compilation failed");
            return Err(PluginError::ChildCompilation(utils::format_child_errors(
                &child_compilation.errors,
            )));
        }

        let chunk = chunks.first().ok_or(PluginError::NoChildEntry)?;
        let output_name = compilation.asset_path(CHILD_FILENAME, &child_compilation.hash, chunk);
        let source = child_compilation
            .assets
            .source_text(&output_name)
            .ok_or_else(|| PluginError::MissingChildAsset(output_name.clone()))?;
        let tags = loader::extract_result(&source)?;

        self.state.set_child_output(output_name);
        self.state
            .set_file_dependencies(child_compilation.file_dependencies);

        tracing::info!(tags = tags.len(), "resolved Iconduit tags");
        compilation.report(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!("Resolved {} Iconduit tags", tags.len()),
            context: Some(manifest_path.display().to_string()),
        });

        self.register_injection(compilation, &tags)
    }

    fn register_injection(
        &self,
        compilation: &mut dyn Compilation,
        tags: &[ResolvedTag],
    ) -> Result<(), PluginError> {
        match compilation.html_hooks() {
            Some(HtmlHookPoint::AlterAssetTagGroups(hook)) => {
                let injector = TagGroupInjector {
                    tags: tags.iter().map(translate_tag).collect(),
                    html_plugin: self.html_plugin.clone(),
                };
                hook.tap(PLUGIN_NAME, Arc::new(injector));
            }
            Some(HtmlHookPoint::AlterAssetTags(hook)) => {
                let injector = LegacyTagInjector {
                    tags: tags.iter().map(translate_legacy_tag).collect(),
                    html_plugin: self.html_plugin.clone(),
                };
                hook.tap(PLUGIN_NAME, Arc::new(injector));
            }
            None => return Err(PluginError::UnsupportedHtmlHost),
        }
        Ok(())
    }

    fn handle_emit(&self, compilation: &mut dyn Compilation) {
        if let Some(name) = self.state.take_child_output() {
            if compilation.delete_asset(&name) {
                tracing::debug!(asset = %name, "removed child compilation artifact");
            }
        }
    }
}

#[async_trait]
impl HostPlugin for IconduitPlugin {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(PLUGIN_NAME)
    }

    async fn make(&self, compilation: &mut dyn Compilation) -> anyhow::Result<()> {
        self.handle_make(compilation).await?;
        Ok(())
    }

    async fn emit(&self, compilation: &mut dyn Compilation) -> anyhow::Result<()> {
        self.handle_emit(compilation);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tag injection
// ---------------------------------------------------------------------------

fn targets(filter: &Option<HtmlPluginId>, plugin: &HtmlPluginId) -> bool {
    filter.as_ref().map_or(true, |id| id == plugin)
}

/// Appends tags to `headTags` of the current HTML plugin generation.
struct TagGroupInjector {
    tags: Vec<HtmlTag>,
    html_plugin: Option<HtmlPluginId>,
}

#[async_trait]
impl TapHandler<AssetTagGroups> for TagGroupInjector {
    async fn call(&self, mut data: AssetTagGroups) -> anyhow::Result<AssetTagGroups> {
        if targets(&self.html_plugin, &data.plugin) {
            data.head_tags.extend(self.tags.iter().cloned());
        }
        Ok(data)
    }
}

/// Appends tags to `head` of the legacy HTML plugin generation.
struct LegacyTagInjector {
    tags: Vec<LegacyHtmlTag>,
    html_plugin: Option<HtmlPluginId>,
}

#[async_trait]
impl TapHandler<AssetTags> for LegacyTagInjector {
    async fn call(&self, mut data: AssetTags) -> anyhow::Result<AssetTags> {
        if targets(&self.html_plugin, &data.plugin) {
            data.head.extend(self.tags.iter().cloned());
        }
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn html_tag(name: &str) -> HtmlTag {
        HtmlTag {
            attributes: IndexMap::new(),
            inner_html: String::new(),
            tag_name: name.into(),
            void_tag: true,
        }
    }

    fn groups(plugin: &str) -> AssetTagGroups {
        AssetTagGroups {
            head_tags: vec![html_tag("title")],
            body_tags: Vec::new(),
            output_name: "index.html".into(),
            plugin: HtmlPluginId::new(plugin),
        }
    }

    #[test]
    fn new_rejects_invalid_options() {
        assert!(matches!(
            IconduitPlugin::new(PluginOptions::default()),
            Err(PluginError::Config(_))
        ));
    }

    #[test]
    fn new_applies_default_chunk_name() {
        let plugin = IconduitPlugin::new(PluginOptions::with_manifest_path("m.json")).unwrap();
        assert_eq!(plugin.chunk_name(), DEFAULT_CHUNK_NAME);
        assert_eq!(plugin.with_chunk_name("icons").chunk_name(), "icons");
    }

    #[test]
    fn new_accepts_empty_chunk_name() {
        let options = PluginOptions {
            chunk_name: Some(String::new()),
            ..PluginOptions::with_manifest_path("m.json")
        };
        assert_eq!(IconduitPlugin::new(options).unwrap().chunk_name(), "");
    }

    #[test]
    fn registers_under_webpack_plugin_name() {
        let plugin = IconduitPlugin::new(PluginOptions::with_manifest_path("m.json")).unwrap();
        assert_eq!(plugin.name(), "IconduitWebpackHtmlPlugin");
        assert_eq!(loader::LOADER_NAME, "iconduit-webpack-plugin loader");
    }

    #[tokio::test]
    async fn injector_appends_after_existing_tags() {
        let injector = TagGroupInjector {
            tags: vec![html_tag("meta"), html_tag("link")],
            html_plugin: None,
        };

        let data = injector.call(groups("any")).await.unwrap();
        let names: Vec<_> = data.head_tags.iter().map(|t| t.tag_name.as_str()).collect();
        assert_eq!(names, vec!["title", "meta", "link"]);
    }

    #[tokio::test]
    async fn injector_leaves_other_instances_unchanged() {
        let injector = TagGroupInjector {
            tags: vec![html_tag("meta")],
            html_plugin: Some(HtmlPluginId::new("a")),
        };

        let untouched = groups("b");
        assert_eq!(injector.call(untouched.clone()).await.unwrap(), untouched);
        assert_eq!(injector.call(groups("a")).await.unwrap().head_tags.len(), 2);
    }

    #[tokio::test]
    async fn legacy_injector_appends_to_head() {
        let injector = LegacyTagInjector {
            tags: vec![LegacyHtmlTag {
                attributes: IndexMap::new(),
                inner_html: String::new(),
                tag_name: "meta".into(),
                self_closing_tag: true,
            }],
            html_plugin: None,
        };
        let data = AssetTags {
            head: Vec::new(),
            body: Vec::new(),
            output_name: "index.html".into(),
            plugin: HtmlPluginId::new("x"),
        };

        let data = injector.call(data).await.unwrap();
        assert_eq!(data.head.len(), 1);
        assert!(data.body.is_empty());
    }
}
