//! In-process build host.
//!
//! `LocalCompiler` implements the host contract without an external bundler:
//! asset requests are read from disk and emitted under fingerprinted names,
//! child compilers run their entries through the entry's loader, and HTML
//! plugin instances render their templates after the tag hook has run.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context as _;
use arcstr::ArcStr;
use async_trait::async_trait;
use dashmap::DashMap;

use super::{
    AssetStore, AssetTagGroups, AssetTags, BuildInfo, ChildCompilation, ChildCompiler, Chunk,
    Compilation, CompileError, EntryRequest, HostPlugin, HtmlHookPoint, HtmlPluginId, HtmlTag,
    LegacyHtmlTag, LoadedModule, LoaderContext, OutputOptions, PublicPath, WaterfallHook,
};
use crate::utils::{self, PathData};
use crate::{Diagnostic, DiagnosticLevel};

/// Filename template for emitted asset modules.
pub const DEFAULT_ASSET_FILENAME: &str = "[name].[contenthash][ext]";

/// Which tag hook generation the host exposes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HtmlHookStyle {
    #[default]
    TagGroups,
    LegacyTags,
    /// No HTML plugin hooks at all.
    Unavailable,
}

/// One HTML plugin instance: renders `template` into `filename`.
#[derive(Debug, Clone)]
pub struct HtmlPluginConfig {
    pub id: HtmlPluginId,
    pub filename: String,
    pub template: String,
}

impl HtmlPluginConfig {
    pub fn new(
        id: impl Into<String>,
        filename: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            id: HtmlPluginId::new(id),
            filename: filename.into(),
            template: template.into(),
        }
    }
}

/// Everything a build produced.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub assets: BTreeMap<String, Vec<u8>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl BuildOutput {
    pub fn asset_text(&self, name: &str) -> Option<&str> {
        self.assets
            .get(name)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

// ---------------------------------------------------------------------------
// LocalCompiler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LocalCompiler {
    context: PathBuf,
    output: OutputOptions,
    asset_filename: String,
    plugins: Vec<Arc<dyn HostPlugin>>,
    html_plugins: Vec<HtmlPluginConfig>,
    hook_style: HtmlHookStyle,
}

impl fmt::Debug for LocalCompiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCompiler")
            .field("context", &self.context)
            .field("output", &self.output)
            .field(
                "plugins",
                &self.plugins.iter().map(|p| p.name()).collect::<Vec<_>>(),
            )
            .field("html_plugins", &self.html_plugins)
            .field("hook_style", &self.hook_style)
            .finish()
    }
}

impl LocalCompiler {
    pub fn new(context: impl Into<PathBuf>) -> Self {
        Self {
            context: context.into(),
            output: OutputOptions::default(),
            asset_filename: DEFAULT_ASSET_FILENAME.into(),
            plugins: Vec::new(),
            html_plugins: Vec::new(),
            hook_style: HtmlHookStyle::default(),
        }
    }

    pub fn with_output(mut self, output: OutputOptions) -> Self {
        self.output = output;
        self
    }

    pub fn with_public_path(mut self, public_path: impl Into<PublicPath>) -> Self {
        self.output.public_path = public_path.into();
        self
    }

    pub fn with_asset_filename(mut self, template: impl Into<String>) -> Self {
        self.asset_filename = template.into();
        self
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn HostPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_html_plugin(mut self, html: HtmlPluginConfig) -> Self {
        self.html_plugins.push(html);
        self
    }

    pub fn with_hook_style(mut self, style: HtmlHookStyle) -> Self {
        self.hook_style = style;
        self
    }

    pub fn context(&self) -> &Path {
        &self.context
    }

    /// Run one compilation: make, HTML rendering, emit.
    ///
    /// Assets are returned rather than written; callers decide where they go.
    pub async fn run(&self) -> anyhow::Result<BuildOutput> {
        let context = std::path::absolute(&self.context).with_context(|| {
            format!("Invalid build context: {}", self.context.display())
        })?;
        let graph = Arc::new(ModuleGraph::new(
            context.clone(),
            self.asset_filename.clone(),
        ));
        let mut compilation = LocalCompilation {
            context: context.clone(),
            output: self.output.clone(),
            assets: AssetStore::new(),
            graph,
            hook_style: self.hook_style,
            tag_groups: WaterfallHook::new(),
            legacy_tags: WaterfallHook::new(),
            diagnostics: Vec::new(),
        };

        compilation.report(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!("Build started in {}", context.display()),
            context: None,
        });

        for plugin in &self.plugins {
            tracing::debug!(plugin = %plugin.name(), "make");
            plugin.make(&mut compilation).await?;
        }

        for html in &self.html_plugins {
            let page = compilation.render_html(html).await?;
            compilation
                .assets
                .insert(html.filename.as_str(), page.into_bytes());
        }

        for plugin in &self.plugins {
            tracing::debug!(plugin = %plugin.name(), "emit");
            plugin.emit(&mut compilation).await?;
        }

        let assets = compilation.assets.snapshot();
        compilation.report(Diagnostic {
            level: DiagnosticLevel::Info,
            message: format!("Build complete: {} assets", assets.len()),
            context: None,
        });

        Ok(BuildOutput {
            assets,
            diagnostics: compilation.diagnostics,
        })
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

struct LocalCompilation {
    context: PathBuf,
    output: OutputOptions,
    assets: AssetStore,
    graph: Arc<ModuleGraph>,
    hook_style: HtmlHookStyle,
    tag_groups: WaterfallHook<AssetTagGroups>,
    legacy_tags: WaterfallHook<AssetTags>,
    diagnostics: Vec<Diagnostic>,
}

impl LocalCompilation {
    async fn render_html(&self, html: &HtmlPluginConfig) -> anyhow::Result<String> {
        let head: Vec<String> = match self.hook_style {
            HtmlHookStyle::TagGroups => {
                let data = AssetTagGroups {
                    head_tags: Vec::new(),
                    body_tags: Vec::new(),
                    output_name: html.filename.clone(),
                    plugin: html.id.clone(),
                };
                let data = self.tag_groups.call(data).await?;
                data.head_tags.iter().map(HtmlTag::to_html).collect()
            }
            HtmlHookStyle::LegacyTags => {
                let data = AssetTags {
                    head: Vec::new(),
                    body: Vec::new(),
                    output_name: html.filename.clone(),
                    plugin: html.id.clone(),
                };
                let data = self.legacy_tags.call(data).await?;
                data.head.iter().map(LegacyHtmlTag::to_html).collect()
            }
            HtmlHookStyle::Unavailable => Vec::new(),
        };

        Ok(utils::inject_head_tags(&html.template, &head))
    }
}

impl Compilation for LocalCompilation {
    fn context(&self) -> &Path {
        &self.context
    }

    fn output_options(&self) -> &OutputOptions {
        &self.output
    }

    fn create_child_compiler(&self, name: &str, output: OutputOptions) -> Box<dyn ChildCompiler> {
        Box::new(LocalChildCompiler {
            name: name.to_string(),
            context: self.context.clone(),
            output,
            entries: Vec::new(),
            graph: Arc::clone(&self.graph),
            parent_assets: self.assets.clone(),
        })
    }

    fn asset_path(&self, template: &str, hash: &str, chunk: &Chunk) -> String {
        chunk_asset_path(template, hash, chunk)
    }

    fn assets(&self) -> &AssetStore {
        &self.assets
    }

    fn delete_asset(&mut self, name: &str) -> bool {
        self.assets.remove(name)
    }

    fn html_hooks(&mut self) -> Option<HtmlHookPoint<'_>> {
        match self.hook_style {
            HtmlHookStyle::TagGroups => Some(HtmlHookPoint::AlterAssetTagGroups(&mut self.tag_groups)),
            HtmlHookStyle::LegacyTags => Some(HtmlHookPoint::AlterAssetTags(&mut self.legacy_tags)),
            HtmlHookStyle::Unavailable => None,
        }
    }

    fn report(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }
}

fn chunk_asset_path(template: &str, hash: &str, chunk: &Chunk) -> String {
    utils::interpolate_asset_path(
        template,
        &PathData {
            name: &chunk.name,
            id: Some(chunk.id),
            hash,
            chunk_hash: &chunk.hash,
            content_hash: &chunk.hash,
            ext: ".js",
        },
    )
}

// ---------------------------------------------------------------------------
// Module graph (shared by a compilation and its children)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct CachedModule {
    filename: ArcStr,
    source: Arc<[u8]>,
}

#[derive(Debug)]
struct ModuleGraph {
    context: PathBuf,
    asset_filename: String,
    cache: DashMap<PathBuf, CachedModule>,
}

impl ModuleGraph {
    fn new(context: PathBuf, asset_filename: String) -> Self {
        Self {
            context,
            asset_filename,
            cache: DashMap::new(),
        }
    }

    /// Resolve `request` against `base`, build it as an asset module and emit
    /// it into `assets`. Built modules are cached by resolved path.
    async fn load_module(
        &self,
        base: &Path,
        request: &str,
        assets: &AssetStore,
    ) -> anyhow::Result<LoadedModule> {
        let base = if base.as_os_str().is_empty() {
            self.context.as_path()
        } else {
            base
        };
        let resource = resolve_request(base, request);

        let cached = self.cache.get(&resource).map(|entry| entry.value().clone());
        let module = match cached {
            Some(module) => module,
            None => {
                let source = tokio::fs::read(&resource).await.with_context(|| {
                    format!(
                        "Module not found: Can't resolve '{request}' in '{}'",
                        base.display()
                    )
                })?;
                let filename = asset_filename_for(&self.asset_filename, &resource, &source);
                tracing::debug!(request, %filename, "built asset module");

                let module = CachedModule {
                    filename: ArcStr::from(filename),
                    source: Arc::from(source),
                };
                self.cache.insert(resource.clone(), module.clone());
                module
            }
        };

        assets.insert(module.filename.clone(), Arc::clone(&module.source));

        Ok(LoadedModule {
            request: request.to_string(),
            resource,
            build_info: BuildInfo {
                assets: vec![module.filename],
            },
        })
    }
}

fn resolve_request(base: &Path, request: &str) -> PathBuf {
    let path = Path::new(request);
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Output filename of an asset module built from `resource`.
pub fn asset_filename_for(template: &str, resource: &Path, source: &[u8]) -> String {
    let name = resource
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = resource
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let hash = utils::fingerprint(source);

    utils::interpolate_asset_path(
        template,
        &PathData {
            name: &name,
            id: None,
            hash: &hash,
            chunk_hash: &hash,
            content_hash: &hash,
            ext: &ext,
        },
    )
}

// ---------------------------------------------------------------------------
// Loader context
// ---------------------------------------------------------------------------

struct LocalLoaderContext {
    resource: PathBuf,
    graph: Arc<ModuleGraph>,
    assets: AssetStore,
    dependencies: Mutex<Vec<PathBuf>>,
}

impl LocalLoaderContext {
    fn new(resource: PathBuf, graph: Arc<ModuleGraph>, assets: AssetStore) -> Self {
        Self {
            resource,
            graph,
            assets,
            dependencies: Mutex::new(Vec::new()),
        }
    }

    fn take_dependencies(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.dependencies.lock().expect("dependency list poisoned"))
    }
}

#[async_trait]
impl LoaderContext for LocalLoaderContext {
    fn resource_path(&self) -> &Path {
        &self.resource
    }

    // Each run starts from an empty module graph, so there is no earlier
    // result to reuse.
    fn cacheable(&self, _flag: bool) {}

    fn add_dependency(&self, path: &Path) {
        self.dependencies
            .lock()
            .expect("dependency list poisoned")
            .push(path.to_path_buf());
    }

    async fn load_module(&self, request: &str) -> anyhow::Result<LoadedModule> {
        let base = self.resource.parent().unwrap_or_else(|| Path::new(""));
        self.graph.load_module(base, request, &self.assets).await
    }
}

// ---------------------------------------------------------------------------
// Child compiler
// ---------------------------------------------------------------------------

struct LocalChildCompiler {
    name: String,
    context: PathBuf,
    output: OutputOptions,
    entries: Vec<EntryRequest>,
    graph: Arc<ModuleGraph>,
    parent_assets: AssetStore,
}

#[async_trait]
impl ChildCompiler for LocalChildCompiler {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_context(&mut self, context: PathBuf) {
        self.context = context;
    }

    fn add_entry(&mut self, entry: EntryRequest) {
        self.entries.push(entry);
    }

    async fn run_as_child(&mut self) -> anyhow::Result<(Vec<Chunk>, ChildCompilation)> {
        let assets = AssetStore::new();
        let mut built: Vec<(Chunk, String)> = Vec::new();
        let mut errors = Vec::new();
        let mut file_dependencies = Vec::new();

        for (id, entry) in self.entries.iter().enumerate() {
            let resource = if entry.resource.is_absolute() {
                entry.resource.clone()
            } else {
                self.context.join(&entry.resource)
            };
            tracing::debug!(compiler = %self.name, resource = %resource.display(), "building child entry");
            file_dependencies.push(resource.clone());

            let source = match tokio::fs::read_to_string(&resource).await {
                Ok(source) => source,
                Err(e) => {
                    errors.push(
                        CompileError::new(format!(
                            "Module not found: Can't resolve '{}'",
                            resource.display()
                        ))
                        .with_error(e.to_string()),
                    );
                    continue;
                }
            };

            let ctx = LocalLoaderContext::new(resource, Arc::clone(&self.graph), assets.clone());
            let result = entry.loader.load(&ctx, source).await;
            file_dependencies.extend(ctx.take_dependencies());

            match result {
                Ok(code) => {
                    let chunk = Chunk {
                        id,
                        name: entry.name.clone(),
                        hash: utils::fingerprint(&code),
                    };
                    built.push((chunk, code));
                }
                Err(err) => errors.push(module_build_error(&entry.loader.name(), &err)),
            }
        }

        let hash = utils::fingerprint(
            built
                .iter()
                .map(|(chunk, _)| chunk.hash.as_str())
                .collect::<String>(),
        );

        let mut chunks = Vec::with_capacity(built.len());
        for (chunk, code) in built {
            let filename = chunk_asset_path(&self.output.filename, &hash, &chunk);
            assets.insert(filename, code.into_bytes());
            chunks.push(chunk);
        }

        file_dependencies.sort();
        file_dependencies.dedup();
        self.parent_assets.extend_from(&assets);

        Ok((
            chunks,
            ChildCompilation {
                hash,
                errors,
                assets,
                file_dependencies,
            },
        ))
    }
}

fn module_build_error(loader: &str, err: &anyhow::Error) -> CompileError {
    let error = CompileError::new(format!("Module build failed (from {loader}): {err}"));
    let causes: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
    if causes.is_empty() {
        error
    } else {
        error.with_error(causes.join(": "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Loader;
    use std::borrow::Cow;

    /// Loads every line of the entry as a request and emits the filenames.
    #[derive(Debug)]
    struct ListLoader;

    #[async_trait]
    impl Loader for ListLoader {
        fn name(&self) -> Cow<'static, str> {
            Cow::Borrowed("list-loader")
        }

        async fn load(&self, ctx: &dyn LoaderContext, source: String) -> anyhow::Result<String> {
            ctx.cacheable(true);
            let mut names = Vec::new();
            for request in source.lines().filter(|l| !l.is_empty()) {
                let module = ctx.load_module(request).await?;
                ctx.add_dependency(&module.resource);
                names.push(module.build_info.assets[0].to_string());
            }
            Ok(names.join(","))
        }
    }

    fn compilation(context: &Path) -> LocalCompilation {
        LocalCompilation {
            context: context.to_path_buf(),
            output: OutputOptions::default(),
            assets: AssetStore::new(),
            graph: Arc::new(ModuleGraph::new(
                context.to_path_buf(),
                DEFAULT_ASSET_FILENAME.into(),
            )),
            hook_style: HtmlHookStyle::TagGroups,
            tag_groups: WaterfallHook::new(),
            legacy_tags: WaterfallHook::new(),
            diagnostics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn load_module_emits_fingerprinted_asset() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("icon.png"), b"png").unwrap();

        let graph = ModuleGraph::new(dir.path().to_path_buf(), DEFAULT_ASSET_FILENAME.into());
        let assets = AssetStore::new();
        let module = graph.load_module(dir.path(), "./icon.png", &assets).await.unwrap();

        let expected = format!("icon.{}.png", utils::fingerprint(b"png"));
        assert_eq!(module.build_info.assets[0].as_str(), expected);
        assert_eq!(module.resource, dir.path().join("icon.png"));
        assert!(assets.contains(&expected));
    }

    #[tokio::test]
    async fn load_module_reuses_cache_across_stores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("icon.png");
        std::fs::write(&path, b"v1").unwrap();

        let graph = ModuleGraph::new(dir.path().to_path_buf(), DEFAULT_ASSET_FILENAME.into());
        let first = graph.load_module(dir.path(), "icon.png", &AssetStore::new()).await.unwrap();

        std::fs::write(&path, b"v2").unwrap();
        let other = AssetStore::new();
        let second = graph.load_module(dir.path(), "./icon.png", &other).await.unwrap();

        assert_eq!(first.build_info, second.build_info);
        assert_eq!(other.len(), 1);
    }

    #[tokio::test]
    async fn load_module_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let graph = ModuleGraph::new(dir.path().to_path_buf(), DEFAULT_ASSET_FILENAME.into());
        let err = graph
            .load_module(dir.path(), "./nope.png", &AssetStore::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Can't resolve './nope.png'"));
    }

    #[tokio::test]
    async fn child_compiler_builds_entry_and_merges_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::write(dir.path().join("entry.txt"), "a.png\n").unwrap();

        let compilation = compilation(dir.path());
        let mut child = compilation.create_child_compiler(
            "child",
            OutputOptions {
                filename: "[name]".into(),
                public_path: PublicPath::Auto,
            },
        );
        child.add_entry(EntryRequest {
            resource: PathBuf::from("entry.txt"),
            loader: Arc::new(ListLoader),
            name: "list".into(),
        });

        let (chunks, result) = child.run_as_child().await.unwrap();
        assert!(result.errors.is_empty());
        assert_eq!(chunks.len(), 1);

        let output_name = compilation.asset_path("[name]", &result.hash, &chunks[0]);
        assert_eq!(output_name, "list");

        let asset_name = format!("a.{}.png", utils::fingerprint(b"a"));
        assert_eq!(result.assets.source_text("list"), Some(asset_name.clone()));
        assert!(compilation.assets().contains("list"));
        assert!(compilation.assets().contains(&asset_name));
        assert!(result.file_dependencies.contains(&dir.path().join("a.png")));
    }

    #[tokio::test]
    async fn child_compiler_records_loader_failures() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("entry.txt"), "missing.png\n").unwrap();

        let compilation = compilation(dir.path());
        let mut child = compilation.create_child_compiler("child", OutputOptions::default());
        child.add_entry(EntryRequest {
            resource: PathBuf::from("entry.txt"),
            loader: Arc::new(ListLoader),
            name: "list".into(),
        });

        let (chunks, result) = child.run_as_child().await.unwrap();
        assert!(chunks.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0]
            .message
            .starts_with("Module build failed (from list-loader)"));
        assert!(result.errors[0].error.is_some());
    }

    #[tokio::test]
    async fn child_compiler_reports_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let compilation = compilation(dir.path());
        let mut child = compilation.create_child_compiler("child", OutputOptions::default());
        child.add_entry(EntryRequest {
            resource: PathBuf::from("nope.txt"),
            loader: Arc::new(ListLoader),
            name: "list".into(),
        });

        let (_, result) = child.run_as_child().await.unwrap();
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("nope.txt"));
    }

    #[test]
    fn html_hooks_follow_style() {
        let dir = tempfile::tempdir().unwrap();
        let mut compilation = compilation(dir.path());
        assert!(matches!(
            compilation.html_hooks(),
            Some(HtmlHookPoint::AlterAssetTagGroups(_))
        ));

        compilation.hook_style = HtmlHookStyle::LegacyTags;
        assert!(matches!(
            compilation.html_hooks(),
            Some(HtmlHookPoint::AlterAssetTags(_))
        ));

        compilation.hook_style = HtmlHookStyle::Unavailable;
        assert!(compilation.html_hooks().is_none());
    }

    #[tokio::test]
    async fn child_compiler_keeps_absolute_entry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"a").unwrap();
        std::fs::write(dir.path().join("entry.txt"), "a.png\n").unwrap();

        let compilation = compilation(dir.path());
        let mut child = compilation.create_child_compiler("child", OutputOptions::default());
        child.set_context(PathBuf::from("unrelated"));
        child.add_entry(EntryRequest {
            resource: dir.path().join("entry.txt"),
            loader: Arc::new(ListLoader),
            name: "list".into(),
        });

        let (chunks, result) = child.run_as_child().await.unwrap();
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn run_renders_html_plugins() {
        let dir = tempfile::tempdir().unwrap();
        let output = LocalCompiler::new(dir.path())
            .with_html_plugin(HtmlPluginConfig::new(
                "main",
                "index.html",
                "<html><head></head><body></body></html>",
            ))
            .run()
            .await
            .unwrap();

        assert_eq!(
            output.asset_text("index.html"),
            Some("<html><head></head><body></body></html>")
        );
        assert!(output
            .diagnostics
            .iter()
            .any(|d| d.message.starts_with("Build complete")));
    }
}
