//! Loader for the child compilation's entry.
//!
//! The entry module is the manifest itself. The loader collects its
//! references, builds every referenced file through the host, resolves the
//! tags against the emitted names and hands them back to the plugin as a
//! JSON document. The plugin only ever parses that document.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use super::collector::{collect_references, References};
use super::materializer::{materialize, ReferenceMapping};
use crate::consumer::{Consumer, ResolvedTag};
use crate::host::{Loader, LoaderContext};
use crate::utils;
use crate::PluginError;

pub const LOADER_NAME: &str = "iconduit-webpack-plugin loader";

/// Key of the child artifact that carries the resolved tags.
pub const RESULT_SLOT: &str = "__iconduit_result";

/// Options the plugin passes to the loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoaderOptions {
    /// Prefix for emitted asset URLs. Absent when the host computes it at
    /// runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_path: Option<String>,
}

impl LoaderOptions {
    pub fn from_json(json: &str) -> Result<Self, PluginError> {
        serde_json::from_str(json).map_err(|e| PluginError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct IconduitLoader {
    options: LoaderOptions,
    /// Used instead of parsing the entry source when set.
    consumer: Option<Consumer>,
}

impl IconduitLoader {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            options,
            consumer: None,
        }
    }

    pub fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumer = Some(consumer);
        self
    }

    fn consumer_for(&self, ctx: &dyn LoaderContext, source: &str) -> Result<Consumer, PluginError> {
        match &self.consumer {
            Some(consumer) => Ok(consumer.clone()),
            None => {
                let base_dir = ctx
                    .resource_path()
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                Ok(Consumer::from_json(source, base_dir)?)
            }
        }
    }
}

#[async_trait]
impl Loader for IconduitLoader {
    fn name(&self) -> Cow<'static, str> {
        Cow::Borrowed(LOADER_NAME)
    }

    async fn load(&self, ctx: &dyn LoaderContext, source: String) -> anyhow::Result<String> {
        ctx.cacheable(true);

        let consumer = self.consumer_for(ctx, &source)?;
        let references = collect_references(&consumer).map_err(PluginError::from)?;
        tracing::debug!(
            resource = %ctx.resource_path().display(),
            documents = references.documents.len(),
            images = references.images.len(),
            "collected references"
        );

        let mapping = load_assets(ctx, &references).await?;
        let tags = materialize(&consumer, &mapping, self.options.public_path.as_deref())?;

        Ok(encode_result(&tags)?)
    }
}

// ---------------------------------------------------------------------------
// Asset resolution
// ---------------------------------------------------------------------------

/// Build every referenced file and map each reference to its emitted name.
///
/// One request is issued per distinct source path, all at once. The first
/// failure fails the whole mapping.
pub async fn load_assets(
    ctx: &dyn LoaderContext,
    references: &References,
) -> Result<ReferenceMapping, PluginError> {
    let paths: IndexSet<&Path> = references
        .documents
        .values()
        .chain(references.images.values())
        .map(PathBuf::as_path)
        .collect();

    for path in &paths {
        ctx.add_dependency(path);
    }

    let emitted = try_join_all(paths.iter().map(|path| load_asset(ctx, path))).await?;
    let by_path: HashMap<&Path, String> = paths.into_iter().zip(emitted).collect();

    let lookup = |entries: &IndexMap<String, PathBuf>| -> Result<IndexMap<String, String>, PluginError> {
        entries
            .iter()
            .map(|(key, path)| {
                by_path
                    .get(path.as_path())
                    .map(|name| (key.clone(), name.clone()))
                    .ok_or_else(|| PluginError::UnresolvedReference { key: key.clone() })
            })
            .collect()
    };

    Ok(ReferenceMapping {
        documents: lookup(&references.documents)?,
        images: lookup(&references.images)?,
    })
}

async fn load_asset(ctx: &dyn LoaderContext, path: &Path) -> Result<String, PluginError> {
    let request = utils::path_to_request(path);
    let module = ctx
        .load_module(&request)
        .await
        .map_err(|source| PluginError::AssetResolution {
            request: request.clone(),
            source,
        })?;

    match module.build_info.assets.first() {
        Some(name) => Ok(name.to_string()),
        None => Err(PluginError::AssetResolution {
            request,
            source: anyhow::anyhow!("module emitted no asset"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Child artifact
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct ChildResult {
    #[serde(rename = "__iconduit_result")]
    tags: Vec<ResolvedTag>,
}

/// Serialize resolved tags into the child artifact.
pub fn encode_result(tags: &[ResolvedTag]) -> Result<String, PluginError> {
    let result = ChildResult {
        tags: tags.to_vec(),
    };
    serde_json::to_string(&result).map_err(PluginError::Extraction)
}

/// Read resolved tags back out of the child artifact.
pub fn extract_result(source: &str) -> Result<Vec<ResolvedTag>, PluginError> {
    let result: ChildResult = serde_json::from_str(source).map_err(PluginError::Extraction)?;
    Ok(result.tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{BuildInfo, LoadedModule};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Emits `<file name>.out` for every request except those containing
    /// "missing".
    #[derive(Default)]
    struct FakeContext {
        requests: AtomicUsize,
        cacheable: AtomicBool,
        dependencies: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl LoaderContext for FakeContext {
        fn resource_path(&self) -> &Path {
            Path::new("/site/dist/iconduit.manifest.json")
        }

        fn cacheable(&self, flag: bool) {
            self.cacheable.store(flag, Ordering::SeqCst);
        }

        fn add_dependency(&self, path: &Path) {
            self.dependencies.lock().unwrap().push(path.to_path_buf());
        }

        async fn load_module(&self, request: &str) -> anyhow::Result<LoadedModule> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if request.contains("missing") {
                anyhow::bail!("Module not found: {request}");
            }
            let name = Path::new(request).file_name().unwrap().to_string_lossy();
            Ok(LoadedModule {
                request: request.to_string(),
                resource: PathBuf::from(request),
                build_info: BuildInfo {
                    assets: vec![format!("{name}.out").into()],
                },
            })
        }
    }

    const MANIFEST: &str = r#"{
        "urls": {"base": "https://example.org/"},
        "output": {
            "image": {"icon": {
                "16": {"path": "icon-16.png", "url": "icon-16.png"},
                "32": {"path": "icon-32.png", "url": "icon-32.png"},
                "alias": {"path": "icon-32.png", "url": "icon-32.png"}
            }}
        },
        "tag": {
            "icon": [
                {"tag": "link", "attributes": {"rel": "icon", "href": {"type": "image", "name": "icon", "size": "32"}}},
                {"tag": "link", "attributes": {"rel": "icon", "href": {"type": "image", "name": "icon", "size": "16"}}},
                {"tag": "link", "attributes": {"rel": "alternate icon", "href": {"type": "image", "name": "icon", "size": "alias"}}}
            ]
        }
    }"#;

    #[tokio::test]
    async fn load_assets_requests_each_path_once() {
        let ctx = FakeContext::default();
        let consumer = Consumer::from_json(MANIFEST, "/site/dist").unwrap();
        let references = collect_references(&consumer).unwrap();

        let mapping = load_assets(&ctx, &references).await.unwrap();

        assert_eq!(ctx.requests.load(Ordering::SeqCst), 2);
        assert_eq!(mapping.images["icon$32"], "icon-32.png.out");
        assert_eq!(mapping.images["icon$alias"], "icon-32.png.out");
        assert_eq!(mapping.images["icon$16"], "icon-16.png.out");
        assert_eq!(ctx.dependencies.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn load_assets_fails_on_any_request() {
        let ctx = FakeContext::default();
        let mut references = References::default();
        references.images.insert("a$1".into(), PathBuf::from("/x/a.png"));
        references.images.insert("b$1".into(), PathBuf::from("/x/missing.png"));

        let err = load_assets(&ctx, &references).await.unwrap_err();
        assert!(matches!(err, PluginError::AssetResolution { ref request, .. } if request == "/x/missing.png"));
    }

    #[tokio::test]
    async fn loader_emits_result_document() {
        let ctx = FakeContext::default();
        let loader = IconduitLoader::new(LoaderOptions {
            public_path: Some("/assets/".into()),
        });

        let code = loader.load(&ctx, MANIFEST.to_string()).await.unwrap();
        let tags = extract_result(&code).unwrap();

        assert!(ctx.cacheable.load(Ordering::SeqCst));
        assert_eq!(tags.len(), 3);
        assert_eq!(
            tags[0].attributes["href"],
            crate::consumer::AttributeValue::Text("/assets/icon-32.png.out".into())
        );
        assert!(code.starts_with(&format!("{{\"{RESULT_SLOT}\"")));
    }

    #[tokio::test]
    async fn loader_rejects_invalid_manifest() {
        let ctx = FakeContext::default();
        let loader = IconduitLoader::new(LoaderOptions::default());
        let err = loader.load(&ctx, "not json".into()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PluginError>(),
            Some(PluginError::Consumer(_))
        ));
    }

    #[test]
    fn loader_options_reject_unknown_fields() {
        assert_eq!(
            LoaderOptions::from_json(r#"{"publicPath": "/a/"}"#).unwrap().public_path.as_deref(),
            Some("/a/")
        );
        assert!(LoaderOptions::from_json(r#"{"publicPath": "/a/", "x": 1}"#).is_err());
    }

    #[test]
    fn extract_rejects_other_documents() {
        assert!(matches!(
            extract_result(r#"{"something": []}"#),
            Err(PluginError::Extraction(_))
        ));
        assert!(extract_result(r#"{"__iconduit_result": []}"#).unwrap().is_empty());
    }
}
