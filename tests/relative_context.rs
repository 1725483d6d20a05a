//! Builds whose context is given relative to the working directory.
//!
//! Everything lives in one test: the working directory is process-wide.

use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;

use iconduit_html_plugin::utils::fingerprint;
use iconduit_html_plugin::{build_html, BuildPlan, Consumer, PluginOptions, PublicPath};

const TEMPLATE: &str = "<html><head></head><body></body></html>";

const MANIFEST: &str = r#"{
    "urls": {"base": "https://example.org/"},
    "output": {
        "document": {"iconduitManifest": {"path": "iconduit.manifest.json", "url": "iconduit.manifest.json"}},
        "image": {"icon": {"32": {"path": "img/icon.png", "url": "img/icon.png"}}}
    },
    "tag": {"icon": [{"tag": "link", "attributes": {"rel": "icon", "href": {"type": "image", "name": "icon", "size": "32"}}}]}
}"#;

/// Restores the working directory when dropped.
struct CwdGuard(PathBuf);

impl CwdGuard {
    fn enter(dir: &Path) -> Self {
        let previous = std::env::current_dir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        Self(previous)
    }
}

impl Drop for CwdGuard {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.0);
    }
}

fn plan(context: &str) -> BuildPlan {
    BuildPlan {
        public_path: PublicPath::from("/assets/"),
        ..BuildPlan::new(context, TEMPLATE)
    }
}

async fn html_for(context: &str, options: PluginOptions) -> String {
    match build_html(plan(context), options).await {
        Ok(result) => result.html,
        Err(err) => panic!("build with context {context:?} failed: {err}"),
    }
}

#[tokio::test]
async fn relative_contexts_resolve_like_absolute_ones() {
    let dir = tempfile::tempdir().unwrap();
    let dist = dir.path().join("site/dist");
    std::fs::create_dir_all(dist.join("img")).unwrap();
    std::fs::write(dist.join("iconduit.manifest.json"), MANIFEST).unwrap();
    std::fs::write(dist.join("img/icon.png"), b"icon").unwrap();

    let options = || PluginOptions::with_manifest_path("dist/iconduit.manifest.json");
    let expected = format!(
        "<html><head>    <link rel=\"icon\" href=\"/assets/icon.{}.png\">\n</head><body></body></html>",
        fingerprint(b"icon")
    );

    let absolute = html_for(dir.path().join("site").to_str().unwrap(), options()).await;
    assert_eq!(absolute, expected);

    {
        let _cwd = CwdGuard::enter(dir.path());
        assert_eq!(html_for("site", options()).await, expected);
        assert_eq!(html_for("./site", options()).await, expected);

        let consumer = Consumer::from_json(MANIFEST, "").unwrap();
        assert_eq!(
            html_for("site/dist", PluginOptions::with_consumer(consumer)).await,
            expected
        );
    }

    {
        let _cwd = CwdGuard::enter(&dir.path().join("site"));
        assert_eq!(html_for(".", options()).await, expected);
    }
}
