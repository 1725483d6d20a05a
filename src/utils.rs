//! Utility functions for the plugin and the local host.
//!
//! - Public path normalization
//! - Child compiler naming and error aggregation
//! - Output filename templates and content fingerprints
//! - HTML head injection

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

use crate::host::CompileError;

// ---------------------------------------------------------------------------
// Public path
// ---------------------------------------------------------------------------

/// Normalize a public path so it can prefix a filename directly.
/// Missing or empty paths become `""`; anything else ends with `/`.
pub fn normalize_public_path(public_path: Option<&str>) -> String {
    match public_path {
        None | Some("") => String::new(),
        Some(path) if path.ends_with('/') => path.to_string(),
        Some(path) => format!("{path}/"),
    }
}

// ---------------------------------------------------------------------------
// Child compilation
// ---------------------------------------------------------------------------

/// Name of the child compiler, used in host diagnostics. Without a chunk
/// name it is the manifest path, relative to `context` when inside it.
pub fn child_compiler_name(context: &Path, chunk_name: Option<&str>, manifest_path: &Path) -> String {
    if let Some(chunk_name) = chunk_name.filter(|name| !name.is_empty()) {
        return format!("iconduit-webpack-plugin for {chunk_name}");
    }

    let absolute = context.join(manifest_path);
    let shortest = match absolute.strip_prefix(context) {
        Ok(relative) if !relative.as_os_str().is_empty() => relative,
        _ => absolute.as_path(),
    };
    let quoted = serde_json::Value::from(shortest.to_string_lossy().as_ref()).to_string();

    format!("iconduit-webpack-plugin for {quoted}")
}

/// Join child compilation errors into one message body, one per line.
pub fn format_child_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Turn a filesystem path into a module request. Relative paths gain `./`
/// so they are not mistaken for package names.
pub fn path_to_request(path: &Path) -> String {
    let request = path.to_string_lossy().replace('\\', "/");
    if path.is_absolute() || request.starts_with("./") || request.starts_with("../") {
        request
    } else {
        format!("./{request}")
    }
}

// ---------------------------------------------------------------------------
// Output filenames
// ---------------------------------------------------------------------------

/// Number of hex characters kept from a content digest.
pub const FINGERPRINT_LEN: usize = 8;

/// Short SHA-256 fingerprint of `bytes`.
pub fn fingerprint(bytes: impl AsRef<[u8]>) -> String {
    let digest = hex::encode(Sha256::digest(bytes.as_ref()));
    digest[..FINGERPRINT_LEN].to_string()
}

/// Values available to a filename template.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathData<'a> {
    pub name: &'a str,
    pub id: Option<usize>,
    pub hash: &'a str,
    pub chunk_hash: &'a str,
    pub content_hash: &'a str,
    /// Extension including the leading dot.
    pub ext: &'a str,
}

static PATH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(name|id|hash|chunkhash|contenthash|ext)(?::(\d+))?\]")
        .expect("valid filename token pattern")
});

/// Interpolate `[name]`, `[id]`, `[hash]`, `[chunkhash]`, `[contenthash]` and
/// `[ext]` in a filename template. Hash tokens accept a `:N` length suffix.
pub fn interpolate_asset_path(template: &str, data: &PathData<'_>) -> String {
    PATH_TOKEN
        .replace_all(template, |caps: &Captures<'_>| {
            let value = match &caps[1] {
                "name" => data.name.to_string(),
                "id" => data
                    .id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| data.name.to_string()),
                "hash" => data.hash.to_string(),
                "chunkhash" => data.chunk_hash.to_string(),
                "contenthash" => data.content_hash.to_string(),
                "ext" => data.ext.to_string(),
                _ => caps[0].to_string(),
            };
            match caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok()) {
                Some(len) => value.chars().take(len).collect(),
                None => value,
            }
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// HTML
// ---------------------------------------------------------------------------

/// Insert rendered tags before `</head>`, one per line. Without a head
/// element the tags are prepended.
pub fn inject_head_tags(html: &str, tags: &[String]) -> String {
    if tags.is_empty() {
        return html.to_string();
    }

    let injection: String = tags.iter().map(|tag| format!("    {tag}\n")).collect();

    match html.to_ascii_lowercase().find("</head>") {
        Some(pos) => {
            let mut out = String::with_capacity(html.len() + injection.len());
            out.push_str(&html[..pos]);
            out.push_str(&injection);
            out.push_str(&html[pos..]);
            out
        }
        None => format!("{injection}{html}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
