//! Serde model of an Iconduit manifest.
//!
//! Only the sections the plugin reads are typed. Everything else is kept in
//! `extra` maps so a manifest survives `Consumer::transform` untouched.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::tag::TagDefinition;

/// A parsed Iconduit manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub urls: Urls,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub tag: TagSection,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Urls {
    /// Absolute URL that relative output URLs are resolved against.
    pub base: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    /// Document outputs keyed by output name.
    #[serde(default)]
    pub document: IndexMap<String, OutputDefinition>,
    /// Image outputs keyed by output name, then by size key.
    #[serde(default)]
    pub image: IndexMap<String, IndexMap<String, OutputDefinition>>,
}

/// Where a generated output lives on disk and where it is served from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDefinition {
    /// Path relative to the manifest's directory.
    pub path: String,
    pub url: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Tag definitions grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meta: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apple_touch_startup: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graph: Vec<TagDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub graph_image: Vec<TagDefinition>,
}

impl TagSection {
    /// Category names in injection order.
    pub const CATEGORIES: [&'static str; 6] = [
        "meta",
        "link",
        "icon",
        "appleTouchStartup",
        "graph",
        "graphImage",
    ];

    /// All definitions, concatenated in [`TagSection::CATEGORIES`] order.
    pub fn definitions(&self) -> impl Iterator<Item = &TagDefinition> {
        self.meta
            .iter()
            .chain(&self.link)
            .chain(&self.icon)
            .chain(&self.apple_touch_startup)
            .chain(&self.graph)
            .chain(&self.graph_image)
    }

    pub fn is_empty(&self) -> bool {
        self.definitions().next().is_none()
    }
}
