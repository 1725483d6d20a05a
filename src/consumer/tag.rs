//! Tag definitions and their resolution into concrete tags.
//!
//! A definition may carry URL references to manifest outputs. Resolution
//! walks the definition tree and asks a [`UrlResolver`] for every reference,
//! which is how both the consumer (real URLs) and the reference collector
//! (recording only) plug into the same traversal.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::ConsumerError;

/// HTML elements that never have a closing tag.
pub const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// One tag as declared in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDefinition {
    pub tag: String,
    #[serde(default)]
    pub attributes: IndexMap<String, AttributeDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChildDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_self_closing: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeDefinition {
    Flag(bool),
    Text(String),
    Url(UrlReference),
}

/// A logical reference to a manifest output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum UrlReference {
    Document {
        name: String,
        #[serde(default)]
        absolute: bool,
    },
    Image {
        name: String,
        size: String,
        #[serde(default)]
        absolute: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChildDefinition {
    Text(String),
    Tag(TagDefinition),
}

/// A tag with every URL reference substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedTag {
    pub attributes: IndexMap<String, AttributeValue>,
    pub children: Vec<ResolvedChild>,
    pub is_self_closing: bool,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolvedChild {
    Text(String),
    Tag(ResolvedTag),
}

/// Hooks invoked for every URL reference met during resolution.
pub trait UrlResolver {
    fn document_url(&mut self, name: &str) -> Result<String, ConsumerError>;

    fn absolute_document_url(&mut self, name: &str) -> Result<String, ConsumerError>;

    fn image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError>;

    fn absolute_image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError>;
}

/// Resolve definitions in order, substituting URLs through `resolver`.
pub fn resolve_tag_definitions<R>(
    resolver: &mut R,
    definitions: &[TagDefinition],
) -> Result<Vec<ResolvedTag>, ConsumerError>
where
    R: UrlResolver + ?Sized,
{
    definitions
        .iter()
        .map(|definition| resolve_tag(resolver, definition))
        .collect()
}

fn resolve_tag<R>(resolver: &mut R, definition: &TagDefinition) -> Result<ResolvedTag, ConsumerError>
where
    R: UrlResolver + ?Sized,
{
    let mut attributes = IndexMap::with_capacity(definition.attributes.len());
    for (name, value) in &definition.attributes {
        let resolved = match value {
            AttributeDefinition::Flag(flag) => AttributeValue::Flag(*flag),
            AttributeDefinition::Text(text) => AttributeValue::Text(text.clone()),
            AttributeDefinition::Url(reference) => {
                AttributeValue::Text(resolve_url(resolver, reference)?)
            }
        };
        attributes.insert(name.clone(), resolved);
    }

    let mut children = Vec::with_capacity(definition.children.len());
    for child in &definition.children {
        children.push(match child {
            ChildDefinition::Text(text) => ResolvedChild::Text(text.clone()),
            ChildDefinition::Tag(tag) => ResolvedChild::Tag(resolve_tag(resolver, tag)?),
        });
    }

    Ok(ResolvedTag {
        attributes,
        children,
        is_self_closing: definition
            .is_self_closing
            .unwrap_or_else(|| is_void_element(&definition.tag)),
        tag: definition.tag.clone(),
    })
}

fn resolve_url<R>(resolver: &mut R, reference: &UrlReference) -> Result<String, ConsumerError>
where
    R: UrlResolver + ?Sized,
{
    match reference {
        UrlReference::Document { name, absolute: false } => resolver.document_url(name),
        UrlReference::Document { name, absolute: true } => resolver.absolute_document_url(name),
        UrlReference::Image { name, size, absolute: false } => resolver.image_url(name, size),
        UrlReference::Image { name, size, absolute: true } => {
            resolver.absolute_image_url(name, size)
        }
    }
}

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}
