//! Tag materialization.
//!
//! Once every referenced output has been built, the manifest's URLs are
//! rewritten to the emitted names, the tag definitions are resolved again and
//! the result is translated into the HTML plugin's tag shapes.

use indexmap::IndexMap;

use super::collector::{collect_references, image_key};
use crate::consumer::{render_tag, Consumer, ResolvedTag};
use crate::host::{HtmlTag, LegacyHtmlTag};
use crate::utils;
use crate::PluginError;

/// Emitted output name per reference key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceMapping {
    pub documents: IndexMap<String, String>,
    pub images: IndexMap<String, String>,
}

impl ReferenceMapping {
    pub fn contains(&self, key: &str) -> bool {
        self.documents.contains_key(key) || self.images.contains_key(key)
    }
}

/// A consumer whose mapped outputs are served from `public_path` under their
/// emitted names. Outputs missing from the mapping keep their URL.
///
/// `public_path` is used verbatim as a prefix.
pub fn augment_consumer(consumer: &Consumer, mapping: &ReferenceMapping, public_path: &str) -> Consumer {
    consumer.transform(|mut manifest| {
        for (name, output) in manifest.output.document.iter_mut() {
            if let Some(emitted) = mapping.documents.get(name) {
                output.url = format!("{public_path}{emitted}");
            }
        }

        for (name, sizes) in manifest.output.image.iter_mut() {
            for (size, output) in sizes.iter_mut() {
                if let Some(emitted) = mapping.images.get(&image_key(name, size)) {
                    output.url = format!("{public_path}{emitted}");
                }
            }
        }

        manifest
    })
}

/// Resolve the consumer's tags against the emitted outputs.
///
/// Fails before resolving anything if a referenced output has no mapping.
pub fn materialize(
    consumer: &Consumer,
    mapping: &ReferenceMapping,
    public_path: Option<&str>,
) -> Result<Vec<ResolvedTag>, PluginError> {
    let references = collect_references(consumer)?;
    if let Some(key) = references.keys().find(|key| !mapping.contains(key)) {
        return Err(PluginError::UnresolvedReference {
            key: key.to_string(),
        });
    }

    let public_path = utils::normalize_public_path(public_path);
    let augmented = augment_consumer(consumer, mapping, &public_path);
    let tags = augmented.resolve_tag_definitions(&augmented.tag_definitions())?;

    Ok(tags)
}

fn inner_html(tag: &ResolvedTag) -> String {
    tag.children.iter().map(render_tag).collect()
}

pub fn translate_tag(tag: &ResolvedTag) -> HtmlTag {
    HtmlTag {
        attributes: tag.attributes.clone(),
        inner_html: inner_html(tag),
        tag_name: tag.tag.clone(),
        void_tag: tag.is_self_closing,
    }
}

pub fn translate_legacy_tag(tag: &ResolvedTag) -> LegacyHtmlTag {
    LegacyHtmlTag {
        attributes: tag.attributes.clone(),
        inner_html: inner_html(tag),
        tag_name: tag.tag.clone(),
        self_closing_tag: tag.is_self_closing,
    }
}
