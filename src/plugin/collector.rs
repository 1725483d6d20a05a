//! Reference collection.
//!
//! Walks every tag definition of a manifest and records which outputs the
//! tags point at, keyed the way the reference mapping is keyed.

use std::path::PathBuf;

use indexmap::IndexMap;

use crate::consumer::{resolve_tag_definitions, Consumer, ConsumerError, UrlResolver};

/// Distinct outputs referenced by a manifest's tags, by reference key.
///
/// Values are the outputs' source paths on disk. Insertion order is the
/// order references are first met.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub documents: IndexMap<String, PathBuf>,
    pub images: IndexMap<String, PathBuf>,
}

impl References {
    pub fn len(&self) -> usize {
        self.documents.len() + self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.images.is_empty()
    }

    /// Every reference key, documents first.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.documents
            .keys()
            .chain(self.images.keys())
            .map(String::as_str)
    }
}

/// Reference key of one size of an image output.
pub fn image_key(name: &str, size: &str) -> String {
    format!("{name}${size}")
}

/// Collect every output referenced by the consumer's tag definitions.
pub fn collect_references(consumer: &Consumer) -> Result<References, ConsumerError> {
    let mut recorder = Recorder {
        consumer,
        references: References::default(),
    };
    resolve_tag_definitions(&mut recorder, &consumer.tag_definitions())?;
    Ok(recorder.references)
}

/// Records references instead of resolving them. Absolute and relative
/// references to the same output share one entry.
struct Recorder<'a> {
    consumer: &'a Consumer,
    references: References,
}

impl Recorder<'_> {
    fn record_document(&mut self, name: &str) -> Result<String, ConsumerError> {
        if !self.references.documents.contains_key(name) {
            let path = self.consumer.document_path(name)?;
            self.references.documents.insert(name.to_string(), path);
        }
        Ok(String::new())
    }

    fn record_image(&mut self, name: &str, size: &str) -> Result<String, ConsumerError> {
        let key = image_key(name, size);
        if !self.references.images.contains_key(&key) {
            let path = self.consumer.image_path(name, size)?;
            self.references.images.insert(key, path);
        }
        Ok(String::new())
    }
}

impl UrlResolver for Recorder<'_> {
    fn document_url(&mut self, name: &str) -> Result<String, ConsumerError> {
        self.record_document(name)
    }

    fn absolute_document_url(&mut self, name: &str) -> Result<String, ConsumerError> {
        self.record_document(name)
    }

    fn image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError> {
        self.record_image(name, size)
    }

    fn absolute_image_url(&mut self, name: &str, size: &str) -> Result<String, ConsumerError> {
        self.record_image(name, size)
    }
}
