//! In-memory asset store shared by a compilation and its children.

use std::collections::BTreeMap;
use std::sync::Arc;

use arcstr::ArcStr;
use dashmap::DashMap;

/// Thread-safe map of output filename to asset bytes.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct AssetStore {
    assets: Arc<DashMap<ArcStr, Arc<[u8]>>>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an asset.
    pub fn insert(&self, name: impl Into<ArcStr>, source: impl Into<Arc<[u8]>>) {
        self.assets.insert(name.into(), source.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<[u8]>> {
        self.assets.get(name).map(|r| Arc::clone(r.value()))
    }

    /// The asset decoded as UTF-8, if present and valid.
    pub fn source_text(&self, name: &str) -> Option<String> {
        self.get(name)
            .and_then(|bytes| String::from_utf8(bytes.to_vec()).ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.assets.contains_key(name)
    }

    /// Remove an asset. Returns whether it was present.
    pub fn remove(&self, name: &str) -> bool {
        self.assets.remove(name).is_some()
    }

    /// Copy every asset of `other` into this store.
    pub fn extend_from(&self, other: &AssetStore) {
        for entry in other.assets.iter() {
            self.assets
                .insert(entry.key().clone(), Arc::clone(entry.value()));
        }
    }

    /// Sorted asset names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.assets.iter().map(|r| r.key().to_string()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Owned, ordered copy of the store contents.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.assets
            .iter()
            .map(|r| (r.key().to_string(), r.value().to_vec()))
            .collect()
    }
}
