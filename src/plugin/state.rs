//! Per-build plugin state shared between the "make" and "emit" hooks.
//!
//! "make" records the name of the child compilation's artifact here; "emit"
//! takes it back out to delete the asset.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Thread-safe state handed from one build phase to the next.
#[derive(Debug, Clone, Default)]
pub struct BuildState {
    child_output: Arc<RwLock<Option<String>>>,
    file_dependencies: Arc<RwLock<Vec<PathBuf>>>,
}

impl BuildState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the child artifact of the current build. Returns the previous
    /// one if it was never taken.
    pub fn set_child_output(&self, name: String) -> Option<String> {
        let mut slot = self.child_output.write().expect("child output slot poisoned");
        slot.replace(name)
    }

    /// Take the child artifact name. Only the first call after
    /// [`BuildState::set_child_output`] returns it.
    pub fn take_child_output(&self) -> Option<String> {
        let mut slot = self.child_output.write().expect("child output slot poisoned");
        slot.take()
    }

    pub fn child_output(&self) -> Option<String> {
        let slot = self.child_output.read().expect("child output slot poisoned");
        slot.clone()
    }

    /// Replace the files the last child compilation read.
    pub fn set_file_dependencies(&self, files: Vec<PathBuf>) {
        let mut deps = self.file_dependencies.write().expect("dependency list poisoned");
        *deps = files;
    }

    pub fn file_dependencies(&self) -> Vec<PathBuf> {
        let deps = self.file_dependencies.read().expect("dependency list poisoned");
        deps.clone()
    }
}
