//! Log stores: per-run artifact persistence.
//!
//! Layout (filesystem impl):
//!
//! ```text
//! {logsRoot}/manifest.json          graph metadata
//! {logsRoot}/checkpoint.json        rewritten after every stage
//! {logsRoot}/<nodeId>/prompt.md     expanded codergen prompt
//! {logsRoot}/<nodeId>/response.md   raw backend response
//! {logsRoot}/<nodeId>/outcome.json  the handler's outcome
//! ```
//!
//! The store is append-only per node directory: concurrent node
//! directories are fine, concurrent writers to one file are not.
//! Checkpoints are written atomically (write-to-temp then rename).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::outcome::Outcome;

/// Graph metadata written at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub goal: String,
    pub node_count: usize,
    pub started_at: String,
}

/// Persistence contract for run artifacts.
pub trait LogStore: Send + Sync {
    fn write_manifest(&self, manifest: &Manifest) -> Result<()>;

    /// Write one named file into a node's directory.
    fn write_stage_file(&self, node_id: &str, name: &str, content: &str) -> Result<()>;

    fn write_outcome(&self, node_id: &str, outcome: &Outcome) -> Result<()> {
        let rendered = serde_json::to_string_pretty(outcome)?;
        self.write_stage_file(node_id, "outcome.json", &rendered)
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>>;

    /// A store scoped under this one, for nested pipeline runs.
    fn child(&self, name: &str) -> Arc<dyn LogStore>;
}

/// Filesystem-backed store rooted at one run directory.
pub struct FsLogStore {
    root: PathBuf,
}

impl FsLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.root.join("checkpoint.json")
    }

    fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}

impl LogStore for FsLogStore {
    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let rendered = serde_json::to_string_pretty(manifest)?;
        std::fs::write(self.root.join("manifest.json"), rendered)?;
        Ok(())
    }

    fn write_stage_file(&self, node_id: &str, name: &str, content: &str) -> Result<()> {
        let dir = self.root.join(node_id);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(name), content)?;
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let rendered = serde_json::to_string_pretty(checkpoint)?;
        self.write_atomic(&self.checkpoint_path(), &rendered)
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn child(&self, name: &str) -> Arc<dyn LogStore> {
        Arc::new(FsLogStore::new(self.root.join(name).join("sub")))
    }
}

/// In-memory store for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryLogStore {
    state: Arc<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    files: Mutex<BTreeMap<String, String>>,
    checkpoint: Mutex<Option<Checkpoint>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn scoped(state: Arc<MemoryState>) -> Self {
        Self { state }
    }

    /// A stored file's content, keyed `"<nodeId>/<name>"`.
    pub fn file(&self, key: &str) -> Option<String> {
        self.state.files.lock().unwrap().get(key).cloned()
    }

    pub fn file_keys(&self) -> Vec<String> {
        self.state.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.state.checkpoint.lock().unwrap().clone()
    }
}

impl Clone for MemoryLogStore {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl LogStore for MemoryLogStore {
    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let rendered = serde_json::to_string_pretty(manifest)?;
        self.state
            .files
            .lock()
            .unwrap()
            .insert("manifest.json".to_string(), rendered);
        Ok(())
    }

    fn write_stage_file(&self, node_id: &str, name: &str, content: &str) -> Result<()> {
        self.state
            .files
            .lock()
            .unwrap()
            .insert(format!("{node_id}/{name}"), content.to_string());
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        *self.state.checkpoint.lock().unwrap() = Some(checkpoint.clone());
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<Option<Checkpoint>> {
        Ok(self.state.checkpoint.lock().unwrap().clone())
    }

    fn child(&self, _name: &str) -> Arc<dyn LogStore> {
        // Children share the parent map; sub-run keys are distinguished
        // by node id collisions being acceptable in tests.
        Arc::new(MemoryLogStore::scoped(Arc::new(MemoryState::default())))
    }
}
