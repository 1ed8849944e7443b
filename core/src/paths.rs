//! Canonical on-disk layout for a Lerim data root.
//!
//! A data root (project or global) always has the same shape:
//!
//! ```text
//! <root>/
//!   memory/
//!     decisions/
//!     learnings/
//!     summaries/
//!     archived/
//!       decisions/
//!       learnings/
//!   index/
//!     sessions.sqlite3   (global root only)
//!     memories.sqlite3
//!   workspace/
//! ```

use std::path::{Path, PathBuf};

use crate::Result;

/// The three primitive folders that hold live (non-archived) memory files.
pub const PRIMITIVE_FOLDERS: [&str; 3] = ["decisions", "learnings", "summaries"];

/// The two primitive folders that can be archived.
pub const ARCHIVABLE_FOLDERS: [&str; 2] = ["decisions", "learnings"];

#[derive(Debug, Clone)]
pub struct MemoryPaths {
    pub root: PathBuf,
    pub memory_dir: PathBuf,
    pub index_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub memories_db_path: PathBuf,
}

impl MemoryPaths {
    pub fn decisions_dir(&self) -> PathBuf {
        self.memory_dir.join("decisions")
    }

    pub fn learnings_dir(&self) -> PathBuf {
        self.memory_dir.join("learnings")
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.memory_dir.join("summaries")
    }

    pub fn archived_dir(&self, folder: &str) -> PathBuf {
        self.memory_dir.join("archived").join(folder)
    }

    pub fn folder_for(&self, primitive_type: &str) -> Option<PathBuf> {
        match primitive_type {
            "decisions" => Some(self.decisions_dir()),
            "learnings" => Some(self.learnings_dir()),
            "summaries" => Some(self.summaries_dir()),
            _ => None,
        }
    }
}

pub fn build_memory_paths(root: &Path) -> MemoryPaths {
    let memory_dir = root.join("memory");
    let index_dir = root.join("index");
    MemoryPaths {
        root: root.to_path_buf(),
        memory_dir: memory_dir.clone(),
        index_dir: index_dir.clone(),
        workspace_dir: root.join("workspace"),
        memories_db_path: index_dir.join("memories.sqlite3"),
    }
}

/// Creates every directory a data root needs, idempotently.
pub fn ensure_memory_paths(root: &Path) -> Result<MemoryPaths> {
    let paths = build_memory_paths(root);
    for folder in PRIMITIVE_FOLDERS {
        std::fs::create_dir_all(paths.memory_dir.join(folder))?;
    }
    for folder in ARCHIVABLE_FOLDERS {
        std::fs::create_dir_all(paths.archived_dir(folder))?;
    }
    std::fs::create_dir_all(&paths.index_dir)?;
    std::fs::create_dir_all(&paths.workspace_dir)?;
    Ok(paths)
}

/// Recreates a data root from scratch. Used by test fixtures only; never
/// called from production code paths.
pub fn reset_memory_root(root: &Path) -> Result<MemoryPaths> {
    if root.exists() {
        std::fs::remove_dir_all(root)?;
    }
    ensure_memory_paths(root)
}

/// Returns the session catalog db path, always rooted at the global data
/// directory regardless of memory scope.
pub fn sessions_db_path(global_data_dir: &Path) -> PathBuf {
    global_data_dir.join("index").join("sessions.sqlite3")
}

/// Returns the platform registry path, always rooted at the global data
/// directory regardless of memory scope.
pub fn platforms_path(global_data_dir: &Path) -> PathBuf {
    global_data_dir.join("platforms.json")
}

/// Returns the tracked-project registry path, always rooted at the global
/// data directory regardless of memory scope.
pub fn projects_path(global_data_dir: &Path) -> PathBuf {
    global_data_dir.join("projects.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn ensure_memory_paths_creates_full_tree() {
        let dir = tempdir().unwrap();
        let paths = ensure_memory_paths(dir.path()).unwrap();
        assert!(paths.decisions_dir().is_dir());
        assert!(paths.learnings_dir().is_dir());
        assert!(paths.summaries_dir().is_dir());
        assert!(paths.archived_dir("decisions").is_dir());
        assert!(paths.archived_dir("learnings").is_dir());
        assert!(paths.index_dir.is_dir());
        assert!(paths.workspace_dir.is_dir());
    }

    #[test]
    fn ensure_memory_paths_is_idempotent() {
        let dir = tempdir().unwrap();
        ensure_memory_paths(dir.path()).unwrap();
        let paths = ensure_memory_paths(dir.path()).unwrap();
        assert!(paths.memory_dir.is_dir());
    }

    #[test]
    fn folder_for_rejects_unknown_primitive() {
        let dir = tempdir().unwrap();
        let paths = build_memory_paths(dir.path());
        assert!(paths.folder_for("decisions").is_some());
        assert!(paths.folder_for("bogus").is_none());
    }
}
