//! Resolves which data root(s) a command should read and write against,
//! based on the configured memory scope and the discovered git project root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Scope modes controlling which data root(s) participate in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    /// Prefer the project root, falling back to the global root if no
    /// project root is discoverable. Default.
    ProjectFallbackGlobal,
    /// Use only the project root. Requires a discoverable git root.
    ProjectOnly,
    /// Use only the global root, regardless of git discovery.
    GlobalOnly,
}

impl Default for MemoryScope {
    fn default() -> Self {
        MemoryScope::ProjectFallbackGlobal
    }
}

impl std::str::FromStr for MemoryScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project_fallback_global" => Ok(MemoryScope::ProjectFallbackGlobal),
            "project_only" => Ok(MemoryScope::ProjectOnly),
            "global_only" => Ok(MemoryScope::GlobalOnly),
            other => Err(format!("unknown memory scope '{other}'")),
        }
    }
}

/// Walks up from `path` looking for a `.git` entry. Returns the containing
/// directory, not the `.git` entry itself.
pub fn git_root_for(path: &Path) -> Option<PathBuf> {
    let mut current = if path.is_dir() {
        Some(path.to_path_buf())
    } else {
        path.parent().map(|p| p.to_path_buf())
    };
    while let Some(dir) = current {
        if dir.join(".git").exists() {
            return Some(dir);
        }
        current = dir.parent().map(|p| p.to_path_buf());
    }
    None
}

#[derive(Debug, Clone)]
pub struct ScopeResolution {
    pub project_root: Option<PathBuf>,
    pub project_data_dir: Option<PathBuf>,
    pub global_data_dir: PathBuf,
    pub ordered_data_dirs: Vec<PathBuf>,
}

/// Resolves the ordered list of data roots a session should read/write,
/// per the configured scope mode.
///
/// `project_dir_name` is the per-project data directory name (e.g.
/// `.lerim`), joined onto the discovered git root to form the project data
/// directory.
pub fn resolve_data_dirs(
    scope: MemoryScope,
    project_dir_name: &str,
    global_data_dir: &Path,
    repo_path: &Path,
) -> ScopeResolution {
    let project_root = git_root_for(repo_path);
    let project_data_dir = project_root.as_ref().map(|root| root.join(project_dir_name));

    let ordered_data_dirs = match (scope, &project_data_dir) {
        (MemoryScope::GlobalOnly, _) | (_, None) => vec![global_data_dir.to_path_buf()],
        (MemoryScope::ProjectOnly, Some(project_dir)) => vec![project_dir.clone()],
        (MemoryScope::ProjectFallbackGlobal, Some(project_dir)) => {
            dedup_paths(vec![project_dir.clone(), global_data_dir.to_path_buf()])
        }
    };

    ScopeResolution {
        project_root,
        project_data_dir,
        global_data_dir: global_data_dir.to_path_buf(),
        ordered_data_dirs,
    }
}

/// One directory the `project` CLI/API surface has been pointed at,
/// independent of whether it is currently the active working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedProject {
    pub name: String,
    pub path: String,
    pub added_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProjectRegistryData {
    #[serde(default)]
    projects: Vec<TrackedProject>,
}

/// Persisted list of tracked project directories, backing `project
/// {add|list|remove}` (§6). Mirrors `lerim_adapters::PlatformRegistry`'s
/// load/save-a-JSON-file shape; kept here rather than in the adapters
/// crate since it concerns project scope, not a session source.
#[derive(Clone)]
pub struct ProjectRegistry {
    path: PathBuf,
}

impl ProjectRegistry {
    pub fn new(path: PathBuf) -> Self {
        ProjectRegistry { path }
    }

    fn load(&self) -> ProjectRegistryData {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return ProjectRegistryData::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    fn save(&self, data: &ProjectRegistryData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, format!("{json}\n"))?;
        Ok(())
    }

    /// Adds (or re-adds, refreshing `added_at`) a project by path. The
    /// tracked name is the directory's basename.
    pub fn add(&self, path: &str) -> Result<TrackedProject> {
        let resolved = Path::new(path)
            .canonicalize()
            .unwrap_or_else(|_| PathBuf::from(path));
        let name = resolved
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(path)
            .to_string();
        let mut data = self.load();
        data.projects.retain(|p| p.name != name);
        let project = TrackedProject {
            name: name.clone(),
            path: resolved.to_string_lossy().into_owned(),
            added_at: chrono::Utc::now(),
        };
        data.projects.push(project.clone());
        self.save(&data)?;
        Ok(project)
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut data = self.load();
        let before = data.projects.len();
        data.projects.retain(|p| p.name != name);
        let removed = data.projects.len() != before;
        if removed {
            self.save(&data)?;
        }
        Ok(removed)
    }

    pub fn list(&self) -> Vec<TrackedProject> {
        let mut projects = self.load().projects;
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        projects
    }
}

fn dedup_paths(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let key = path.canonicalize().unwrap_or_else(|_| path.clone());
        if seen.insert(key) {
            out.push(path);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_git_repo() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        dir
    }

    #[test]
    fn git_root_for_walks_up_from_nested_path() {
        let dir = make_git_repo();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        assert_eq!(git_root_for(&nested), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn git_root_for_returns_none_outside_any_repo() {
        let dir = tempdir().unwrap();
        assert_eq!(git_root_for(dir.path()), None);
    }

    #[test]
    fn project_fallback_global_orders_project_then_global() {
        let repo = make_git_repo();
        let global = tempdir().unwrap();
        let resolution = resolve_data_dirs(
            MemoryScope::ProjectFallbackGlobal,
            ".lerim",
            global.path(),
            repo.path(),
        );
        assert_eq!(resolution.ordered_data_dirs.len(), 2);
        assert_eq!(resolution.ordered_data_dirs[0], repo.path().join(".lerim"));
        assert_eq!(resolution.ordered_data_dirs[1], global.path());
    }

    #[test]
    fn project_only_without_git_root_falls_back_to_global_list_shape() {
        let dir = tempdir().unwrap();
        let global = tempdir().unwrap();
        let resolution =
            resolve_data_dirs(MemoryScope::ProjectOnly, ".lerim", global.path(), dir.path());
        assert_eq!(resolution.ordered_data_dirs, vec![global.path().to_path_buf()]);
    }

    #[test]
    fn global_only_ignores_discoverable_project_root() {
        let repo = make_git_repo();
        let global = tempdir().unwrap();
        let resolution =
            resolve_data_dirs(MemoryScope::GlobalOnly, ".lerim", global.path(), repo.path());
        assert_eq!(resolution.ordered_data_dirs, vec![global.path().to_path_buf()]);
    }

    #[test]
    fn project_registry_add_then_remove_round_trips() {
        let registry_dir = tempdir().unwrap();
        let project_dir = tempdir().unwrap();
        let registry = ProjectRegistry::new(registry_dir.path().join("projects.json"));

        let added = registry.add(project_dir.path().to_str().unwrap()).unwrap();
        assert_eq!(registry.list().len(), 1);
        assert!(registry.remove(&added.name).unwrap());
        assert!(registry.list().is_empty());
        assert!(!registry.remove(&added.name).unwrap());
    }

    #[test]
    fn project_registry_re_add_refreshes_instead_of_duplicating() {
        let registry_dir = tempdir().unwrap();
        let project_dir = tempdir().unwrap();
        let registry = ProjectRegistry::new(registry_dir.path().join("projects.json"));

        registry.add(project_dir.path().to_str().unwrap()).unwrap();
        registry.add(project_dir.path().to_str().unwrap()).unwrap();
        assert_eq!(registry.list().len(), 1);
    }
}
