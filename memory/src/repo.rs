//! High-level operations over a data root's `memory/` tree: listing,
//! reading, archiving. The runtime agent's tool surface writes memory
//! files directly (see `lerim_runtime::tools`); this repository is the
//! path the HTTP API and the maintain pipeline use to read that same tree
//! back out without duplicating path-layout knowledge.

use std::path::{Path, PathBuf};

use lerim_core::paths::MemoryPaths;

use crate::primitive::{MemoryPrimitive, PrimitiveType, SummaryRecord};
use crate::{LerimError, Result};

/// One file found while listing a memory folder, paired with its
/// repo-relative id (used as the `memory_id` key for access tracking).
#[derive(Debug, Clone)]
pub struct MemoryRepoEntry {
    pub relative_path: String,
    pub absolute_path: PathBuf,
}

#[derive(Clone)]
pub struct MemoryRepo {
    paths: MemoryPaths,
}

impl MemoryRepo {
    pub fn new(paths: MemoryPaths) -> Self {
        MemoryRepo { paths }
    }

    /// Lists every `.md` file directly under a primitive folder, decision
    /// or learning, non-recursively — archived files are a separate listing.
    pub fn list(&self, primitive_type: PrimitiveType) -> Result<Vec<MemoryRepoEntry>> {
        if primitive_type == PrimitiveType::Summary {
            return self.list_summaries();
        }
        let dir = self.paths.memory_dir.join(primitive_type.folder());
        list_markdown_files(&dir, primitive_type.folder())
    }

    /// Summaries nest under `summaries/YYYYMMDD/HHMMSS/`, so listing walks
    /// two extra levels instead of one flat directory.
    fn list_summaries(&self) -> Result<Vec<MemoryRepoEntry>> {
        let root = self.paths.summaries_dir();
        let mut out = Vec::new();
        if !root.exists() {
            return Ok(out);
        }
        for date_entry in std::fs::read_dir(&root)? {
            let date_entry = date_entry?;
            if !date_entry.file_type()?.is_dir() {
                continue;
            }
            for time_entry in std::fs::read_dir(date_entry.path())? {
                let time_entry = time_entry?;
                if !time_entry.file_type()?.is_dir() {
                    continue;
                }
                for file_entry in std::fs::read_dir(time_entry.path())? {
                    let file_entry = file_entry?;
                    let path = file_entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }
                    let relative = path
                        .strip_prefix(&root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .replace('\\', "/");
                    out.push(MemoryRepoEntry {
                        relative_path: format!("summaries/{relative}"),
                        absolute_path: path,
                    });
                }
            }
        }
        out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(out)
    }

    /// Lists archived decisions/learnings. Panics-free no-op for summaries,
    /// which are never archived.
    pub fn list_archived(&self, primitive_type: PrimitiveType) -> Result<Vec<MemoryRepoEntry>> {
        if !primitive_type.archivable() {
            return Ok(Vec::new());
        }
        let dir = self.paths.archived_dir(primitive_type.folder());
        list_markdown_files(&dir, &format!("archived/{}", primitive_type.folder()))
    }

    pub fn read_primitive(&self, primitive_type: PrimitiveType, filename: &str) -> Result<MemoryPrimitive> {
        reject_traversal(filename)?;
        let path = self.paths.memory_dir.join(primitive_type.folder()).join(filename);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| LerimError::ArtifactMissing(path.display().to_string()))?;
        MemoryPrimitive::from_file_contents(primitive_type, &text)
    }

    pub fn read_summary(&self, relative_path: &str) -> Result<SummaryRecord> {
        reject_traversal(relative_path)?;
        let path = self.paths.summaries_dir().join(relative_path);
        let text = std::fs::read_to_string(&path)
            .map_err(|_| LerimError::ArtifactMissing(path.display().to_string()))?;
        SummaryRecord::from_file_contents(&text)
    }

    /// Writes a decision or learning primitive to its canonical path,
    /// returning the path relative to `memory/`.
    pub fn write_primitive(&self, primitive: &MemoryPrimitive) -> Result<String> {
        let folder = primitive.primitive_type.folder();
        let dir = self.paths.memory_dir.join(folder);
        std::fs::create_dir_all(&dir)?;
        let filename = primitive.filename();
        std::fs::write(dir.join(&filename), primitive.to_file_contents()?)?;
        Ok(format!("{folder}/{filename}"))
    }

    pub fn write_summary(&self, summary: &SummaryRecord) -> Result<String> {
        let relative = summary.relative_path();
        let full = self.paths.summaries_dir().join(&relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, summary.to_file_contents()?)?;
        Ok(format!("summaries/{relative}"))
    }

    /// Moves a decision or learning file into `archived/<folder>/`,
    /// preserving the filename. No-op (returns `Ok(false)`) if the source
    /// file is already gone.
    pub fn archive(&self, primitive_type: PrimitiveType, filename: &str) -> Result<bool> {
        if !primitive_type.archivable() {
            return Err(LerimError::ArtifactInvalid(format!(
                "{} primitives cannot be archived",
                primitive_type.folder()
            )));
        }
        reject_traversal(filename)?;
        let source = self.paths.memory_dir.join(primitive_type.folder()).join(filename);
        if !source.exists() {
            return Ok(false);
        }
        let dest_dir = self.paths.archived_dir(primitive_type.folder());
        std::fs::create_dir_all(&dest_dir)?;
        std::fs::rename(&source, dest_dir.join(filename))?;
        Ok(true)
    }
}

fn list_markdown_files(dir: &Path, relative_prefix: &str) -> Result<Vec<MemoryRepoEntry>> {
    let mut out = Vec::new();
    if !dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        out.push(MemoryRepoEntry {
            relative_path: format!("{relative_prefix}/{filename}"),
            absolute_path: path,
        });
    }
    out.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(out)
}

fn reject_traversal(name: &str) -> Result<()> {
    if name.contains("..") || name.starts_with('/') {
        return Err(LerimError::Boundary {
            path: PathBuf::from(name),
            allowed: vec![PathBuf::from("memory root")],
        });
    }
    Ok(())
}

/// Extracts the `{YYYYMMDD}-{slug}` memory id from a file path if it sits
/// directly inside `memory_root/{decisions,learnings}/`, mirroring the
/// access-tracker's PostToolUse hook: reads/writes to any other file never
/// produce an access record.
pub fn extract_memory_id(file_path: &Path, memory_root: &Path) -> Option<String> {
    let resolved = file_path.canonicalize().ok()?;
    let root = memory_root.canonicalize().ok()?;
    let parent = resolved.parent()?;
    if parent.parent()? != root {
        return None;
    }
    let folder = parent.file_name()?.to_str()?;
    if folder != "decisions" && folder != "learnings" {
        return None;
    }
    let filename = resolved.file_name()?.to_str()?;
    let stem = filename.strip_suffix(".md")?;
    let (date_part, _) = stem.split_once('-')?;
    if date_part.len() == 8 && date_part.chars().all(|c| c.is_ascii_digit()) {
        Some(stem.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::LearningKind;
    use lerim_core::paths::ensure_memory_paths;
    use tempfile::tempdir;

    fn repo(root: &Path) -> MemoryRepo {
        let paths = ensure_memory_paths(root).unwrap();
        MemoryRepo::new(paths)
    }

    #[test]
    fn write_then_list_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Decision,
            "Use rusqlite with bundled feature",
            "sync",
            0.8,
            vec![],
            "Keeps the binary self-contained.",
            None,
        )
        .unwrap();
        let relative = repo.write_primitive(&primitive).unwrap();
        assert!(relative.starts_with("decisions/"));

        let listed = repo.list(PrimitiveType::Decision).unwrap();
        assert_eq!(listed.len(), 1);

        let filename = primitive.filename();
        let read_back = repo.read_primitive(PrimitiveType::Decision, &filename).unwrap();
        assert_eq!(read_back.frontmatter.title, primitive.frontmatter.title);
    }

    #[test]
    fn archive_moves_file_into_archived_subfolder() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let primitive = MemoryPrimitive::new(
            PrimitiveType::Learning,
            "Stale heartbeats need reclaim",
            "maintain",
            0.4,
            vec![],
            "body",
            Some(LearningKind::Pitfall),
        )
        .unwrap();
        repo.write_primitive(&primitive).unwrap();
        let filename = primitive.filename();

        let archived = repo.archive(PrimitiveType::Learning, &filename).unwrap();
        assert!(archived);
        assert!(repo.list(PrimitiveType::Learning).unwrap().is_empty());
        assert_eq!(repo.list_archived(PrimitiveType::Learning).unwrap().len(), 1);
    }

    #[test]
    fn archive_rejects_summaries() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let result = repo.archive(PrimitiveType::Summary, "20260101-x.md");
        assert!(result.is_err());
    }

    #[test]
    fn write_then_read_summary_round_trips() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let summary = SummaryRecord::new(
            "Ported the claim transaction",
            "sync-20260220-120000-abc",
            "claude",
            "/data/sessions/run-1.jsonl",
            Some("lerim".to_string()),
            "Rewrote queue claim semantics.",
            "Support bulk claim with stale reclaim.",
            "Read catalog.py, wrote Rust port, added tests.",
            vec![],
            "narrative body",
        );
        let relative = repo.write_summary(&summary).unwrap();
        let read_back = repo.read_summary(relative.trim_start_matches("summaries/")).unwrap();
        assert_eq!(read_back.frontmatter.run_id, summary.frontmatter.run_id);
    }

    #[test]
    fn read_primitive_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let repo = repo(dir.path());
        let result = repo.read_primitive(PrimitiveType::Decision, "../../etc/passwd");
        assert!(result.is_err());
    }

    #[test]
    fn extract_memory_id_accepts_only_decisions_and_learnings() {
        let dir = tempdir().unwrap();
        let memory_root = dir.path().join("memory");
        std::fs::create_dir_all(memory_root.join("decisions")).unwrap();
        std::fs::create_dir_all(memory_root.join("summaries")).unwrap();
        let decision_path = memory_root.join("decisions").join("20260221-deploy-tips.md");
        std::fs::write(&decision_path, "x").unwrap();
        let summary_path = memory_root.join("summaries").join("20260221-deploy-tips.md");
        std::fs::write(&summary_path, "x").unwrap();

        assert_eq!(
            extract_memory_id(&decision_path, &memory_root),
            Some("20260221-deploy-tips".to_string())
        );
        assert_eq!(extract_memory_id(&summary_path, &memory_root), None);
    }
}
