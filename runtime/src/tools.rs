//! The scoped tool surface (§4.8) exposed to the runtime agent: read,
//! glob, grep, write, edit, bounded to an explicit set of allowed roots
//! per call. A path outside its boundary fails with
//! `LerimError::Boundary` — the core never silently allows an escape, so
//! whatever drives the LLM loop cannot widen its own blast radius by
//! construction.

use std::path::{Path, PathBuf};

use lerim_catalog::AccessTracker;
use lerim_core::{LerimError, Result};
use lerim_memory::{extract_memory_id, slugify, Frontmatter, LearningKind, MemoryPrimitive, MemoryRepo, PrimitiveType};

/// The roots a single tool call is bounded to. Reads and writes are
/// scoped independently: `read_roots` always at least covers
/// `write_roots`, but a sync run typically grants extra read-only roots
/// (the trace file's parent, the global cache dir) that are never
/// writable.
#[derive(Debug, Clone)]
pub struct AllowedRoots {
    pub read: Vec<PathBuf>,
    pub write: Vec<PathBuf>,
}

impl AllowedRoots {
    pub fn for_chat(memory_root: &Path, workspace_root: &Path, run_folder: &Path) -> Self {
        AllowedRoots {
            read: vec![memory_root.to_path_buf(), workspace_root.to_path_buf(), run_folder.to_path_buf()],
            write: vec![],
        }
    }

    pub fn for_sync(
        memory_root: &Path,
        workspace_root: &Path,
        run_folder: &Path,
        trace_parent: &Path,
        extra_read: &[PathBuf],
    ) -> Self {
        let mut read = vec![
            memory_root.to_path_buf(),
            workspace_root.to_path_buf(),
            run_folder.to_path_buf(),
            trace_parent.to_path_buf(),
        ];
        read.extend(extra_read.iter().cloned());
        AllowedRoots {
            read,
            write: vec![memory_root.to_path_buf(), run_folder.to_path_buf()],
        }
    }

    pub fn for_maintain(memory_root: &Path, workspace_root: &Path, run_folder: &Path) -> Self {
        AllowedRoots {
            read: vec![memory_root.to_path_buf(), workspace_root.to_path_buf(), run_folder.to_path_buf()],
            write: vec![memory_root.to_path_buf(), run_folder.to_path_buf()],
        }
    }

    fn check(path: &Path, roots: &[PathBuf]) -> Result<PathBuf> {
        let resolved = if path.exists() {
            path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
        } else {
            path.to_path_buf()
        };
        for root in roots {
            let root_resolved = root.canonicalize().unwrap_or_else(|_| root.clone());
            if resolved.starts_with(&root_resolved) || resolved.starts_with(root) {
                return Ok(resolved);
            }
        }
        Err(LerimError::Boundary {
            path: path.to_path_buf(),
            allowed: roots.to_vec(),
        })
    }

    pub fn check_read(&self, path: &Path) -> Result<PathBuf> {
        Self::check(path, &self.read)
    }

    pub fn check_write(&self, path: &Path) -> Result<PathBuf> {
        Self::check(path, &self.write)
    }
}

/// Shared state threaded through every tool call in one agent invocation.
pub struct ToolContext<'a> {
    pub roots: AllowedRoots,
    pub memory_repo: &'a MemoryRepo,
    pub memory_root: PathBuf,
    pub access_tracker: Option<&'a AccessTracker>,
    pub memory_root_key: String,
}

/// Whether a read of `limit` lines counts against the access tracker
/// (§4.7): `None` or `> 20` is a real read; `<= 20` is treated as a
/// frontmatter-only scan and never recorded. The boundary at 20 is
/// exclusive — `Some(20)` does not count, `Some(21)` does.
pub fn is_body_read(limit: Option<usize>) -> bool {
    match limit {
        None => true,
        Some(n) => n > 20,
    }
}

/// Reads a file bounded to `ctx`'s allowed read roots. Records an access
/// if the file is a tracked memory primitive and this read crosses the
/// frontmatter-only threshold.
pub fn read_file(ctx: &ToolContext, path: &Path, limit: Option<usize>) -> Result<String> {
    let resolved = ctx.roots.check_read(path)?;
    let text = std::fs::read_to_string(&resolved)
        .map_err(|_| LerimError::ArtifactMissing(resolved.display().to_string()))?;

    if is_body_read(limit) {
        record_access_if_tracked(ctx, &resolved)?;
    }

    match limit {
        Some(n) => Ok(text.lines().take(n).collect::<Vec<_>>().join("\n")),
        None => Ok(text),
    }
}

fn record_access_if_tracked(ctx: &ToolContext, resolved: &Path) -> Result<()> {
    if let Some(tracker) = ctx.access_tracker {
        if let Some(memory_id) = extract_memory_id(resolved, &ctx.memory_root) {
            tracker.record_access(&memory_id, &ctx.memory_root_key)?;
        }
    }
    Ok(())
}

/// Lists files under `root` (bounded) matching a glob pattern, e.g.
/// `**/*.md`.
pub fn glob_files(ctx: &ToolContext, root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let resolved_root = ctx.roots.check_read(root)?;
    let full_pattern = resolved_root.join(pattern);
    let pattern_str = full_pattern.to_string_lossy().into_owned();
    let mut out = Vec::new();
    for entry in glob::glob(&pattern_str).map_err(|e| LerimError::Other(e.to_string()))? {
        if let Ok(path) = entry {
            if ctx.roots.check_read(&path).is_ok() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct GrepMatch {
    pub path: PathBuf,
    pub line_number: usize,
    pub line: String,
}

/// Greps a regex pattern across `.md` files under a bounded root,
/// bailing out of any single file after 200 matches to keep the explorer
/// subagent cheap.
pub fn grep_files(ctx: &ToolContext, root: &Path, pattern: &str) -> Result<Vec<GrepMatch>> {
    let resolved_root = ctx.roots.check_read(root)?;
    let regex = regex::Regex::new(pattern).map_err(|e| LerimError::Other(e.to_string()))?;
    let mut out = Vec::new();
    walk_markdown(&resolved_root, &mut |path| {
        if ctx.roots.check_read(path).is_err() {
            return;
        }
        let Ok(text) = std::fs::read_to_string(path) else { return };
        for (idx, line) in text.lines().enumerate() {
            if regex.is_match(line) {
                out.push(GrepMatch {
                    path: path.to_path_buf(),
                    line_number: idx + 1,
                    line: line.to_string(),
                });
                if out.len() >= 200 {
                    return;
                }
            }
        }
    });
    Ok(out)
}

fn walk_markdown(dir: &Path, visit: &mut impl FnMut(&Path)) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            walk_markdown(&path, visit);
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            visit(&path);
        }
    }
}

/// Writes a raw workspace artifact (e.g. `extract.json`, `agent.log`)
/// bounded to `ctx`'s write roots. Distinct from [`write_memory_file`],
/// which additionally re-derives frontmatter and filename.
pub fn write_artifact(ctx: &ToolContext, path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ctx.roots.check_write(parent)?;
    } else {
        ctx.roots.check_write(path)?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}

/// A normalized request to write a decision or learning primitive. The
/// LLM proposes `title`/`body`/`confidence`/`tags`/`kind`; everything
/// server-defaulted (`id`, `created`, `updated`, `source`, the filename
/// itself) is re-derived here regardless of what the LLM claims.
pub struct WriteMemoryRequest<'a> {
    pub primitive_type: PrimitiveType,
    pub title: &'a str,
    pub body: &'a str,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub kind: Option<LearningKind>,
    pub source_run_id: &'a str,
}

/// Writes a decision or learning primitive through the bounded write
/// surface. `summaries/` is reserved for the summarization pipeline and
/// is always rejected here.
pub fn write_memory_file(ctx: &ToolContext, req: WriteMemoryRequest) -> Result<String> {
    if req.primitive_type == PrimitiveType::Summary {
        return Err(LerimError::Boundary {
            path: PathBuf::from("memory/summaries"),
            allowed: ctx.roots.write.clone(),
        });
    }
    ctx.roots.check_write(&ctx.memory_root.join(req.primitive_type.folder()))?;

    let primitive = MemoryPrimitive::new(
        req.primitive_type,
        req.title,
        req.source_run_id,
        req.confidence,
        req.tags,
        req.body,
        req.kind,
    )?;
    ctx.memory_repo.write_primitive(&primitive)
}

/// Overwrites an existing decision/learning primitive's body and
/// frontmatter fields in place (used by maintain's merge step). Rejects
/// edits to summaries, which maintain never touches.
pub fn edit_memory_file(
    ctx: &ToolContext,
    primitive_type: PrimitiveType,
    filename: &str,
    new_title: Option<&str>,
    new_body: &str,
    new_confidence: Option<f64>,
    new_tags: Option<Vec<String>>,
) -> Result<()> {
    if primitive_type == PrimitiveType::Summary {
        return Err(LerimError::ArtifactInvalid(
            "edit is rejected on summary files".to_string(),
        ));
    }
    let dir = ctx.memory_root.join(primitive_type.folder());
    ctx.roots.check_write(&dir)?;

    let mut primitive = ctx.memory_repo.read_primitive(primitive_type, filename)?;
    if let Some(title) = new_title {
        primitive.frontmatter.title = title.to_string();
        primitive.frontmatter.id = slugify(title);
    }
    primitive.body = new_body.to_string();
    if let Some(confidence) = new_confidence {
        primitive.frontmatter.confidence = confidence;
    }
    if let Some(tags) = new_tags {
        primitive.frontmatter.tags = tags;
    }
    primitive.frontmatter.updated = chrono::Utc::now();

    std::fs::write(dir.join(filename), primitive.to_file_contents()?)?;
    Ok(())
}

/// Looks for a non-archived decision/learning primitive with an exact
/// title match, returning its filename and body so the sync decision
/// policy (`lerim_runtime::decision`) can compare it against a candidate.
pub fn find_existing_by_title(
    ctx: &ToolContext,
    primitive_type: PrimitiveType,
    title: &str,
) -> Result<Option<(String, String)>> {
    for entry in ctx.memory_repo.list(primitive_type)? {
        let filename = match entry.relative_path.rsplit_once('/') {
            Some((_, name)) => name.to_string(),
            None => entry.relative_path.clone(),
        };
        let primitive = ctx.memory_repo.read_primitive(primitive_type, &filename)?;
        if primitive.frontmatter.title == title {
            return Ok(Some((filename, primitive.body)));
        }
    }
    Ok(None)
}

/// Moves a decision/learning file into `archived/`, used by maintain's
/// archive step.
pub fn archive_memory_file(ctx: &ToolContext, primitive_type: PrimitiveType, filename: &str) -> Result<bool> {
    ctx.roots.check_write(&ctx.memory_root.join(primitive_type.folder()))?;
    ctx.memory_repo.archive(primitive_type, filename)
}

pub use Frontmatter as MemoryFrontmatter;

#[cfg(test)]
mod tests {
    use super::*;
    use lerim_core::paths::ensure_memory_paths;
    use tempfile::tempdir;

    fn context(dir: &Path) -> (MemoryRepo, PathBuf) {
        let paths = ensure_memory_paths(dir).unwrap();
        (MemoryRepo::new(paths.clone()), paths.memory_dir)
    }

    #[test]
    fn read_outside_allowed_roots_is_rejected() {
        let dir = tempdir().unwrap();
        let (repo, memory_dir) = context(dir.path());
        let roots = AllowedRoots {
            read: vec![memory_dir.clone()],
            write: vec![memory_dir.clone()],
        };
        let ctx = ToolContext {
            roots,
            memory_repo: &repo,
            memory_root: memory_dir,
            access_tracker: None,
            memory_root_key: "project".to_string(),
        };
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, "secret").unwrap();
        let result = read_file(&ctx, &outside, None);
        assert!(matches!(result, Err(LerimError::Boundary { .. })));
    }

    #[test]
    fn write_memory_file_rejects_summary_type() {
        let dir = tempdir().unwrap();
        let (repo, memory_dir) = context(dir.path());
        let roots = AllowedRoots {
            read: vec![memory_dir.clone()],
            write: vec![memory_dir.clone()],
        };
        let ctx = ToolContext {
            roots,
            memory_repo: &repo,
            memory_root: memory_dir,
            access_tracker: None,
            memory_root_key: "project".to_string(),
        };
        let result = write_memory_file(
            &ctx,
            WriteMemoryRequest {
                primitive_type: PrimitiveType::Summary,
                title: "x",
                body: "y",
                confidence: 0.5,
                tags: vec![],
                kind: None,
                source_run_id: "sync-1",
            },
        );
        assert!(matches!(result, Err(LerimError::Boundary { .. })));
    }

    #[test]
    fn is_body_read_boundary_is_exclusive_at_20() {
        assert!(!is_body_read(Some(20)));
        assert!(is_body_read(Some(21)));
        assert!(is_body_read(None));
    }

    #[test]
    fn write_then_edit_then_archive_round_trips() {
        let dir = tempdir().unwrap();
        let (repo, memory_dir) = context(dir.path());
        let roots = AllowedRoots {
            read: vec![memory_dir.clone()],
            write: vec![memory_dir.clone()],
        };
        let ctx = ToolContext {
            roots,
            memory_repo: &repo,
            memory_root: memory_dir,
            access_tracker: None,
            memory_root_key: "project".to_string(),
        };
        let relative = write_memory_file(
            &ctx,
            WriteMemoryRequest {
                primitive_type: PrimitiveType::Learning,
                title: "Stale lock reclamation",
                body: "original body",
                confidence: 0.6,
                tags: vec![],
                kind: Some(LearningKind::Pitfall),
                source_run_id: "sync-1",
            },
        )
        .unwrap();
        let filename = relative.strip_prefix("learnings/").unwrap();

        edit_memory_file(&ctx, PrimitiveType::Learning, filename, None, "merged body", Some(0.9), None).unwrap();
        let updated = ctx.memory_repo.read_primitive(PrimitiveType::Learning, filename).unwrap();
        assert_eq!(updated.body.trim(), "merged body");
        assert_eq!(updated.frontmatter.confidence, 0.9);

        assert!(archive_memory_file(&ctx, PrimitiveType::Learning, filename).unwrap());
        assert!(ctx.memory_repo.list(PrimitiveType::Learning).unwrap().is_empty());
    }
}
