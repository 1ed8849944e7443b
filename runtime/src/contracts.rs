//! Workspace artifact contracts (§3/§4.8): the typed boundary between the
//! loosely-structured LLM orchestrator output and the strict counters the
//! sync/maintain pipelines, HTTP responses, and audit rows are built from.
//! Grounded on the "artifact contract as a typed boundary" design note —
//! a validator parses `*.json` artifacts into one `SyncResult`/
//! `MaintainResult` struct immediately after the agent exits; everything
//! downstream reads that struct, never the raw files again.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use lerim_core::{LerimError, Result};

/// One candidate primitive proposed by the extraction step, before the
/// deterministic add/update/no_op decision is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractCandidate {
    pub primitive_type: String,
    pub title: String,
    pub body: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryActionCounts {
    pub add: u32,
    pub update: u32,
    pub no_op: u32,
}

impl MemoryActionCounts {
    pub fn total(&self) -> u32 {
        self.add + self.update + self.no_op
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryAction {
    pub action: String,
    #[serde(default)]
    pub primitive_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub target_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryActionsReport {
    pub counts: MemoryActionCounts,
    #[serde(default)]
    pub actions: Vec<MemoryAction>,
    #[serde(default)]
    pub written_memory_paths: Vec<String>,
    #[serde(default)]
    pub trace_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryPointer {
    pub summary_path: String,
}

/// The fully validated outcome of one sync run, derived once from the
/// raw workspace artifacts. Everything downstream (job completion,
/// counters, audit rows, HTTP responses) reads this, not the JSON files.
#[derive(Debug, Clone)]
pub struct SyncResultContract {
    pub extract: Vec<ExtractCandidate>,
    pub summary: SummaryPointer,
    pub memory_actions: MemoryActionsReport,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaintainActionCounts {
    pub merged: u32,
    pub archived: u32,
    pub consolidated: u32,
    pub decayed: u32,
    pub unchanged: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintainAction {
    pub action: String,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintainActionsReport {
    pub counts: MaintainActionCounts,
    #[serde(default)]
    pub actions: Vec<MaintainAction>,
}

#[derive(Debug, Clone)]
pub struct MaintainResultContract {
    pub maintain_actions: MaintainActionsReport,
}

/// `memory_actions.json`'s `counts` object tolerates a handful of aliases
/// an LLM orchestrator might reasonably emit instead of the canonical
/// `add`/`update`/`no_op` keys.
fn normalize_memory_counts(raw: &serde_json::Value) -> Result<MemoryActionCounts> {
    let obj = raw.as_object().ok_or_else(|| {
        LerimError::ArtifactInvalid("memory_actions.json: 'counts' must be an object".into())
    })?;
    let get = |keys: &[&str]| -> u32 {
        for key in keys {
            if let Some(v) = obj.get(*key).and_then(|v| v.as_u64()) {
                return v as u32;
            }
        }
        0
    };
    Ok(MemoryActionCounts {
        add: get(&["add", "added", "adds"]),
        update: get(&["update", "updated", "updates"]),
        no_op: get(&["no_op", "noop", "unchanged", "skip", "skipped"]),
    })
}

fn normalize_maintain_counts(raw: &serde_json::Value) -> Result<MaintainActionCounts> {
    let obj = raw.as_object().ok_or_else(|| {
        LerimError::ArtifactInvalid("maintain_actions.json: 'counts' must be an object".into())
    })?;
    let get = |keys: &[&str]| -> u32 {
        for key in keys {
            if let Some(v) = obj.get(*key).and_then(|v| v.as_u64()) {
                return v as u32;
            }
        }
        0
    };
    Ok(MaintainActionCounts {
        merged: get(&["merged"]),
        archived: get(&["archived"]),
        consolidated: get(&["consolidated"]),
        decayed: get(&["decayed"]),
        unchanged: get(&["unchanged"]),
    })
}

/// Whether `candidate` (absolute or run-folder-relative) resolves inside
/// one of `roots`. Absolute paths are canonicalized against each root;
/// relative paths are accepted as long as they carry no `..` traversal
/// (they are anchored against the run folder by the caller that wrote
/// them, so a relative path is inside by construction unless it escapes).
fn resolves_inside(candidate: &str, roots: &[PathBuf]) -> bool {
    let candidate_path = Path::new(candidate);
    if candidate_path.is_absolute() {
        roots.iter().any(|root| {
            let root_canon = root.canonicalize().unwrap_or_else(|_| root.clone());
            candidate_path.starts_with(&root_canon) || candidate_path.starts_with(root)
        })
    } else {
        !candidate.contains("..")
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|_| LerimError::ArtifactMissing(path.display().to_string()))?;
    serde_json::from_str(&text)
        .map_err(|e| LerimError::ArtifactInvalid(format!("{}: {e}", path.display())))
}

/// Validates the full artifact set a sync run's lead agent must leave
/// behind in its run folder, per §4.8's contract-validation rules.
pub fn validate_sync_artifacts(
    run_folder: &Path,
    memory_root: &Path,
) -> Result<SyncResultContract> {
    for required in ["extract.json", "summary.json", "memory_actions.json", "subagents.log"] {
        let path = run_folder.join(required);
        if !path.exists() {
            return Err(LerimError::ArtifactMissing(path.display().to_string()));
        }
    }

    let extract_raw = read_json(&run_folder.join("extract.json"))?;
    let extract: Vec<ExtractCandidate> = serde_json::from_value(extract_raw)
        .map_err(|e| LerimError::ArtifactInvalid(format!("extract.json: {e}")))?;

    let summary_raw = read_json(&run_folder.join("summary.json"))?;
    let summary: SummaryPointer = serde_json::from_value(summary_raw)
        .map_err(|e| LerimError::ArtifactInvalid(format!("summary.json: {e}")))?;
    let roots = vec![memory_root.to_path_buf(), run_folder.to_path_buf()];
    if !resolves_inside(&summary.summary_path, &[memory_root.to_path_buf()]) {
        return Err(LerimError::ArtifactInvalid(
            "summary.json: summary_path escapes memory root".into(),
        ));
    }

    let actions_raw = read_json(&run_folder.join("memory_actions.json"))?;
    let actions_obj = actions_raw.as_object().ok_or_else(|| {
        LerimError::ArtifactInvalid("memory_actions.json: must be an object".into())
    })?;
    let counts_raw = actions_obj
        .get("counts")
        .ok_or_else(|| LerimError::ArtifactInvalid("memory_actions.json: missing 'counts'".into()))?;
    let counts = normalize_memory_counts(counts_raw)?;
    let actions: Vec<MemoryAction> = actions_obj
        .get("actions")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LerimError::ArtifactInvalid(format!("memory_actions.json: actions: {e}")))?
        .unwrap_or_default();
    let written_memory_paths: Vec<String> = actions_obj
        .get("written_memory_paths")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LerimError::ArtifactInvalid(format!("memory_actions.json: written_memory_paths: {e}")))?
        .unwrap_or_default();
    for path in &written_memory_paths {
        if !resolves_inside(path, &roots) {
            return Err(LerimError::Boundary {
                path: PathBuf::from(path),
                allowed: roots.clone(),
            });
        }
    }
    let trace_path = actions_obj
        .get("trace_path")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    if counts.total() as usize != extract.len() {
        tracing::warn!(
            expected = extract.len(),
            actual = counts.total(),
            "memory_actions counts do not sum to the number of extracted candidates"
        );
    }

    Ok(SyncResultContract {
        extract,
        summary,
        memory_actions: MemoryActionsReport {
            counts,
            actions,
            written_memory_paths,
            trace_path,
        },
    })
}

/// Validates the artifact set a maintain run's lead agent must leave
/// behind, including that every `source_path`/`target_path` referenced in
/// its actions resolves inside the memory root or its own run folder.
pub fn validate_maintain_artifacts(
    run_folder: &Path,
    memory_root: &Path,
) -> Result<MaintainResultContract> {
    let actions_path = run_folder.join("maintain_actions.json");
    if !actions_path.exists() {
        return Err(LerimError::ArtifactMissing(actions_path.display().to_string()));
    }

    let actions_raw = read_json(&actions_path)?;
    let actions_obj = actions_raw.as_object().ok_or_else(|| {
        LerimError::ArtifactInvalid("maintain_actions.json: must be an object".into())
    })?;
    let counts_raw = actions_obj.get("counts").ok_or_else(|| {
        LerimError::ArtifactInvalid("maintain_actions.json: missing 'counts'".into())
    })?;
    let counts = normalize_maintain_counts(counts_raw)?;
    let actions: Vec<MaintainAction> = actions_obj
        .get("actions")
        .cloned()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LerimError::ArtifactInvalid(format!("maintain_actions.json: actions: {e}")))?
        .unwrap_or_default();

    let roots = vec![memory_root.to_path_buf(), run_folder.to_path_buf()];
    for action in &actions {
        for maybe_path in [&action.source_path, &action.target_path] {
            if let Some(path) = maybe_path {
                if !resolves_inside(path, &roots) {
                    return Err(LerimError::Boundary {
                        path: PathBuf::from(path),
                        allowed: roots.clone(),
                    });
                }
            }
        }
    }

    Ok(MaintainResultContract {
        maintain_actions: MaintainActionsReport { counts, actions },
    })
}

/// A hand-rolled map of arbitrary key/value pairs passed into a prompt
/// template; kept as a type alias so `prompts.rs` doesn't need its own
/// serde wrapper type.
pub type PromptVars = HashMap<String, String>;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn validate_sync_artifacts_accepts_a_complete_set() {
        let dir = tempdir().unwrap();
        let memory_root = dir.path().join("memory");
        std::fs::create_dir_all(memory_root.join("summaries")).unwrap();
        let run_folder = dir.path().join("workspace/sync-20260101-000000-abc");
        std::fs::create_dir_all(&run_folder).unwrap();

        write(&run_folder.join("extract.json"), r#"[{"primitive_type":"learning","title":"x","body":"y","confidence":0.5,"tags":[],"kind":"insight"}]"#);
        let summary_path = memory_root.join("summaries/20260101/000000/x.md");
        write(&summary_path, "summary");
        write(
            &run_folder.join("summary.json"),
            &serde_json::json!({"summary_path": summary_path.to_string_lossy()}).to_string(),
        );
        write(
            &run_folder.join("memory_actions.json"),
            &serde_json::json!({
                "counts": {"add": 1, "update": 0, "no_op": 0},
                "actions": [],
                "written_memory_paths": [],
            })
            .to_string(),
        );
        write(&run_folder.join("subagents.log"), "");

        let result = validate_sync_artifacts(&run_folder, &memory_root).unwrap();
        assert_eq!(result.extract.len(), 1);
        assert_eq!(result.memory_actions.counts.add, 1);
    }

    #[test]
    fn validate_sync_artifacts_rejects_missing_file() {
        let dir = tempdir().unwrap();
        let run_folder = dir.path().join("run");
        std::fs::create_dir_all(&run_folder).unwrap();
        let result = validate_sync_artifacts(&run_folder, &dir.path().join("memory"));
        assert!(matches!(result, Err(LerimError::ArtifactMissing(_))));
    }

    #[test]
    fn validate_sync_artifacts_rejects_escaping_written_path() {
        let dir = tempdir().unwrap();
        let memory_root = dir.path().join("memory");
        std::fs::create_dir_all(&memory_root).unwrap();
        let run_folder = dir.path().join("workspace/sync-run");
        std::fs::create_dir_all(&run_folder).unwrap();

        write(&run_folder.join("extract.json"), "[]");
        let summary_path = memory_root.join("summaries/x.md");
        write(&summary_path, "summary");
        write(
            &run_folder.join("summary.json"),
            &serde_json::json!({"summary_path": summary_path.to_string_lossy()}).to_string(),
        );
        write(
            &run_folder.join("memory_actions.json"),
            &serde_json::json!({
                "counts": {"add": 0, "update": 0, "no_op": 0},
                "written_memory_paths": ["/etc/passwd"],
            })
            .to_string(),
        );
        write(&run_folder.join("subagents.log"), "");

        let result = validate_sync_artifacts(&run_folder, &memory_root);
        assert!(matches!(result, Err(LerimError::Boundary { .. })));
    }

    #[test]
    fn validate_maintain_artifacts_accepts_paths_inside_memory_root() {
        let dir = tempdir().unwrap();
        let memory_root = dir.path().join("memory");
        std::fs::create_dir_all(memory_root.join("learnings")).unwrap();
        let run_folder = dir.path().join("workspace/maintain-run");
        std::fs::create_dir_all(&run_folder).unwrap();

        let source = memory_root.join("learnings/20260101-a.md");
        let target = memory_root.join("archived/learnings/20260101-a.md");
        write(
            &run_folder.join("maintain_actions.json"),
            &serde_json::json!({
                "counts": {"merged": 0, "archived": 1, "consolidated": 0, "decayed": 0, "unchanged": 0},
                "actions": [{
                    "action": "archive",
                    "source_path": source.to_string_lossy(),
                    "target_path": target.to_string_lossy(),
                }],
            })
            .to_string(),
        );

        let result = validate_maintain_artifacts(&run_folder, &memory_root).unwrap();
        assert_eq!(result.maintain_actions.counts.archived, 1);
    }

    #[test]
    fn validate_maintain_artifacts_rejects_escaping_target() {
        let dir = tempdir().unwrap();
        let memory_root = dir.path().join("memory");
        std::fs::create_dir_all(&memory_root).unwrap();
        let run_folder = dir.path().join("workspace/maintain-run");
        std::fs::create_dir_all(&run_folder).unwrap();

        write(
            &run_folder.join("maintain_actions.json"),
            &serde_json::json!({
                "counts": {"merged": 1, "archived": 0, "consolidated": 0, "decayed": 0, "unchanged": 0},
                "actions": [{"action": "merge", "source_path": "/tmp/outside.md", "target_path": "/tmp/outside2.md"}],
            })
            .to_string(),
        );

        let result = validate_maintain_artifacts(&run_folder, &memory_root);
        assert!(matches!(result, Err(LerimError::Boundary { .. })));
    }
}
