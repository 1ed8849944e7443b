//! The pluggable LLM surface (§1, §4.8). `LlmClient` is the seam between
//! this crate's deterministic orchestration (tool boundaries, artifact
//! contracts, the add/update/no_op decision policy) and however an
//! embedder chooses to drive the actual model — a child process, an
//! in-process SDK call, or, here, a fixture that behaves like a
//! well-behaved agent without calling out anywhere.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use lerim_catalog::{effective_confidence, AccessTracker};
use lerim_core::Result;
use lerim_memory::{LearningKind, PrimitiveType, SummaryRecord};

use crate::decision::{decide, DecisionAction};
use crate::prompts::{build_chat_prompt, build_maintain_prompt, build_sync_prompt};
use crate::tools::{
    edit_memory_file, find_existing_by_title, read_file, write_artifact, write_memory_file,
    ToolContext, WriteMemoryRequest,
};
use crate::PromptVars;

pub struct SyncAgentInput<'a> {
    pub run_id: &'a str,
    pub session_path: &'a Path,
    pub run_folder: &'a Path,
    pub agent_type: &'a str,
}

pub struct MaintainAgentInput<'a> {
    pub run_folder: &'a Path,
    pub decay_days: u32,
    pub min_confidence_floor: f64,
    pub grace_period_days: u32,
    pub archive_threshold: f64,
    pub access_tracker: &'a AccessTracker,
    pub memory_root_key: &'a str,
}

/// The three modes a runtime agent is invoked in (§4.8). Implementations
/// are responsible for leaving every artifact their mode's contract
/// requires in the run folder; `lerim_runtime::contracts` validates the
/// result afterward.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn run_sync(&self, ctx: &ToolContext<'_>, input: &SyncAgentInput<'_>) -> Result<()>;

    async fn run_maintain(&self, ctx: &ToolContext<'_>, input: &MaintainAgentInput<'_>) -> Result<()>;

    async fn chat(&self, ctx: &ToolContext<'_>, question: &str, limit: usize) -> Result<String>;
}

/// A deterministic fixture standing in for a real model. It reads the
/// session trace, extracts exactly one learning candidate from it,
/// applies the add/update/no_op decision policy against any
/// identically-titled existing memory, writes a summary, and leaves every
/// artifact the sync/maintain contracts require. Used by tests and by any
/// embedder that wants a working end-to-end pipeline before wiring a real
/// provider.
pub struct StubLlmClient;

impl StubLlmClient {
    pub fn new() -> Self {
        StubLlmClient
    }

    fn candidate_title(run_id: &str) -> String {
        format!("Session notes for {run_id}")
    }

    fn candidate_body(trace_text: &str) -> String {
        let snippet: String = trace_text.split_whitespace().take(60).collect::<Vec<_>>().join(" ");
        if snippet.is_empty() {
            "No transcript content was available for this session.".to_string()
        } else {
            snippet
        }
    }
}

impl Default for StubLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn run_sync(&self, ctx: &ToolContext<'_>, input: &SyncAgentInput<'_>) -> Result<()> {
        let trace_text = read_file(ctx, input.session_path, None).unwrap_or_default();

        let mut vars = PromptVars::new();
        vars.insert("memory_root".to_string(), ctx.memory_root.display().to_string());
        vars.insert("workspace_root".to_string(), input.run_folder.display().to_string());
        vars.insert("run_folder".to_string(), input.run_folder.display().to_string());
        let prompt = build_sync_prompt(&input.session_path.display().to_string(), input.run_id, &vars);

        let title = Self::candidate_title(input.run_id);
        let body = Self::candidate_body(&trace_text);
        let primitive_type = PrimitiveType::Learning;

        let existing = find_existing_by_title(ctx, primitive_type, &title)?;
        let action = decide(
            existing.as_ref().map(|(_, b)| ("learning", title.as_str(), b.as_str())),
            "learning",
            &title,
            &body,
        );

        let mut written_memory_paths = Vec::new();
        match action {
            DecisionAction::Add => {
                let relative = write_memory_file(
                    ctx,
                    WriteMemoryRequest {
                        primitive_type,
                        title: &title,
                        body: &body,
                        confidence: 0.6,
                        tags: vec![],
                        kind: Some(LearningKind::Insight),
                        source_run_id: input.run_id,
                    },
                )?;
                written_memory_paths.push(relative);
            }
            DecisionAction::Update => {
                if let Some((filename, _)) = existing {
                    edit_memory_file(ctx, primitive_type, &filename, None, &body, None, None)?;
                    written_memory_paths.push(format!("{}/{}", primitive_type.folder(), filename));
                }
            }
            DecisionAction::NoOp => {}
        }

        let now = Utc::now();
        let summary = SummaryRecord::new(
            &title,
            input.run_id,
            input.agent_type,
            &input.session_path.display().to_string(),
            None,
            &format!("Processed session {} via the sync pipeline.", input.run_id),
            "Keep the memory tree current with what happened in this session.",
            &body,
            vec![],
            &format!("## {}\n\n{}", title, body),
        );
        let summary_relative = ctx.memory_repo.write_summary(&summary)?;
        let summary_absolute = ctx.memory_root.join(&summary_relative);

        write_artifact(
            ctx,
            &input.run_folder.join("extract.json"),
            &serde_json::to_string_pretty(&serde_json::json!([{
                "primitive_type": "learning",
                "title": title,
                "body": body,
                "confidence": 0.6,
                "tags": Vec::<String>::new(),
                "kind": "insight",
            }]))?,
        )?;

        write_artifact(
            ctx,
            &input.run_folder.join("summary.json"),
            &serde_json::to_string_pretty(&serde_json::json!({
                "summary_path": summary_absolute.display().to_string(),
            }))?,
        )?;

        let counts = match action {
            DecisionAction::Add => serde_json::json!({"add": 1, "update": 0, "no_op": 0}),
            DecisionAction::Update => serde_json::json!({"add": 0, "update": 1, "no_op": 0}),
            DecisionAction::NoOp => serde_json::json!({"add": 0, "update": 0, "no_op": 1}),
        };
        write_artifact(
            ctx,
            &input.run_folder.join("memory_actions.json"),
            &serde_json::to_string_pretty(&serde_json::json!({
                "counts": counts,
                "actions": [{
                    "action": action.as_str(),
                    "primitive_type": "learning",
                    "title": title,
                }],
                "written_memory_paths": written_memory_paths,
                "trace_path": input.session_path.display().to_string(),
            }))?,
        )?;

        write_artifact(
            ctx,
            &input.run_folder.join("subagents.log"),
            &serde_json::json!({
                "subagent": "explorer",
                "action": "read_trace",
                "path": input.session_path.display().to_string(),
            })
            .to_string(),
        )?;

        write_artifact(ctx, &input.run_folder.join("agent.log"), &prompt)?;
        write_artifact(
            ctx,
            &input.run_folder.join("session.log"),
            &serde_json::json!({"run_id": input.run_id, "agent_type": input.agent_type, "started_at": now.to_rfc3339()}).to_string(),
        )?;

        Ok(())
    }

    async fn run_maintain(&self, ctx: &ToolContext<'_>, input: &MaintainAgentInput<'_>) -> Result<()> {
        let mut vars = PromptVars::new();
        vars.insert("memory_root".to_string(), ctx.memory_root.display().to_string());
        vars.insert("decay_days".to_string(), input.decay_days.to_string());
        vars.insert("min_confidence_floor".to_string(), input.min_confidence_floor.to_string());
        vars.insert("grace_period_days".to_string(), input.grace_period_days.to_string());
        let prompt = build_maintain_prompt(&vars);

        let now = Utc::now();
        let mut archived = 0u32;
        let mut unchanged = 0u32;
        let mut actions = Vec::new();

        for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning] {
            for entry in ctx.memory_repo.list(primitive_type)? {
                let filename = entry
                    .relative_path
                    .rsplit_once('/')
                    .map(|(_, name)| name.to_string())
                    .unwrap_or(entry.relative_path.clone());
                let primitive = ctx.memory_repo.read_primitive(primitive_type, &filename)?;
                let memory_id = format!("{}/{}", primitive_type.folder(), filename);
                let last_access = input.access_tracker.last_access(&memory_id, input.memory_root_key)?;

                let effective = effective_confidence(
                    primitive.frontmatter.confidence,
                    primitive.frontmatter.created,
                    last_access,
                    now,
                    input.decay_days,
                    input.min_confidence_floor,
                    input.grace_period_days,
                );

                if effective < input.archive_threshold {
                    let moved = crate::tools::archive_memory_file(ctx, primitive_type, &filename)?;
                    if moved {
                        archived += 1;
                        actions.push(serde_json::json!({
                            "action": "archive",
                            "source_path": ctx.memory_root.join(primitive_type.folder()).join(&filename).display().to_string(),
                            "target_path": ctx.memory_root.join("archived").join(primitive_type.folder()).join(&filename).display().to_string(),
                            "reason": format!("effective_confidence {effective:.3} below threshold {}", input.archive_threshold),
                        }));
                    }
                } else {
                    unchanged += 1;
                }
            }
        }

        write_artifact(
            ctx,
            &input.run_folder.join("maintain_actions.json"),
            &serde_json::to_string_pretty(&serde_json::json!({
                "counts": {
                    "merged": 0,
                    "archived": archived,
                    "consolidated": 0,
                    "decayed": 0,
                    "unchanged": unchanged,
                },
                "actions": actions,
            }))?,
        )?;
        write_artifact(ctx, &input.run_folder.join("agent.log"), &prompt)?;
        write_artifact(
            ctx,
            &input.run_folder.join("subagents.log"),
            &serde_json::json!({"subagent": "explorer", "action": "scan_memory_tree"}).to_string(),
        )?;

        Ok(())
    }

    async fn chat(&self, ctx: &ToolContext<'_>, question: &str, limit: usize) -> Result<String> {
        let _ = build_chat_prompt(question, &PromptVars::new());
        let needle = question.to_lowercase();
        let mut hits = Vec::new();
        for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning, PrimitiveType::Summary] {
            for entry in ctx.memory_repo.list(primitive_type)? {
                if hits.len() >= limit {
                    break;
                }
                let text = std::fs::read_to_string(&entry.absolute_path).unwrap_or_default();
                if text.to_lowercase().contains(&needle) || needle.split_whitespace().any(|w| text.to_lowercase().contains(w)) {
                    hits.push(entry.relative_path);
                }
            }
        }
        if hits.is_empty() {
            Ok(format!("No memory found relevant to: {question}"))
        } else {
            Ok(format!("Relevant memories: {}", hits.join(", ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lerim_core::paths::ensure_memory_paths;
    use lerim_memory::MemoryRepo;
    use tempfile::tempdir;

    fn context(dir: &Path) -> (MemoryRepo, std::path::PathBuf) {
        let paths = ensure_memory_paths(dir).unwrap();
        (MemoryRepo::new(paths.clone()), paths.memory_dir)
    }

    #[tokio::test]
    async fn stub_sync_writes_all_required_artifacts() {
        let data_dir = tempdir().unwrap();
        let (repo, memory_dir) = context(data_dir.path());
        let access_db = data_dir.path().join("memories.sqlite3");
        let tracker = AccessTracker::open(&access_db).unwrap();

        let workspace = data_dir.path().join("workspace");
        let run_folder = workspace.join("sync-20260101-000000-abc");
        std::fs::create_dir_all(&run_folder).unwrap();
        let trace_path = workspace.join("trace.jsonl");
        std::fs::write(&trace_path, r#"{"role":"user","content":"please remember the lock reclaim rule"}"#).unwrap();

        let roots = crate::tools::AllowedRoots::for_sync(&memory_dir, &workspace, &run_folder, &workspace, &[]);
        let ctx = ToolContext {
            roots,
            memory_repo: &repo,
            memory_root: memory_dir,
            access_tracker: Some(&tracker),
            memory_root_key: "project".to_string(),
        };

        let client = StubLlmClient::new();
        let input = SyncAgentInput {
            run_id: "sync-1",
            session_path: &trace_path,
            run_folder: &run_folder,
            agent_type: "claude",
        };
        client.run_sync(&ctx, &input).await.unwrap();

        for required in ["extract.json", "summary.json", "memory_actions.json", "subagents.log", "agent.log"] {
            assert!(run_folder.join(required).exists(), "missing {required}");
        }
        assert_eq!(repo.list(PrimitiveType::Learning).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stub_sync_is_no_op_on_identical_rerun() {
        let data_dir = tempdir().unwrap();
        let (repo, memory_dir) = context(data_dir.path());
        let access_db = data_dir.path().join("memories.sqlite3");
        let tracker = AccessTracker::open(&access_db).unwrap();
        let workspace = data_dir.path().join("workspace");
        let trace_path = workspace.join("trace.jsonl");
        std::fs::create_dir_all(&workspace).unwrap();
        std::fs::write(&trace_path, "fixed content that never changes between runs").unwrap();

        let client = StubLlmClient::new();

        for i in 0..2 {
            let run_folder = workspace.join(format!("sync-run-{i}"));
            std::fs::create_dir_all(&run_folder).unwrap();
            let roots = crate::tools::AllowedRoots::for_sync(&memory_dir, &workspace, &run_folder, &workspace, &[]);
            let ctx = ToolContext {
                roots,
                memory_repo: &repo,
                memory_root: memory_dir.clone(),
                access_tracker: Some(&tracker),
                memory_root_key: "project".to_string(),
            };
            let input = SyncAgentInput {
                run_id: "sync-fixed",
                session_path: &trace_path,
                run_folder: &run_folder,
                agent_type: "claude",
            };
            client.run_sync(&ctx, &input).await.unwrap();
        }

        assert_eq!(repo.list(PrimitiveType::Learning).unwrap().len(), 1);
        let second_actions: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(workspace.join("sync-run-1/memory_actions.json")).unwrap()).unwrap();
        assert_eq!(second_actions["counts"]["no_op"], 1);
    }
}
