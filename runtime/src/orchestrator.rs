//! Ties one agent invocation together: build the tool context, hand it to
//! an `LlmClient`, then validate whatever it left in the run folder
//! against the sync/maintain artifact contracts (§4.5, §4.6). Pipelines
//! call these two functions rather than talking to `LlmClient`/`tools`
//! directly, so the validation step can never be skipped by accident.

use std::path::{Path, PathBuf};

use lerim_catalog::AccessTracker;
use lerim_core::Result;
use lerim_memory::MemoryRepo;

use crate::contracts::{validate_maintain_artifacts, validate_sync_artifacts, MaintainResultContract, SyncResultContract};
use crate::llm::{LlmClient, MaintainAgentInput, SyncAgentInput};
use crate::tools::{AllowedRoots, ToolContext};

#[allow(clippy::too_many_arguments)]
pub async fn run_sync_agent(
    llm: &dyn LlmClient,
    memory_repo: &MemoryRepo,
    memory_root: &Path,
    memory_root_key: &str,
    access_tracker: Option<&AccessTracker>,
    workspace_root: &Path,
    run_folder: &Path,
    session_path: &Path,
    run_id: &str,
    agent_type: &str,
    extra_read_roots: &[PathBuf],
) -> Result<SyncResultContract> {
    std::fs::create_dir_all(run_folder)?;
    let trace_parent = session_path.parent().unwrap_or(workspace_root);
    let roots = AllowedRoots::for_sync(memory_root, workspace_root, run_folder, trace_parent, extra_read_roots);
    let ctx = ToolContext {
        roots,
        memory_repo,
        memory_root: memory_root.to_path_buf(),
        access_tracker,
        memory_root_key: memory_root_key.to_string(),
    };
    let input = SyncAgentInput {
        run_id,
        session_path,
        run_folder,
        agent_type,
    };
    llm.run_sync(&ctx, &input).await?;
    validate_sync_artifacts(run_folder, memory_root)
}

#[allow(clippy::too_many_arguments)]
pub async fn run_maintain_agent(
    llm: &dyn LlmClient,
    memory_repo: &MemoryRepo,
    memory_root: &Path,
    memory_root_key: &str,
    access_tracker: &AccessTracker,
    workspace_root: &Path,
    run_folder: &Path,
    decay_days: u32,
    min_confidence_floor: f64,
    grace_period_days: u32,
    archive_threshold: f64,
) -> Result<MaintainResultContract> {
    std::fs::create_dir_all(run_folder)?;
    let roots = AllowedRoots::for_maintain(memory_root, workspace_root, run_folder);
    let ctx = ToolContext {
        roots,
        memory_repo,
        memory_root: memory_root.to_path_buf(),
        access_tracker: Some(access_tracker),
        memory_root_key: memory_root_key.to_string(),
    };
    let input = MaintainAgentInput {
        run_folder,
        decay_days,
        min_confidence_floor,
        grace_period_days,
        archive_threshold,
        access_tracker,
        memory_root_key,
    };
    llm.run_maintain(&ctx, &input).await?;
    validate_maintain_artifacts(run_folder, memory_root)
}

pub async fn run_chat(
    llm: &dyn LlmClient,
    memory_repo: &MemoryRepo,
    memory_root: &Path,
    workspace_root: &Path,
    question: &str,
    limit: usize,
) -> Result<String> {
    let roots = AllowedRoots::for_chat(memory_root, workspace_root, workspace_root);
    let ctx = ToolContext {
        roots,
        memory_repo,
        memory_root: memory_root.to_path_buf(),
        access_tracker: None,
        memory_root_key: "chat".to_string(),
    };
    llm.chat(&ctx, question, limit).await
}
