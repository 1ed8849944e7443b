//! The maintain pipeline (§4.6): invokes the lead agent in maintain mode
//! against the current access statistics and decay policy, validates the
//! resulting actions, and records one service-run.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use lerim_catalog::{AccessTracker, AuditLog, WriterLock};
use lerim_core::{LerimError, Result};
use lerim_memory::MemoryRepo;
use lerim_runtime::{run_maintain_agent, LlmClient};

#[derive(Debug, Clone, Default)]
pub struct MaintainOptions {
    pub dry_run: bool,
    pub trigger: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MaintainSummary {
    pub memory_root: String,
    pub workspace_root: String,
    pub run_folder: Option<String>,
    pub merged: u32,
    pub archived: u32,
    pub consolidated: u32,
    pub decayed: u32,
    pub unchanged: u32,
    pub exit_code: i32,
}

#[derive(Clone)]
pub struct MaintainDeps {
    pub audit_log: AuditLog,
    pub memory_repo: MemoryRepo,
    pub memory_root: PathBuf,
    pub memory_root_key: String,
    pub workspace_dir: PathBuf,
    pub lock_path: PathBuf,
    pub access_tracker: AccessTracker,
    pub llm: Arc<dyn LlmClient>,
    pub decay_days: u32,
    pub min_confidence_floor: f64,
    pub grace_period_days: u32,
    pub archive_threshold: f64,
}

pub async fn run_maintain(deps: &MaintainDeps, opts: MaintainOptions) -> Result<MaintainSummary> {
    let audit_id = deps.audit_log.start("maintain", opts.trigger.as_deref().or(Some("manual")))?;

    if opts.dry_run {
        let summary = MaintainSummary {
            memory_root: deps.memory_root.display().to_string(),
            workspace_root: deps.workspace_dir.display().to_string(),
            run_folder: None,
            merged: 0,
            archived: 0,
            consolidated: 0,
            decayed: 0,
            unchanged: 0,
            exit_code: 0,
        };
        deps.audit_log.finish(
            audit_id,
            "ok",
            Some(serde_json::json!({"dry_run": true})),
        )?;
        return Ok(summary);
    }

    let lock = match WriterLock::acquire(&deps.lock_path, "maintain", "lerim maintain") {
        Ok(lock) => lock,
        Err(LerimError::LockBusy { pid, owner }) => {
            deps.audit_log.finish(
                audit_id,
                "lock_busy",
                Some(serde_json::json!({"held_by_pid": pid, "held_by_owner": owner})),
            )?;
            return Ok(MaintainSummary {
                memory_root: deps.memory_root.display().to_string(),
                workspace_root: deps.workspace_dir.display().to_string(),
                run_folder: None,
                merged: 0,
                archived: 0,
                consolidated: 0,
                decayed: 0,
                unchanged: 0,
                exit_code: 4,
            });
        }
        Err(other) => return Err(other),
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let run_folder = deps.workspace_dir.join(format!("maintain-{run_id}"));

    let result = run_maintain_agent(
        deps.llm.as_ref(),
        &deps.memory_repo,
        &deps.memory_root,
        &deps.memory_root_key,
        &deps.access_tracker,
        &deps.workspace_dir,
        &run_folder,
        deps.decay_days,
        deps.min_confidence_floor,
        deps.grace_period_days,
        deps.archive_threshold,
    )
    .await;

    lock.release()?;

    match result {
        Ok(contract) => {
            let counts = contract.maintain_actions.counts;
            let summary = MaintainSummary {
                memory_root: deps.memory_root.display().to_string(),
                workspace_root: deps.workspace_dir.display().to_string(),
                run_folder: Some(run_folder.display().to_string()),
                merged: counts.merged,
                archived: counts.archived,
                consolidated: counts.consolidated,
                decayed: counts.decayed,
                unchanged: counts.unchanged,
                exit_code: 0,
            };
            deps.audit_log.finish(
                audit_id,
                "ok",
                Some(serde_json::to_value(&summary).unwrap_or(serde_json::Value::Null)),
            )?;
            Ok(summary)
        }
        Err(err) => {
            deps.audit_log.finish(audit_id, "error", Some(serde_json::json!({"error": err.to_string()})))?;
            Err(err)
        }
    }
}
