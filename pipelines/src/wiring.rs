//! Builds the catalog/queue/lock/memory handles every entry point (CLI,
//! daemon, HTTP API) needs to run a sync or maintain cycle, from one
//! resolved [`Config`]. Kept in one place so the wiring a process does at
//! startup can't drift between the CLI and the server.

use std::sync::Arc;

use lerim_adapters::PlatformRegistry;
use lerim_catalog::{AccessTracker, AuditLog, JobQueue, SessionCatalog};
use lerim_core::paths::ensure_memory_paths;
use lerim_core::{Config, Result};
use lerim_memory::MemoryRepo;
use lerim_runtime::LlmClient;

use crate::maintain::MaintainDeps;
use crate::sync::SyncDeps;

/// `"project"` when the resolved data root sits under the discovered git
/// root, `"global"` otherwise. Used as the access tracker's `memory_root`
/// discriminator so the same relative memory path in two scopes is
/// tracked independently.
pub fn memory_root_key(config: &Config) -> &'static str {
    if config.data_dir == config.global_data_dir {
        "global"
    } else {
        "project"
    }
}

/// Assembles the full set of durable handles (catalog DBs, memory tree,
/// registry, lock path) needed to drive both pipelines, sharing the
/// session catalog and the LLM client between them.
#[derive(Clone)]
pub struct PipelineHandles {
    pub sync_deps: SyncDeps,
    pub maintain_deps: MaintainDeps,
}

pub fn build_pipeline_handles(config: &Config, llm: Arc<dyn LlmClient>) -> Result<PipelineHandles> {
    let memory_paths = ensure_memory_paths(&config.data_dir)?;
    let memory_root_key = memory_root_key(config).to_string();

    let session_catalog = SessionCatalog::open(&config.sessions_db_path)?;
    let job_queue = JobQueue::open(&config.sessions_db_path)?;
    let audit_log = AuditLog::open(&config.sessions_db_path)?;
    let access_tracker = AccessTracker::open(&config.memories_db_path)?;
    let registry = PlatformRegistry::new(config.platforms_path.clone());
    registry.auto_seed()?;

    let lock_path = config.global_data_dir.join("index").join("writer.lock");

    let sync_deps = SyncDeps {
        session_catalog,
        job_queue,
        audit_log,
        registry,
        memory_repo: MemoryRepo::new(memory_paths.clone()),
        memory_root: memory_paths.memory_dir.clone(),
        memory_root_key: memory_root_key.clone(),
        workspace_dir: memory_paths.workspace_dir.clone(),
        lock_path: lock_path.clone(),
        access_tracker: Some(access_tracker.clone()),
        llm: llm.clone(),
        claim_timeout_seconds: config.claim_timeout_seconds as i64,
        max_attempts: config.max_attempts as i64,
    };

    let maintain_deps = MaintainDeps {
        audit_log: AuditLog::open(&config.sessions_db_path)?,
        memory_repo: MemoryRepo::new(memory_paths.clone()),
        memory_root: memory_paths.memory_dir.clone(),
        memory_root_key,
        workspace_dir: memory_paths.workspace_dir.clone(),
        lock_path,
        access_tracker,
        llm,
        decay_days: config.decay_days,
        min_confidence_floor: config.decay_min_confidence_floor,
        grace_period_days: config.decay_recent_access_grace_days,
        archive_threshold: config.decay_archive_threshold,
    };

    Ok(PipelineHandles { sync_deps, maintain_deps })
}
