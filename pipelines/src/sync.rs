//! The sync pipeline (§4.5): discovers new/changed sessions via the
//! connected adapters, enqueues them, claims and processes them through
//! the runtime agent, and records one service-run summarizing the cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use lerim_adapters::{adapter_for, PlatformRegistry};
use lerim_catalog::{AccessTracker, AuditLog, EnqueueOptions, JobQueue, JobStatus, SessionCatalog, WriterLock, JOB_TYPE_EXTRACT};
use lerim_core::window::{parse_window, since_bound};
use lerim_core::{LerimError, Result};
use lerim_memory::MemoryRepo;
use lerim_runtime::{run_sync_agent, LlmClient};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub target_run_id: Option<String>,
    pub agent_types: Vec<String>,
    pub window: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub max_sessions: usize,
    pub no_extract: bool,
    pub force: bool,
    pub dry_run: bool,
    pub ignore_lock: bool,
    pub trigger: Option<String>,
}

impl SyncOptions {
    pub fn with_defaults() -> Self {
        SyncOptions {
            max_sessions: 20,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub indexed_sessions: u32,
    pub extracted_sessions: u32,
    pub skipped_sessions: u32,
    pub failed_sessions: u32,
    pub learnings_new: u32,
    pub learnings_updated: u32,
    pub run_ids: Vec<String>,
    pub exit_code: i32,
}

/// Everything the pipeline needs, gathered once by the caller (CLI/daemon/
/// API) from a resolved `Runtime`. Cloneable so a long-lived server can
/// hand an owned copy to each background sync task it spawns.
#[derive(Clone)]
pub struct SyncDeps {
    pub session_catalog: SessionCatalog,
    pub job_queue: JobQueue,
    pub audit_log: AuditLog,
    pub registry: PlatformRegistry,
    pub memory_repo: MemoryRepo,
    pub memory_root: PathBuf,
    pub memory_root_key: String,
    pub workspace_dir: PathBuf,
    pub lock_path: PathBuf,
    pub access_tracker: Option<AccessTracker>,
    pub llm: Arc<dyn LlmClient>,
    pub claim_timeout_seconds: i64,
    pub max_attempts: i64,
}

fn resolve_window(opts: &SyncOptions, now: DateTime<Utc>) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let has_explicit_bounds = opts.since.is_some() || opts.until.is_some();
    if opts.window.is_some() && has_explicit_bounds {
        return Err(LerimError::Other(
            "cannot combine --window with an explicit --since/--until".to_string(),
        ));
    }

    if let Some(raw) = &opts.window {
        let parsed = parse_window(raw)?;
        return Ok((since_bound(parsed, now), None));
    }

    Ok((opts.since, opts.until))
}

pub async fn run_sync(deps: &SyncDeps, opts: SyncOptions) -> Result<SyncSummary> {
    let now = Utc::now();
    let (since, until) = resolve_window(&opts, now)?;

    let audit_id = deps.audit_log.start(
        "sync",
        opts.trigger.as_deref().or(Some("manual")),
    )?;

    let lock = if opts.dry_run || opts.ignore_lock {
        None
    } else {
        match WriterLock::acquire(&deps.lock_path, "sync", "lerim sync") {
            Ok(lock) => Some(lock),
            Err(LerimError::LockBusy { pid, owner }) => {
                deps.audit_log.finish(
                    audit_id,
                    "lock_busy",
                    Some(serde_json::json!({"held_by_pid": pid, "held_by_owner": owner})),
                )?;
                return Ok(SyncSummary {
                    indexed_sessions: 0,
                    extracted_sessions: 0,
                    skipped_sessions: 0,
                    failed_sessions: 0,
                    learnings_new: 0,
                    learnings_updated: 0,
                    run_ids: vec![],
                    exit_code: 4,
                });
            }
            Err(other) => return Err(other),
        }
    };

    let result = run_sync_inner(deps, &opts, since, until).await;

    if let Some(lock) = lock {
        lock.release()?;
    }

    match &result {
        Ok(summary) => {
            let status = if summary.exit_code == 0 { "ok" } else if summary.exit_code == 3 { "partial" } else { "failed" };
            deps.audit_log.finish(
                audit_id,
                status,
                Some(serde_json::to_value(summary).unwrap_or(serde_json::Value::Null)),
            )?;
        }
        Err(err) => {
            deps.audit_log.finish(audit_id, "error", Some(serde_json::json!({"error": err.to_string()})))?;
        }
    }

    result
}

async fn run_sync_inner(
    deps: &SyncDeps,
    opts: &SyncOptions,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<SyncSummary> {
    let mut indexed = 0u32;
    let mut target_run_ids: Vec<String> = Vec::new();

    if let Some(run_id) = &opts.target_run_id {
        if let Some(record) = deps.session_catalog.get_by_run_id(run_id)? {
            deps.job_queue.enqueue(
                run_id,
                JOB_TYPE_EXTRACT,
                EnqueueOptions {
                    agent_type: Some(record.agent_type.clone()),
                    session_path: Some(record.session_path.clone()),
                    start_time: Some(record.start_time),
                    trigger: opts.trigger.clone(),
                    force: true,
                    max_attempts: deps.max_attempts,
                },
            )?;
            target_run_ids.push(run_id.clone());
        }
    } else {
        let platforms = deps.registry.connected_platform_paths()?;
        let selected: Vec<(String, PathBuf)> = platforms
            .into_iter()
            .filter(|(name, _)| opts.agent_types.is_empty() || opts.agent_types.contains(name))
            .collect();

        for (name, path) in selected {
            let Ok(adapter) = adapter_for(&name) else { continue };
            let known_hashes = deps.session_catalog.known_run_hashes(&name)?;
            let discovered = adapter.iter_sessions(Some(&path), since, until, Some(&known_hashes));

            for session in discovered {
                let changed = known_hashes
                    .get(&session.run_id)
                    .map(|existing| existing != &session.content_hash)
                    .unwrap_or(true);

                let record = lerim_catalog::SessionRecord {
                    run_id: session.run_id.clone(),
                    agent_type: session.agent_type.clone(),
                    session_path: session.session_path.clone(),
                    start_time: session.start_time.unwrap_or(now_or(since)),
                    repo_name: session.repo_name.clone(),
                    message_count: session.message_count,
                    tool_call_count: session.tool_call_count,
                    error_count: session.error_count,
                    total_tokens: session.total_tokens,
                    summaries: session.summaries.clone(),
                    content_hash: session.content_hash.clone(),
                    status: session.status.clone(),
                    duration_ms: Some(session.duration_ms),
                    outcome: None,
                    indexed_at: Utc::now(),
                    tags: Vec::new(),
                    turns_json: None,
                    summary_text: None,
                };
                deps.session_catalog.upsert_session(&record)?;
                indexed += 1;

                deps.job_queue.enqueue(
                    &session.run_id,
                    JOB_TYPE_EXTRACT,
                    EnqueueOptions {
                        agent_type: Some(session.agent_type.clone()),
                        session_path: Some(session.session_path.clone()),
                        start_time: session.start_time,
                        trigger: opts.trigger.clone(),
                        force: changed || opts.force,
                        max_attempts: deps.max_attempts,
                    },
                )?;
                target_run_ids.push(session.run_id.clone());
            }
        }
    }

    if opts.no_extract {
        return Ok(SyncSummary {
            indexed_sessions: indexed,
            extracted_sessions: 0,
            skipped_sessions: 0,
            failed_sessions: 0,
            learnings_new: 0,
            learnings_updated: 0,
            run_ids: target_run_ids,
            exit_code: 0,
        });
    }

    let run_id_filter = if target_run_ids.is_empty() { None } else { Some(target_run_ids.as_slice()) };
    let claimed = deps.job_queue.claim_jobs(
        opts.max_sessions.max(1),
        run_id_filter,
        JOB_TYPE_EXTRACT,
        deps.claim_timeout_seconds,
    )?;

    let mut extracted = 0u32;
    let mut failed = 0u32;
    let mut learnings_new = 0u32;
    let mut learnings_updated = 0u32;

    for job in claimed {
        let cancel = CancellationToken::new();
        let heartbeat_queue = deps.job_queue.clone();
        let heartbeat_run_id = job.run_id.clone();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                        let _ = heartbeat_queue.heartbeat(&heartbeat_run_id, JOB_TYPE_EXTRACT);
                    }
                }
            }
        });

        let session_path = job.session_path.clone().unwrap_or_default();
        let run_folder = deps.workspace_dir.join(format!("sync-{}", job.run_id));
        let outcome = run_sync_agent(
            deps.llm.as_ref(),
            &deps.memory_repo,
            &deps.memory_root,
            &deps.memory_root_key,
            deps.access_tracker.as_ref(),
            &deps.workspace_dir,
            &run_folder,
            &PathBuf::from(&session_path),
            &job.run_id,
            job.agent_type.as_deref().unwrap_or("unknown"),
            &[],
        )
        .await;

        cancel.cancel();
        let _ = heartbeat_handle.await;

        match outcome {
            Ok(contract) => {
                deps.job_queue.complete(&job.run_id, JOB_TYPE_EXTRACT)?;
                extracted += 1;
                learnings_new += contract.memory_actions.counts.add;
                learnings_updated += contract.memory_actions.counts.update;
            }
            Err(err) => {
                tracing::warn!(run_id = %job.run_id, error = %err, "sync job failed");
                deps.job_queue.fail(&job.run_id, JOB_TYPE_EXTRACT, &err.to_string())?;
                failed += 1;
            }
        }
    }

    let skipped = deps.job_queue.count_by_status()?.get(JobStatus::Pending.as_str()).copied().unwrap_or(0) as u32;

    let exit_code = if failed == 0 {
        0
    } else if extracted > 0 {
        3
    } else if indexed == 0 && extracted == 0 {
        1
    } else {
        1
    };

    Ok(SyncSummary {
        indexed_sessions: indexed,
        extracted_sessions: extracted,
        skipped_sessions: skipped,
        failed_sessions: failed,
        learnings_new,
        learnings_updated,
        run_ids: target_run_ids,
        exit_code,
    })
}

fn now_or(since: Option<DateTime<Utc>>) -> DateTime<Utc> {
    since.unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_window_rejects_combining_window_and_since() {
        let opts = SyncOptions {
            window: Some("1d".to_string()),
            since: Some(Utc::now()),
            ..Default::default()
        };
        let result = resolve_window(&opts, Utc::now());
        assert!(result.is_err());
    }

    #[test]
    fn resolve_window_parses_duration_grammar() {
        let opts = SyncOptions {
            window: Some("1h".to_string()),
            ..Default::default()
        };
        let now = Utc::now();
        let (since, until) = resolve_window(&opts, now).unwrap();
        assert!(since.is_some());
        assert!(until.is_none());
        assert_eq!(now - since.unwrap(), chrono::Duration::hours(1));
    }

    #[test]
    fn resolve_window_all_has_no_lower_bound() {
        let opts = SyncOptions {
            window: Some("all".to_string()),
            ..Default::default()
        };
        let (since, _) = resolve_window(&opts, Utc::now()).unwrap();
        assert!(since.is_none());
    }
}
