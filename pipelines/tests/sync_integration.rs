//! End-to-end coverage for the sync pipeline: discovery through a real
//! adapter, enqueue, claim, agent invocation, and artifact validation,
//! all against a synthetic Claude-shaped transcript.

use std::fs;
use std::sync::Arc;

use lerim_adapters::PlatformRegistry;
use lerim_catalog::{AccessTracker, AuditLog, JobQueue, SessionCatalog};
use lerim_core::paths::ensure_memory_paths;
use lerim_memory::MemoryRepo;
use lerim_runtime::StubLlmClient;
use lerim_pipelines::{run_maintain, run_sync, MaintainDeps, MaintainOptions, SyncDeps, SyncOptions};

fn write_claude_session(dir: &std::path::Path, run_id: &str, note: &str) {
    let path = dir.join(format!("{run_id}.jsonl"));
    let lines = vec![
        serde_json::json!({
            "type": "user",
            "timestamp": "2026-07-20T10:00:00+00:00",
            "gitBranch": "main",
            "message": {"content": [{"type": "text", "text": format!("please remember: {note}")}]}
        }),
        serde_json::json!({
            "type": "assistant",
            "timestamp": "2026-07-20T10:00:05+00:00",
            "gitBranch": "main",
            "message": {
                "usage": {"input_tokens": 120, "output_tokens": 80},
                "content": [{"type": "text", "text": note}]
            }
        }),
        serde_json::json!({
            "type": "summary",
            "timestamp": "2026-07-20T10:00:06+00:00",
            "summary": note,
        }),
    ];
    let body = lines
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body).unwrap();
}

struct Harness {
    _root: tempfile::TempDir,
    sync_deps: SyncDeps,
    maintain_deps: MaintainDeps,
}

fn build_harness(run_id: &str, note: &str) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let traces_dir = root.path().join("traces");
    fs::create_dir_all(&traces_dir).unwrap();
    write_claude_session(&traces_dir, run_id, note);

    let registry = PlatformRegistry::new(root.path().join("platforms.json"));
    registry
        .connect("claude", Some(traces_dir.to_str().unwrap()))
        .unwrap();

    let memory_root = root.path().join("data");
    let memory_paths = ensure_memory_paths(&memory_root).unwrap();
    let memory_repo = MemoryRepo::new(memory_paths.clone());
    let workspace_dir = memory_paths.workspace_dir.clone();

    let session_catalog = SessionCatalog::open(&root.path().join("sessions.sqlite3")).unwrap();
    let job_queue = JobQueue::open(&root.path().join("jobs.sqlite3")).unwrap();
    let audit_log = AuditLog::open(&root.path().join("audit.sqlite3")).unwrap();
    let access_tracker = AccessTracker::open(&root.path().join("access.sqlite3")).unwrap();

    let llm: Arc<dyn lerim_runtime::LlmClient> = Arc::new(StubLlmClient);

    let sync_deps = SyncDeps {
        session_catalog,
        job_queue,
        audit_log,
        registry,
        memory_repo: MemoryRepo::new(memory_paths.clone()),
        memory_root: memory_root.clone(),
        memory_root_key: "project".to_string(),
        workspace_dir: workspace_dir.clone(),
        lock_path: root.path().join("sync.lock"),
        access_tracker: Some(AccessTracker::open(&root.path().join("access.sqlite3")).unwrap()),
        llm: llm.clone(),
        claim_timeout_seconds: 300,
        max_attempts: 3,
    };

    let maintain_deps = MaintainDeps {
        audit_log: AuditLog::open(&root.path().join("audit.sqlite3")).unwrap(),
        memory_repo,
        memory_root,
        memory_root_key: "project".to_string(),
        workspace_dir,
        lock_path: root.path().join("maintain.lock"),
        access_tracker,
        llm,
        decay_days: 90,
        min_confidence_floor: 0.2,
        grace_period_days: 14,
        archive_threshold: 0.15,
    };

    Harness {
        _root: root,
        sync_deps,
        maintain_deps,
    }
}

#[tokio::test]
async fn run_sync_indexes_extracts_and_writes_a_learning() {
    let harness = build_harness("run-one", "prefer tabs over spaces in this repo");

    let summary = run_sync(&harness.sync_deps, SyncOptions::with_defaults())
        .await
        .expect("sync should succeed");

    assert_eq!(summary.indexed_sessions, 1);
    assert_eq!(summary.extracted_sessions, 1);
    assert_eq!(summary.failed_sessions, 0);
    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.learnings_new, 1);
    assert_eq!(summary.run_ids, vec!["run-one".to_string()]);

    let statuses = harness.sync_deps.job_queue.count_by_status().unwrap();
    assert_eq!(statuses.get("done").copied().unwrap_or(0), 1);
}

#[tokio::test]
async fn run_sync_is_idempotent_on_an_unchanged_session() {
    let harness = build_harness("run-two", "always run the linter before committing");

    let first = run_sync(&harness.sync_deps, SyncOptions::with_defaults()).await.unwrap();
    assert_eq!(first.extracted_sessions, 1);
    assert_eq!(first.learnings_new, 1);

    let second = run_sync(&harness.sync_deps, SyncOptions::with_defaults()).await.unwrap();
    assert_eq!(second.indexed_sessions, 0, "unchanged session content hash should not re-index");
    assert_eq!(second.extracted_sessions, 0);
}

#[tokio::test]
async fn run_sync_no_extract_only_indexes() {
    let harness = build_harness("run-three", "never force-push to main");

    let summary = run_sync(
        &harness.sync_deps,
        SyncOptions {
            no_extract: true,
            ..SyncOptions::with_defaults()
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.indexed_sessions, 1);
    assert_eq!(summary.extracted_sessions, 0);
    assert_eq!(summary.exit_code, 0);

    let statuses = harness.sync_deps.job_queue.count_by_status().unwrap();
    assert_eq!(statuses.get("pending").copied().unwrap_or(0), 1);
}

#[tokio::test]
async fn run_maintain_dry_run_leaves_memory_untouched() {
    let harness = build_harness("run-four", "document the release checklist");
    run_sync(&harness.sync_deps, SyncOptions::with_defaults()).await.unwrap();

    let summary = run_maintain(
        &harness.maintain_deps,
        MaintainOptions {
            dry_run: true,
            trigger: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(summary.exit_code, 0);
    assert_eq!(summary.archived, 0);
    assert!(summary.run_folder.is_none());
}

#[tokio::test]
async fn run_maintain_after_sync_completes_without_archiving_fresh_learnings() {
    let harness = build_harness("run-five", "keep migrations reversible");
    run_sync(&harness.sync_deps, SyncOptions::with_defaults()).await.unwrap();

    let summary = run_maintain(&harness.maintain_deps, MaintainOptions::default())
        .await
        .unwrap();

    assert_eq!(summary.exit_code, 0);
    assert!(summary.run_folder.is_some());
    assert_eq!(summary.archived, 0, "a learning written moments ago shouldn't already be below the archive threshold");
}
