//! HTTP handlers for the Lerim API surface (§6). Every handler takes the
//! shared [`ApiState`] and returns `Result<Json<T>, StatusCode>`, mapping
//! domain errors through [`lerim_core::LerimError::status_code`] so the
//! CLI/API boundary never has to re-derive its own status mapping.

use std::sync::Arc;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use uuid::Uuid;

use lerim_core::project_scope::ProjectRegistry;
use lerim_memory::primitive::PrimitiveType;
use lerim_pipelines::{MaintainOptions, SyncOptions};

use crate::models::*;

/// Shared handles every handler reaches through. Built once at server
/// startup by [`crate::server::ApiServer::new`] from a resolved `Config`.
pub struct ApiState {
    pub config: lerim_core::Config,
    pub handles: lerim_pipelines::PipelineHandles,
    pub session_catalog: lerim_catalog::SessionCatalog,
    pub job_queue: lerim_catalog::JobQueue,
    pub audit_log: lerim_catalog::AuditLog,
    pub access_tracker: lerim_catalog::AccessTracker,
    pub platform_registry: lerim_adapters::PlatformRegistry,
    pub project_registry: ProjectRegistry,
    pub memory_repo: lerim_memory::MemoryRepo,
    pub llm: Arc<dyn lerim_runtime::LlmClient>,
}

fn err_status(err: lerim_core::LerimError) -> StatusCode {
    tracing::error!(error = %err, "request failed");
    err.status_code()
}

#[debug_handler]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[debug_handler]
pub async fn status(State(state): State<Arc<ApiState>>) -> Result<Json<StatusResponse>, StatusCode> {
    let connected_agents = state.platform_registry.connected_agents().map_err(err_status)?;
    let platforms = state.platform_registry.list(false);

    let mut memory_count: u64 = 0;
    for primitive_type in [PrimitiveType::Decision, PrimitiveType::Learning, PrimitiveType::Summary] {
        memory_count += state.memory_repo.list(primitive_type).map_err(err_status)?.len() as u64;
    }

    let sessions_indexed_count = state.session_catalog.stats().map_err(err_status)?.total_sessions;
    let queue_counts = state.job_queue.count_by_status().map_err(err_status)?;
    let latest_sync = state.audit_log.latest("sync").map_err(err_status)?;
    let latest_maintain = state.audit_log.latest("maintain").map_err(err_status)?;

    Ok(Json(StatusResponse {
        connected_agents,
        platforms,
        memory_count,
        sessions_indexed_count,
        queue_counts,
        latest_sync,
        latest_maintain,
        timestamp: chrono::Utc::now(),
    }))
}

#[debug_handler]
pub async fn list_runs(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<RunsResponse>, StatusCode> {
    let limit = query.limit.unwrap_or(50).min(500);
    let offset = query.offset.unwrap_or(0);
    let agent_types: Vec<String> = query.agent_type.into_iter().collect();

    let (mut runs, total) = state
        .session_catalog
        .list_window(limit, offset, &agent_types, None, None)
        .map_err(err_status)?;

    if let Some(scope) = query.scope.as_deref() {
        runs.retain(|r| r.repo_name.as_deref() == Some(scope));
    }

    let has_more = (offset as u64 + runs.len() as u64) < total;
    Ok(Json(RunsResponse { runs, total, has_more }))
}

#[debug_handler]
pub async fn run_stats(
    State(state): State<Arc<ApiState>>,
    Query(_query): Query<RunStatsQuery>,
) -> Result<Json<lerim_catalog::SessionStats>, StatusCode> {
    Ok(Json(state.session_catalog.stats().map_err(err_status)?))
}

#[debug_handler]
pub async fn run_messages(
    State(state): State<Arc<ApiState>>,
    Path(run_id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let record = state
        .session_catalog
        .get_by_run_id(&run_id)
        .map_err(err_status)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let turns: serde_json::Value = record
        .turns_json
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or(serde_json::Value::Array(vec![]));

    Ok(Json(serde_json::json!({
        "run_id": record.run_id,
        "agent_type": record.agent_type,
        "turns": turns,
    })))
}

/// Highlights the first match of `query` inside `text` with `**...**`
/// markers, truncated to a readable window either side.
fn highlight_snippet(text: &str, query: &str) -> String {
    const WINDOW: usize = 160;
    let lower_text = text.to_lowercase();
    let lower_query = query.to_lowercase();
    let Some(pos) = lower_text.find(&lower_query) else {
        return text.chars().take(WINDOW).collect();
    };
    let start = pos.saturating_sub(WINDOW / 2);
    let end = (pos + lower_query.len() + WINDOW / 2).min(text.len());
    let before = &text[start..pos];
    let matched = &text[pos..pos + lower_query.len()];
    let after = &text[pos + lower_query.len()..end];
    format!("{before}**{matched}**{after}")
}

#[debug_handler]
pub async fn search(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let limit = query.limit.unwrap_or(20).min(200);

    let (mut records, mode) = if let Some(text) = query.query.as_deref().filter(|s| !s.is_empty()) {
        (state.session_catalog.search(text, limit).map_err(err_status)?, "fts")
    } else {
        let agent_types: Vec<String> = query.agent_type.clone().into_iter().collect();
        let (records, _total) = state
            .session_catalog
            .list_window(limit, 0, &agent_types, None, None)
            .map_err(err_status)?;
        (records, "keyword")
    };

    if let Some(scope) = query.scope.as_deref() {
        records.retain(|r| r.repo_name.as_deref() == Some(scope));
    }
    if let Some(status) = query.status.as_deref() {
        records.retain(|r| r.status == status);
    }
    if let Some(repo) = query.repo.as_deref() {
        records.retain(|r| r.repo_name.as_deref() == Some(repo));
    }

    let query_text = query.query.clone().unwrap_or_default();
    let hits = records
        .into_iter()
        .map(|record| {
            let source = record.summary_text.clone().unwrap_or_else(|| record.summaries.join(" "));
            let snippet = if query_text.is_empty() {
                source.chars().take(160).collect()
            } else {
                highlight_snippet(&source, &query_text)
            };
            SearchHit {
                run_id: record.run_id,
                agent_type: record.agent_type,
                repo_name: record.repo_name,
                snippet,
            }
        })
        .collect();

    Ok(Json(SearchResponse { hits, mode }))
}

fn effective_confidence_for(
    state: &ApiState,
    memory_id: &str,
    confidence: f64,
    created_at: chrono::DateTime<chrono::Utc>,
) -> f64 {
    let memory_root_key = lerim_pipelines::memory_root_key(&state.config);
    let last_access = state.access_tracker.last_access(memory_id, memory_root_key).ok().flatten();
    lerim_catalog::effective_confidence(
        confidence,
        created_at,
        last_access,
        chrono::Utc::now(),
        state.config.decay_days,
        state.config.decay_min_confidence_floor,
        state.config.decay_recent_access_grace_days,
    )
}

#[debug_handler]
pub async fn list_memories(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MemoriesQuery>,
) -> Result<Json<Vec<MemorySummary>>, StatusCode> {
    let types = match query.primitive_type.as_deref() {
        Some("decisions") => vec![PrimitiveType::Decision],
        Some("learnings") => vec![PrimitiveType::Learning],
        Some("summaries") => vec![PrimitiveType::Summary],
        _ => vec![PrimitiveType::Decision, PrimitiveType::Learning, PrimitiveType::Summary],
    };
    let archived_only = query.state.as_deref() == Some("archived");

    let mut out = Vec::new();
    for primitive_type in types {
        let entries = if archived_only {
            state.memory_repo.list_archived(primitive_type).map_err(err_status)?
        } else {
            state.memory_repo.list(primitive_type).map_err(err_status)?
        };
        for entry in entries {
            if primitive_type == PrimitiveType::Summary {
                continue;
            }
            let filename = entry
                .relative_path
                .rsplit('/')
                .next()
                .unwrap_or(&entry.relative_path)
                .to_string();
            let primitive = match state.memory_repo.read_primitive(primitive_type, &filename) {
                Ok(p) => p,
                Err(_) => continue,
            };

            if let Some(needle) = query.query.as_deref() {
                let haystack = format!("{} {}", primitive.frontmatter.title, primitive.body).to_lowercase();
                if !haystack.contains(&needle.to_lowercase()) {
                    continue;
                }
            }

            let memory_id = primitive.frontmatter.id.clone();
            let effective = effective_confidence_for(
                &state,
                &memory_id,
                primitive.frontmatter.confidence,
                primitive.frontmatter.created,
            );

            out.push(MemorySummary {
                relative_path: entry.relative_path,
                title: primitive.frontmatter.title,
                confidence: primitive.frontmatter.confidence,
                effective_confidence: effective,
                tags: primitive.frontmatter.tags,
            });
        }
    }
    Ok(Json(out))
}

#[debug_handler]
pub async fn get_memory(
    State(state): State<Arc<ApiState>>,
    Path(relative_path): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let mut parts = relative_path.splitn(2, '/');
    let folder = parts.next().unwrap_or_default();
    let filename = parts.next().ok_or(StatusCode::BAD_REQUEST)?;
    let primitive_type = PrimitiveType::from_folder(folder).map_err(err_status)?;

    let primitive = state
        .memory_repo
        .read_primitive(primitive_type, filename)
        .map_err(err_status)?;

    Ok(Json(serde_json::to_value(&primitive.frontmatter).unwrap_or_default()))
}

#[debug_handler]
pub async fn connect_status(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<lerim_adapters::registry::PlatformStatus>>, StatusCode> {
    Ok(Json(state.platform_registry.list(true)))
}

#[debug_handler]
pub async fn connect(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConnectRequest>,
) -> Result<Json<lerim_adapters::registry::ConnectResult>, StatusCode> {
    let result = state
        .platform_registry
        .connect(&request.platform, request.path.as_deref())
        .map_err(err_status)?;
    Ok(Json(result))
}

#[debug_handler]
pub async fn project_add(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ProjectAddRequest>,
) -> Result<Json<lerim_core::project_scope::TrackedProject>, StatusCode> {
    let project = state.project_registry.add(&request.path).map_err(err_status)?;
    Ok(Json(project))
}

#[debug_handler]
pub async fn project_remove(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ProjectRemoveRequest>,
) -> Result<Json<ProjectActionResponse>, StatusCode> {
    let removed = state.project_registry.remove(&request.name).map_err(err_status)?;
    if !removed {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(ProjectActionResponse { status: "removed" }))
}

#[debug_handler]
pub async fn project_list(
    State(state): State<Arc<ApiState>>,
) -> Json<Vec<lerim_core::project_scope::TrackedProject>> {
    Json(state.project_registry.list())
}

/// Synchronous chat, bounded to five minutes per §6 — a stuck LLM call
/// never hangs the HTTP connection open indefinitely.
#[debug_handler]
pub async fn chat(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, StatusCode> {
    let memory_root = state.handles.sync_deps.memory_root.clone();
    let workspace_root = state.handles.sync_deps.workspace_dir.clone();
    let memory_repo = state.memory_repo.clone();
    let llm = state.llm.clone();
    let question = request.question.clone();
    let limit = request.limit;

    let answer = tokio::time::timeout(
        std::time::Duration::from_secs(300),
        lerim_runtime::run_chat(llm.as_ref(), &memory_repo, &memory_root, &workspace_root, &question, limit),
    )
    .await
    .map_err(|_| StatusCode::GATEWAY_TIMEOUT)?
    .map_err(err_status)?;

    Ok(Json(ChatResponse { answer }))
}

/// Kicks off a sync cycle on a background task and returns immediately;
/// the cycle's outcome lands in the audit log, polled via `/api/status`.
#[debug_handler]
pub async fn sync(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<JobStartedResponse>, StatusCode> {
    let job_id = Uuid::new_v4().to_string();
    let deps = state.handles.sync_deps.clone();
    let opts = SyncOptions {
        agent_types: request.agent.into_iter().collect(),
        window: request.window,
        max_sessions: request.max_sessions.unwrap_or(20),
        force: request.force.unwrap_or(false),
        dry_run: request.dry_run.unwrap_or(false),
        trigger: Some("api".to_string()),
        ..Default::default()
    };

    tokio::spawn(async move {
        if let Err(err) = lerim_pipelines::run_sync(&deps, opts).await {
            tracing::error!(error = %err, "background sync failed");
        }
    });

    Ok(Json(JobStartedResponse { status: "started", job_id }))
}

#[debug_handler]
pub async fn maintain(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<MaintainRequest>,
) -> Result<Json<JobStartedResponse>, StatusCode> {
    let job_id = Uuid::new_v4().to_string();
    let deps = state.handles.maintain_deps.clone();
    let opts = MaintainOptions {
        dry_run: request.dry_run.unwrap_or(false),
        trigger: Some("api".to_string()),
        ..Default::default()
    };
    let _ = request.force;

    tokio::spawn(async move {
        if let Err(err) = lerim_pipelines::run_maintain(&deps, opts).await {
            tracing::error!(error = %err, "background maintain failed");
        }
    });

    Ok(Json(JobStartedResponse { status: "started", job_id }))
}

#[debug_handler]
pub async fn get_config(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(state.config.public_dict())
}

/// Deep-merges `patch` into the project config file and rewrites it to
/// disk. The in-memory `ApiState::config` is not mutated — a fresh process
/// (or the next `Config::load`) picks up the change, matching the CLI's
/// own config-edit semantics.
#[debug_handler]
pub async fn patch_config(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConfigPatchRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let project_root = lerim_core::project_scope::git_root_for(&state.config.data_dir);
    let config_path = match project_root {
        Some(root) => root.join(".lerim").join("config.toml"),
        None => dirs::home_dir()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
            .join(".lerim")
            .join("config.toml"),
    };

    let existing_toml = std::fs::read_to_string(&config_path).unwrap_or_default();
    let mut existing: toml::Value = existing_toml.parse().unwrap_or(toml::Value::Table(Default::default()));
    let patch_toml: toml::Value = serde_json::from_value(request.patch.clone())
        .map_err(lerim_core::LerimError::from)
        .map_err(err_status)?;
    deep_merge_toml(&mut existing, patch_toml);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(lerim_core::LerimError::from).map_err(err_status)?;
    }
    let rendered = toml::to_string_pretty(&existing).map_err(|e| {
        tracing::error!(error = %e, "failed to render patched config");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    std::fs::write(&config_path, rendered).map_err(lerim_core::LerimError::from).map_err(err_status)?;

    Ok(Json(serde_json::json!({"status": "patched", "path": config_path.display().to_string()})))
}

fn deep_merge_toml(base: &mut toml::Value, patch: toml::Value) {
    match (base, patch) {
        (toml::Value::Table(base_table), toml::Value::Table(patch_table)) => {
            for (key, value) in patch_table {
                deep_merge_toml(base_table.entry(key).or_insert(toml::Value::Table(Default::default())), value);
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value,
    }
}

/// The API is read-only for everything except the explicit mutation routes
/// above: any `PUT`/`DELETE` falls through to this handler.
#[debug_handler]
pub async fn read_only() -> (StatusCode, Json<ReadOnlyResponse>) {
    (StatusCode::FORBIDDEN, Json(ReadOnlyResponse { error: "read-only" }))
}
