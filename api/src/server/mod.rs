//! HTTP server wiring: builds [`ApiState`] from a resolved [`Config`] via
//! [`lerim_pipelines::build_pipeline_handles`] (the same entry point the
//! CLI uses), then mounts the route table from §6 on an [`axum::Router`].

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use lerim_adapters::PlatformRegistry;
use lerim_catalog::{AccessTracker, AuditLog, JobQueue, SessionCatalog};
use lerim_core::paths::ensure_memory_paths;
use lerim_core::project_scope::ProjectRegistry;
use lerim_core::Config;
use lerim_memory::MemoryRepo;
use lerim_pipelines::build_pipeline_handles;
use lerim_runtime::LlmClient;

use crate::handlers::{
    chat, connect, connect_status, get_config, get_memory, health_check, list_memories, list_runs,
    maintain, patch_config, project_add, project_list, project_remove, read_only, run_messages,
    run_stats, search, status, sync, ApiState,
};

/// Owns the shared state and the route table; `start` is the only thing
/// that actually binds a socket, so tests can build a `Router` directly
/// via `router()` without touching the network.
pub struct ApiServer {
    config: Config,
    state: Arc<ApiState>,
}

impl ApiServer {
    /// Assembles every durable handle an API process needs from one
    /// resolved config, reusing [`build_pipeline_handles`] so the sync/
    /// maintain wiring can never drift from what the CLI does.
    pub fn new(config: Config, llm: Arc<dyn LlmClient>) -> lerim_core::Result<Self> {
        let memory_paths = ensure_memory_paths(&config.data_dir)?;
        let handles = build_pipeline_handles(&config, llm.clone())?;

        let state = Arc::new(ApiState {
            session_catalog: SessionCatalog::open(&config.sessions_db_path)?,
            job_queue: JobQueue::open(&config.sessions_db_path)?,
            audit_log: AuditLog::open(&config.sessions_db_path)?,
            access_tracker: AccessTracker::open(&config.memories_db_path)?,
            platform_registry: PlatformRegistry::new(config.platforms_path.clone()),
            project_registry: ProjectRegistry::new(lerim_core::paths::projects_path(&config.global_data_dir)),
            memory_repo: MemoryRepo::new(memory_paths),
            llm,
            handles,
            config: config.clone(),
        });

        Ok(Self { config, state })
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/health", get(health_check))
            .route("/api/status", get(status))
            .route("/api/runs", get(list_runs))
            .route("/api/runs/stats", get(run_stats))
            .route("/api/runs/:id/messages", get(run_messages))
            .route("/api/search", get(search))
            .route("/api/memories", get(list_memories))
            .route("/api/memories/*relative_path", get(get_memory))
            .route("/api/connect", get(connect_status).post(connect))
            .route("/api/project/add", post(project_add))
            .route("/api/project/remove", post(project_remove))
            .route("/api/project", get(project_list))
            .route("/api/chat", post(chat))
            .route("/api/sync", post(sync))
            .route("/api/maintain", post(maintain))
            .route("/api/config", get(get_config).patch(patch_config))
            .fallback(read_only)
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.server_host, self.config.server_port);
        info!("lerim API listening on {addr}");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app).await.map_err(|e| anyhow::anyhow!("API server failed: {e}"))?;
        Ok(())
    }
}
