//! Request/response DTOs for the HTTP API (§6). Kept separate from
//! `handlers` so the wire shapes are easy to scan without the handler
//! bodies in between.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub connected_agents: Vec<String>,
    pub platforms: Vec<lerim_adapters::registry::PlatformStatus>,
    pub memory_count: u64,
    pub sessions_indexed_count: i64,
    pub queue_counts: std::collections::HashMap<String, i64>,
    pub latest_sync: Option<lerim_catalog::ServiceRun>,
    pub latest_maintain: Option<lerim_catalog::ServiceRun>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunsQuery {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<lerim_catalog::SessionRecord>,
    pub total: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RunStatsQuery {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SearchQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub run_id: String,
    pub agent_type: String,
    pub repo_name: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub mode: &'static str,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MemoriesQuery {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(rename = "type", default)]
    pub primitive_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySummary {
    pub relative_path: String,
    pub title: String,
    pub confidence: f64,
    pub effective_confidence: f64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectRequest {
    pub platform: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectAddRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectRemoveRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectActionResponse {
    pub status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default = "default_chat_limit")]
    pub limit: usize,
}

fn default_chat_limit() -> usize {
    10
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SyncRequest {
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub max_sessions: Option<usize>,
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MaintainRequest {
    #[serde(default)]
    pub force: Option<bool>,
    #[serde(default)]
    pub dry_run: Option<bool>,
}

/// Returned immediately by `POST /api/sync` and `POST /api/maintain`: the
/// pipeline runs on a spawned background task, never blocking the request
/// on an LLM call (§5).
#[derive(Debug, Clone, Serialize)]
pub struct JobStartedResponse {
    pub status: &'static str,
    pub job_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigPatchRequest {
    pub patch: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadOnlyResponse {
    pub error: &'static str,
}
