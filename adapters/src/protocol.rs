//! Shared adapter data model and the `Adapter` trait every platform
//! implements. Mirrors `adapters/base.py`'s `ViewerMessage`/`ViewerSession`/
//! `SessionRecord` dataclasses and `Adapter` protocol.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One normalized transcript turn, used by `/api/runs/<id>/messages` and by
/// the extract pipeline's trace reader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_output: Option<Value>,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerSession {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub messages: Vec<ViewerMessage>,
    #[serde(default)]
    pub total_input_tokens: i64,
    #[serde(default)]
    pub total_output_tokens: i64,
    #[serde(default)]
    pub meta: HashMap<String, Value>,
}

/// A session summary produced during discovery, not yet written to the
/// catalog — the extract pipeline turns this into a `SessionRecord` (see
/// `lerim_catalog::sessions`) once it has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredSession {
    pub run_id: String,
    pub agent_type: String,
    pub session_path: String,
    pub start_time: Option<DateTime<Utc>>,
    pub repo_name: Option<String>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub duration_ms: i64,
    #[serde(default)]
    pub message_count: i64,
    #[serde(default)]
    pub tool_call_count: i64,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub total_tokens: i64,
    #[serde(default)]
    pub summaries: Vec<String>,
    pub content_hash: String,
}

fn default_status() -> String {
    "completed".to_string()
}

/// Platform adapter: discovers and reads sessions for one coding-agent
/// format. Implementations are stateless — all state lives in the
/// filesystem paths they're given.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// The platform's default session-traces directory, if this host has
    /// one (e.g. `~/.claude/projects/`).
    fn default_path(&self) -> Option<PathBuf>;

    fn count_sessions(&self, path: &Path) -> usize;

    /// Lists sessions under `traces_dir` (or the default path) whose
    /// `start_time` falls in `[start, end]` and whose content hash differs
    /// from `known_run_hashes`, when supplied.
    fn iter_sessions(
        &self,
        traces_dir: Option<&Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        known_run_hashes: Option<&HashMap<String, String>>,
    ) -> Vec<DiscoveredSession>;

    fn find_session_path(&self, session_id: &str, traces_dir: Option<&Path>) -> Option<PathBuf>;

    fn read_session(&self, session_path: &Path, session_id: Option<&str>) -> Option<ViewerSession>;
}
