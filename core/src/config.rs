//! Layered configuration: built-in defaults, overridden by the user config
//! (`~/.lerim/config.toml`), overridden by the project config
//! (`<git-root>/.lerim/config.toml`), overridden by an explicit file named
//! in `LERIM_CONFIG`. Later layers win field-by-field via a deep TOML merge.
//!
//! API keys are read only from environment variables, never from TOML —
//! a secret key name found under `[llm]` in any layer is a config error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::project_scope::{resolve_data_dirs, MemoryScope};
use crate::{paths, LerimError, Result};

const SECRET_KEYS: &[&str] = &[
    "anthropic_api_key",
    "openai_api_key",
    "zai_api_key",
    "openrouter_api_key",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRoleConfig {
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_timeout_seconds() -> u64 {
    120
}

fn default_max_iterations() -> u32 {
    12
}

impl LlmRoleConfig {
    fn lead_default() -> Self {
        LlmRoleConfig {
            provider: "openrouter".to_string(),
            model: "qwen/qwen3-coder-30b-a3b-instruct".to_string(),
            api_base: None,
            fallback_models: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            max_iterations: default_max_iterations(),
        }
    }

    fn extract_default() -> Self {
        LlmRoleConfig {
            provider: "ollama".to_string(),
            model: "qwen3:8b".to_string(),
            api_base: None,
            fallback_models: Vec::new(),
            timeout_seconds: default_timeout_seconds(),
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub global_data_dir: PathBuf,
    pub memory_dir: PathBuf,
    pub index_dir: PathBuf,
    pub memories_db_path: PathBuf,
    pub sessions_db_path: PathBuf,
    pub platforms_path: PathBuf,

    pub memory_scope: MemoryScope,
    pub memory_project_dir_name: String,

    pub decay_enabled: bool,
    pub decay_days: u32,
    pub decay_min_confidence_floor: f64,
    pub decay_archive_threshold: f64,
    pub decay_recent_access_grace_days: u32,

    pub server_host: String,
    pub server_port: u16,
    pub poll_interval_minutes: u32,
    pub sync_interval_minutes: u32,
    pub maintain_interval_minutes: u32,

    pub claim_timeout_seconds: u64,
    pub max_attempts: u32,

    pub lead_role: LlmRoleConfig,
    pub explorer_role: LlmRoleConfig,
    pub extract_role: LlmRoleConfig,
    pub summarize_role: LlmRoleConfig,

    pub tracing_enabled: bool,
    pub tracing_include_httpx: bool,
    pub tracing_include_content: bool,

    #[serde(skip)]
    pub anthropic_api_key: Option<String>,
    #[serde(skip)]
    pub openai_api_key: Option<String>,
    #[serde(skip)]
    pub zai_api_key: Option<String>,
    #[serde(skip)]
    pub openrouter_api_key: Option<String>,
}

impl Config {
    /// Returns a copy of this config safe to serialize into an API response
    /// or log line: api keys are always omitted (they are never populated
    /// from TOML in the first place, but this guards future fields too).
    pub fn public_dict(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("anthropic_api_key");
            obj.remove("openai_api_key");
            obj.remove("zai_api_key");
            obj.remove("openrouter_api_key");
        }
        value
    }
}

/// Raw, partially-populated TOML layer. Every field optional: a layer may
/// set only a handful of keys, and unset fields fall through to the layer
/// beneath.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawLayer {
    #[serde(default)]
    data: RawDataSection,
    #[serde(default)]
    memory: RawMemorySection,
    #[serde(default)]
    decay: RawDecaySection,
    #[serde(default)]
    server: RawServerSection,
    #[serde(default)]
    daemon: RawDaemonSection,
    #[serde(default)]
    queue: RawQueueSection,
    #[serde(default)]
    llm: RawLlmSection,
    #[serde(default)]
    tracing: RawTracingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDataSection {
    dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawMemorySection {
    scope: Option<String>,
    project_dir_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDecaySection {
    enabled: Option<bool>,
    days: Option<u32>,
    min_confidence_floor: Option<f64>,
    archive_threshold: Option<f64>,
    recent_access_grace_days: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawServerSection {
    host: Option<String>,
    port: Option<i64>,
    poll_interval_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDaemonSection {
    sync_interval_minutes: Option<u32>,
    maintain_interval_minutes: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawQueueSection {
    claim_timeout_seconds: Option<u64>,
    max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLlmSection {
    #[serde(flatten)]
    rest: toml::value::Table,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTracingSection {
    enabled: Option<bool>,
    include_httpx: Option<bool>,
    include_content: Option<bool>,
}

impl RawLayer {
    fn merge(mut self, other: RawLayer) -> RawLayer {
        self.data.dir = other.data.dir.or(self.data.dir);
        self.memory.scope = other.memory.scope.or(self.memory.scope);
        self.memory.project_dir_name =
            other.memory.project_dir_name.or(self.memory.project_dir_name);
        self.decay.enabled = other.decay.enabled.or(self.decay.enabled);
        self.decay.days = other.decay.days.or(self.decay.days);
        self.decay.min_confidence_floor =
            other.decay.min_confidence_floor.or(self.decay.min_confidence_floor);
        self.decay.archive_threshold =
            other.decay.archive_threshold.or(self.decay.archive_threshold);
        self.decay.recent_access_grace_days = other
            .decay
            .recent_access_grace_days
            .or(self.decay.recent_access_grace_days);
        self.server.host = other.server.host.or(self.server.host);
        self.server.port = other.server.port.or(self.server.port);
        self.server.poll_interval_minutes = other
            .server
            .poll_interval_minutes
            .or(self.server.poll_interval_minutes);
        self.daemon.sync_interval_minutes = other
            .daemon
            .sync_interval_minutes
            .or(self.daemon.sync_interval_minutes);
        self.daemon.maintain_interval_minutes = other
            .daemon
            .maintain_interval_minutes
            .or(self.daemon.maintain_interval_minutes);
        self.queue.claim_timeout_seconds = other
            .queue
            .claim_timeout_seconds
            .or(self.queue.claim_timeout_seconds);
        self.queue.max_attempts = other.queue.max_attempts.or(self.queue.max_attempts);
        for (key, value) in other.llm.rest {
            self.llm.rest.insert(key, value);
        }
        self.tracing.enabled = other.tracing.enabled.or(self.tracing.enabled);
        self.tracing.include_httpx =
            other.tracing.include_httpx.or(self.tracing.include_httpx);
        self.tracing.include_content =
            other.tracing.include_content.or(self.tracing.include_content);
        self
    }

    fn validate_no_secrets(&self) -> Result<()> {
        for key in SECRET_KEYS {
            if self.llm.rest.contains_key(*key) {
                return Err(LerimError::Config(format!(
                    "'{key}' must not be set in a TOML config file; use the matching environment variable instead"
                )));
            }
        }
        Ok(())
    }
}

fn read_layer(path: &Path) -> Result<RawLayer> {
    if !path.is_file() {
        return Ok(RawLayer::default());
    }
    let text = std::fs::read_to_string(path)?;
    let layer: RawLayer = toml::from_str(&text)?;
    layer.validate_no_secrets()?;
    Ok(layer)
}

fn user_config_path(global_data_dir: &Path) -> PathBuf {
    global_data_dir.join("config.toml")
}

fn project_config_path(project_root: &Path, project_dir_name: &str) -> PathBuf {
    project_root.join(project_dir_name).join("config.toml")
}

/// Loads the layered configuration, resolving data roots and defaults the
/// same way for every caller (CLI, daemon, API). `repo_path` is the
/// directory git-root discovery starts from — normally the current
/// working directory.
pub fn load_config(repo_path: &Path) -> Result<Config> {
    let home = dirs::home_dir().ok_or_else(|| {
        LerimError::Config("could not determine home directory".to_string())
    })?;
    let default_global_data_dir = home.join(".lerim");

    let base = RawLayer::default();
    let user_layer = read_layer(&user_config_path(&default_global_data_dir))?;
    let mut merged = base.merge(user_layer);

    let global_data_dir = merged
        .data
        .dir
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_global_data_dir.clone());

    let project_dir_name = merged
        .memory
        .project_dir_name
        .clone()
        .unwrap_or_else(|| ".lerim".to_string());

    if let Some(project_root) = crate::project_scope::git_root_for(repo_path) {
        let project_layer = read_layer(&project_config_path(&project_root, &project_dir_name))?;
        merged = merged.merge(project_layer);
    }

    if let Ok(explicit_path) = std::env::var("LERIM_CONFIG") {
        let explicit_layer = read_layer(Path::new(&explicit_path))?;
        merged = merged.merge(explicit_layer);
    }

    let scope: MemoryScope = merged
        .memory
        .scope
        .as_deref()
        .unwrap_or("project_fallback_global")
        .parse()
        .map_err(LerimError::Config)?;

    let resolution = resolve_data_dirs(scope, &project_dir_name, &global_data_dir, repo_path);
    let primary = resolution
        .ordered_data_dirs
        .first()
        .cloned()
        .unwrap_or_else(|| global_data_dir.clone());

    let memory_paths = paths::build_memory_paths(&primary);

    let mut port = merged.server.port.unwrap_or(8765).max(1) as u32;
    if port > 65535 {
        port = 8765;
    }

    let lead_role = build_llm_role(&merged.llm.rest, "lead", LlmRoleConfig::lead_default());
    let explorer_role = build_llm_role(&merged.llm.rest, "explorer", lead_role.clone());
    let extract_role = build_llm_role(&merged.llm.rest, "extract", LlmRoleConfig::extract_default());
    let summarize_role = build_llm_role(&merged.llm.rest, "summarize", extract_role.clone());

    Ok(Config {
        data_dir: primary,
        global_data_dir: global_data_dir.clone(),
        memory_dir: memory_paths.memory_dir,
        index_dir: memory_paths.index_dir,
        memories_db_path: memory_paths.memories_db_path,
        sessions_db_path: paths::sessions_db_path(&global_data_dir),
        platforms_path: paths::platforms_path(&global_data_dir),

        memory_scope: scope,
        memory_project_dir_name: project_dir_name,

        decay_enabled: merged.decay.enabled.unwrap_or(true),
        decay_days: merged.decay.days.unwrap_or(30),
        decay_min_confidence_floor: merged.decay.min_confidence_floor.unwrap_or(0.1),
        decay_archive_threshold: merged.decay.archive_threshold.unwrap_or(0.2),
        decay_recent_access_grace_days: merged.decay.recent_access_grace_days.unwrap_or(3),

        server_host: merged.server.host.unwrap_or_else(|| "127.0.0.1".to_string()),
        server_port: port as u16,
        poll_interval_minutes: merged.server.poll_interval_minutes.unwrap_or(15),
        sync_interval_minutes: merged.daemon.sync_interval_minutes.unwrap_or(15),
        maintain_interval_minutes: merged.daemon.maintain_interval_minutes.unwrap_or(60),

        claim_timeout_seconds: merged.queue.claim_timeout_seconds.unwrap_or(300),
        max_attempts: merged.queue.max_attempts.unwrap_or(3),

        lead_role,
        explorer_role,
        extract_role,
        summarize_role,

        tracing_enabled: merged.tracing.enabled.unwrap_or(false),
        tracing_include_httpx: merged.tracing.include_httpx.unwrap_or(false),
        tracing_include_content: merged.tracing.include_content.unwrap_or(false),

        anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
        openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
        zai_api_key: std::env::var("ZAI_API_KEY").ok(),
        openrouter_api_key: std::env::var("OPENROUTER_API_KEY").ok(),
    })
}

fn build_llm_role(table: &toml::value::Table, role: &str, default: LlmRoleConfig) -> LlmRoleConfig {
    let Some(toml::Value::Table(role_table)) = table.get(role) else {
        return default;
    };

    let provider = role_table
        .get("provider")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.provider);
    let model = role_table
        .get("model")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or(default.model);
    let api_base = role_table
        .get("api_base")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or(default.api_base);
    let fallback_models = role_table
        .get("fallback_models")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or(default.fallback_models);
    let timeout_seconds = role_table
        .get("timeout_seconds")
        .and_then(|v| v.as_integer())
        .map(|v| v as u64)
        .unwrap_or(default.timeout_seconds);
    let max_iterations = role_table
        .get("max_iterations")
        .and_then(|v| v.as_integer())
        .map(|v| v as u32)
        .unwrap_or(default.max_iterations);

    LlmRoleConfig {
        provider,
        model,
        api_base,
        fallback_models,
        timeout_seconds,
        max_iterations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_applies_builtin_defaults_with_no_layers() {
        let dir = tempdir().unwrap();
        std::env::remove_var("LERIM_CONFIG");
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server_port, 8765);
        assert_eq!(config.memory_scope, MemoryScope::ProjectFallbackGlobal);
    }

    #[test]
    fn port_above_65535_collapses_to_default() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let project_dir = dir.path().join(".lerim");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(project_dir.join("config.toml"), "[server]\nport = 70000\n").unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.server_port, 8765);
    }

    #[test]
    fn rejects_secret_key_in_toml() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        let project_dir = dir.path().join(".lerim");
        std::fs::create_dir_all(&project_dir).unwrap();
        std::fs::write(
            project_dir.join("config.toml"),
            "[llm]\nanthropic_api_key = \"sk-no\"\n",
        )
        .unwrap();
        let result = load_config(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn public_dict_omits_api_keys() {
        let dir = tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        let value = config.public_dict();
        assert!(value.get("anthropic_api_key").is_none());
    }
}
