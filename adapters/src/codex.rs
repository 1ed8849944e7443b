//! Codex CLI session adapter: reads `~/.codex/sessions/**/*.jsonl`
//! transcripts. Ported from `adapters/codex.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::{compute_file_hash, count_non_empty_files, in_window, load_jsonl_dict_lines, parse_timestamp};
use crate::protocol::{Adapter, DiscoveredSession, ViewerMessage, ViewerSession};

pub struct CodexAdapter;

impl CodexAdapter {
    fn base(&self, traces_dir: Option<&Path>) -> Option<PathBuf> {
        traces_dir.map(Path::to_path_buf).or_else(|| self.default_path())
    }

    fn walk_jsonl(dir: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        fn recurse(dir: &Path, out: &mut Vec<PathBuf>) {
            let Ok(entries) = std::fs::read_dir(dir) else { return };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    recurse(&path, out);
                } else if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                    out.push(path);
                }
            }
        }
        recurse(dir, &mut out);
        out
    }

    fn extract_message_text(content: Option<&Value>) -> Option<String> {
        match content {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Array(blocks)) => {
                let parts: Vec<String> = blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(Value::as_str).map(str::to_string))
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(parts.join("\n"))
                }
            }
            _ => None,
        }
    }
}

impl Adapter for CodexAdapter {
    fn name(&self) -> &'static str {
        "codex"
    }

    fn default_path(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".codex").join("sessions"))
    }

    fn count_sessions(&self, path: &Path) -> usize {
        count_non_empty_files(path, ".jsonl")
    }

    fn find_session_path(&self, session_id: &str, traces_dir: Option<&Path>) -> Option<PathBuf> {
        let base = self.base(traces_dir)?;
        let session_id = session_id.trim();
        if session_id.is_empty() || !base.exists() {
            return None;
        }
        Self::walk_jsonl(&base).into_iter().find(|p| {
            p.file_stem().and_then(|s| s.to_str()) == Some(session_id)
                || p.file_name().and_then(|s| s.to_str()).map(|n| n.contains(session_id)) == Some(true)
        })
    }

    fn read_session(&self, session_path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        let mut messages = Vec::new();
        let mut tool_indices: HashMap<String, usize> = HashMap::new();
        let mut event_messages = Vec::new();
        let mut has_response_items = false;
        let mut total_input = 0i64;
        let mut total_output = 0i64;

        for entry in load_jsonl_dict_lines(session_path) {
            let entry_type = entry.get("type").and_then(Value::as_str);
            let empty_payload = serde_json::Map::new();
            let payload = entry.get("payload").and_then(Value::as_object).unwrap_or(&empty_payload);
            let timestamp = entry
                .get("timestamp")
                .and_then(Value::as_str)
                .or_else(|| payload.get("timestamp").and_then(Value::as_str))
                .map(str::to_string);

            if entry_type == Some("event_msg") {
                match payload.get("type").and_then(Value::as_str) {
                    Some("token_count") => {
                        if let Some(info) = payload.get("info") {
                            if let Some(usage) = info.get("last_token_usage") {
                                total_input += usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
                                total_output += usage.get("output_tokens").and_then(Value::as_i64).unwrap_or(0);
                                total_output += usage.get("reasoning_output_tokens").and_then(Value::as_i64).unwrap_or(0);
                            }
                        }
                    }
                    Some(event_type @ ("user_message" | "agent_message")) => {
                        let role = if event_type == "user_message" { "user" } else { "assistant" };
                        if let Some(text) = payload.get("message").and_then(Value::as_str) {
                            if !text.trim().is_empty() {
                                event_messages.push(ViewerMessage {
                                    role: role.to_string(),
                                    content: Some(text.trim().to_string()),
                                    timestamp: timestamp.clone(),
                                    ..Default::default()
                                });
                            }
                        }
                    }
                    _ => {}
                }
                continue;
            }

            if entry_type != Some("response_item") {
                continue;
            }

            match payload.get("type").and_then(Value::as_str) {
                Some("message") => {
                    has_response_items = true;
                    let role = payload.get("role").and_then(Value::as_str);
                    let text = Self::extract_message_text(payload.get("content"));
                    if let (Some(role), Some(text)) = (role, text) {
                        messages.push(ViewerMessage {
                            role: role.to_string(),
                            content: Some(text),
                            timestamp,
                            ..Default::default()
                        });
                    }
                }
                Some(t @ ("function_call" | "custom_tool_call")) => {
                    has_response_items = true;
                    let tool_id = payload
                        .get("call_id")
                        .or_else(|| payload.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    let tool_name = payload.get("name").and_then(Value::as_str).unwrap_or("tool").to_string();
                    let tool_input = if t == "function_call" {
                        payload.get("arguments").cloned()
                    } else {
                        payload.get("input").cloned()
                    };
                    messages.push(ViewerMessage {
                        role: "tool".to_string(),
                        tool_name: Some(tool_name),
                        tool_input,
                        timestamp,
                        ..Default::default()
                    });
                    tool_indices.insert(tool_id, messages.len() - 1);
                }
                Some("function_call_output" | "custom_tool_call_output") => {
                    has_response_items = true;
                    let call_id = payload
                        .get("call_id")
                        .or_else(|| payload.get("id"))
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    let output = payload.get("output").cloned();
                    if let Some(&idx) = tool_indices.get(&call_id) {
                        messages[idx].tool_output = output;
                    } else {
                        messages.push(ViewerMessage {
                            role: "tool".to_string(),
                            tool_name: Some("tool".to_string()),
                            tool_output: output,
                            timestamp,
                            ..Default::default()
                        });
                    }
                }
                _ => {}
            }
        }

        if !has_response_items && !event_messages.is_empty() {
            messages = event_messages;
        }

        Some(ViewerSession {
            session_id: session_id
                .map(str::to_string)
                .or_else(|| session_path.file_stem().map(|s| s.to_string_lossy().into_owned()))
                .unwrap_or_default(),
            cwd: None,
            git_branch: None,
            messages,
            total_input_tokens: total_input,
            total_output_tokens: total_output,
            meta: HashMap::new(),
        })
    }

    fn iter_sessions(
        &self,
        traces_dir: Option<&Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        known_run_hashes: Option<&HashMap<String, String>>,
    ) -> Vec<DiscoveredSession> {
        let Some(base) = self.base(traces_dir) else { return Vec::new() };
        if !base.exists() {
            return Vec::new();
        }

        let mut records = Vec::new();
        for path in Self::walk_jsonl(&base) {
            let run_id = path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
            let Ok(file_hash) = compute_file_hash(&path) else { continue };
            if let Some(known) = known_run_hashes {
                if known.get(&run_id) == Some(&file_hash) {
                    continue;
                }
            }

            let entries = load_jsonl_dict_lines(&path);
            if entries.is_empty() {
                continue;
            }

            let mut start_time: Option<DateTime<Utc>> = None;
            let mut repo_name: Option<String> = None;
            let mut message_count = 0i64;
            let mut tool_calls = 0i64;
            let mut errors = 0i64;
            let mut total_tokens = 0i64;
            let mut summaries = Vec::new();

            for entry in &entries {
                let empty_payload = serde_json::Map::new();
                let payload = entry.get("payload").and_then(Value::as_object).unwrap_or(&empty_payload);
                let ts_raw = entry
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .or_else(|| payload.get("timestamp").and_then(Value::as_str));
                if let Some(ts_raw) = ts_raw {
                    if let Some(ts) = parse_timestamp(ts_raw) {
                        start_time = Some(start_time.map_or(ts, |current| current.min(ts)));
                    }
                }

                if entry.get("type").and_then(Value::as_str) == Some("session_meta") {
                    if let Some(git) = payload.get("git") {
                        if repo_name.is_none() {
                            repo_name = git.get("branch").and_then(Value::as_str).map(str::to_string);
                        }
                    }
                }

                if entry.get("type").and_then(Value::as_str) == Some("event_msg") {
                    match payload.get("type").and_then(Value::as_str) {
                        Some("user_message") | Some("agent_message") => {
                            message_count += 1;
                            if let Some(text) = payload.get("message").and_then(Value::as_str) {
                                let trimmed = text.trim();
                                if !trimmed.is_empty() {
                                    summaries.push(trimmed.chars().take(140).collect::<String>());
                                }
                            }
                        }
                        Some("token_count") => {
                            if let Some(usage) = payload.get("info").and_then(|i| i.get("last_token_usage")) {
                                total_tokens += usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
                                total_tokens += usage.get("output_tokens").and_then(Value::as_i64).unwrap_or(0);
                                total_tokens += usage.get("reasoning_output_tokens").and_then(Value::as_i64).unwrap_or(0);
                            }
                        }
                        _ => {}
                    }
                }

                if entry.get("type").and_then(Value::as_str) == Some("response_item") {
                    match payload.get("type").and_then(Value::as_str) {
                        Some("function_call") | Some("custom_tool_call") => tool_calls += 1,
                        Some("function_call_output") | Some("custom_tool_call_output") => {
                            let output = payload.get("output").and_then(Value::as_str).unwrap_or("");
                            if output.to_lowercase().contains("error") {
                                errors += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }

            if !in_window(start_time, start, end) {
                continue;
            }

            summaries.truncate(5);
            records.push(DiscoveredSession {
                run_id,
                agent_type: "codex".to_string(),
                session_path: path.to_string_lossy().into_owned(),
                start_time,
                repo_name,
                status: "completed".to_string(),
                duration_ms: 0,
                message_count,
                tool_call_count: tool_calls,
                error_count: errors,
                total_tokens,
                summaries,
                content_hash: file_hash,
            });
        }
        records
    }
}
