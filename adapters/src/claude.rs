//! Claude Code session adapter: reads `~/.claude/projects/**/*.jsonl`
//! transcripts. Ported from `adapters/claude.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::{compute_file_hash, count_non_empty_files, in_window, load_jsonl_dict_lines, parse_timestamp};
use crate::protocol::{Adapter, DiscoveredSession, ViewerMessage, ViewerSession};

pub struct ClaudeAdapter;

impl ClaudeAdapter {
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
}

impl Adapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    fn default_path(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".claude").join("projects"))
    }

    fn count_sessions(&self, path: &Path) -> usize {
        count_non_empty_files(path, ".jsonl")
    }

    fn find_session_path(&self, session_id: &str, traces_dir: Option<&Path>) -> Option<PathBuf> {
        let base = self.base(traces_dir)?;
        if !base.exists() {
            return None;
        }
        Self::walk_jsonl(&base)
            .into_iter()
            .find(|p| p.file_stem().and_then(|s| s.to_str()) == Some(session_id))
    }

    fn read_session(&self, session_path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        let resolved_session_id = session_id
            .map(str::to_string)
            .or_else(|| session_path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let mut messages = Vec::new();
        let mut tool_results: HashMap<String, String> = HashMap::new();
        let mut tool_indices: HashMap<String, usize> = HashMap::new();
        let mut git_branch = None;
        let mut cwd = None;
        let mut total_input = 0i64;
        let mut total_output = 0i64;

        for entry in load_jsonl_dict_lines(session_path) {
            let entry_type = entry.get("type").and_then(Value::as_str);
            let timestamp = entry.get("timestamp").and_then(Value::as_str).map(str::to_string);

            if git_branch.is_none() {
                git_branch = entry.get("gitBranch").and_then(Value::as_str).map(str::to_string);
            }
            if cwd.is_none() {
                cwd = entry.get("cwd").and_then(Value::as_str).map(str::to_string);
            }

            match entry_type {
                Some("user") => {
                    let content = entry.get("message").and_then(|m| m.get("content"));
                    let text = match content {
                        Some(Value::Array(blocks)) => {
                            let mut text_parts = Vec::new();
                            for block in blocks {
                                let Some(obj) = block.as_object() else { continue };
                                if obj.get("type").and_then(Value::as_str) == Some("tool_result") {
                                    let tool_id = obj.get("tool_use_id").and_then(Value::as_str).unwrap_or("").to_string();
                                    let result_content = match obj.get("content") {
                                        Some(Value::Array(items)) => items
                                            .iter()
                                            .filter_map(|i| i.get("text").and_then(Value::as_str))
                                            .collect::<Vec<_>>()
                                            .join("\n"),
                                        Some(Value::String(s)) => s.clone(),
                                        _ => String::new(),
                                    };
                                    tool_results.insert(tool_id.clone(), result_content.clone());
                                    if let Some(&idx) = tool_indices.get(&tool_id) {
                                        messages[idx] = ViewerMessage {
                                            tool_output: Some(Value::String(result_content)),
                                            ..std::mem::take(&mut messages[idx])
                                        };
                                    } else {
                                        messages.push(ViewerMessage {
                                            role: "tool".to_string(),
                                            tool_name: Some("tool".to_string()),
                                            tool_output: Some(Value::String(result_content)),
                                            timestamp: timestamp.clone(),
                                            ..Default::default()
                                        });
                                    }
                                } else if obj.get("type").and_then(Value::as_str) == Some("text") {
                                    text_parts.push(obj.get("text").and_then(Value::as_str).unwrap_or("").to_string());
                                }
                            }
                            Some(text_parts.join("\n"))
                        }
                        Some(Value::String(s)) => Some(s.clone()),
                        _ => None,
                    };
                    if let Some(text) = text {
                        if !text.trim().is_empty() && !text.starts_with('<') {
                            messages.push(ViewerMessage {
                                role: "user".to_string(),
                                content: Some(text),
                                timestamp,
                                ..Default::default()
                            });
                        }
                    }
                }
                Some("assistant") => {
                    let message = entry.get("message");
                    let model = message.and_then(|m| m.get("model")).and_then(Value::as_str).map(str::to_string);
                    if let Some(usage) = message.and_then(|m| m.get("usage")) {
                        total_input += usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
                        total_output += usage.get("output_tokens").and_then(Value::as_i64).unwrap_or(0);
                    }

                    let mut text_parts = Vec::new();
                    if let Some(Value::Array(blocks)) = message.and_then(|m| m.get("content")) {
                        for block in blocks {
                            let Some(obj) = block.as_object() else { continue };
                            match obj.get("type").and_then(Value::as_str) {
                                Some("text") => {
                                    text_parts.push(obj.get("text").and_then(Value::as_str).unwrap_or("").to_string());
                                }
                                Some("tool_use") => {
                                    let tool_id = obj.get("id").and_then(Value::as_str).unwrap_or("").to_string();
                                    let tool_name = obj.get("name").and_then(Value::as_str).unwrap_or("").to_string();
                                    let tool_input = obj.get("input").cloned();
                                    let tool_output = tool_results.get(&tool_id).cloned().map(Value::String);
                                    messages.push(ViewerMessage {
                                        role: "tool".to_string(),
                                        tool_name: Some(tool_name),
                                        tool_input,
                                        tool_output,
                                        timestamp: timestamp.clone(),
                                        ..Default::default()
                                    });
                                    tool_indices.insert(tool_id, messages.len() - 1);
                                }
                                _ => {}
                            }
                        }
                    }
                    let text = text_parts.join("\n");
                    if !text.is_empty() || model.is_some() {
                        messages.push(ViewerMessage {
                            role: "assistant".to_string(),
                            content: Some(text),
                            timestamp,
                            model,
                            ..Default::default()
                        });
                    }
                }
                _ => {}
            }
        }

        Some(ViewerSession {
            session_id: resolved_session_id,
            cwd,
            git_branch,
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

            let mut started_at: Option<DateTime<Utc>> = None;
            let mut repo_name: Option<String> = None;
            let mut summaries = Vec::new();
            let mut message_count = 0i64;
            let mut tool_calls = 0i64;
            let mut errors = 0i64;
            let mut total_tokens = 0i64;

            for entry in &entries {
                if let Some(ts_raw) = entry.get("timestamp").and_then(Value::as_str) {
                    if let Some(ts) = parse_timestamp(ts_raw) {
                        started_at = Some(started_at.map_or(ts, |current| current.min(ts)));
                    }
                }
                if repo_name.is_none() {
                    repo_name = entry.get("gitBranch").and_then(Value::as_str).map(str::to_string);
                }

                match entry.get("type").and_then(Value::as_str) {
                    Some("summary") => {
                        let summary = entry.get("summary").and_then(Value::as_str).unwrap_or("").trim().to_string();
                        if !summary.is_empty() {
                            summaries.push(summary);
                        }
                    }
                    Some("user") | Some("assistant") | Some("system") => message_count += 1,
                    _ => {}
                }

                if let Some(message) = entry.get("message") {
                    if let Some(usage) = message.get("usage") {
                        total_tokens += usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
                        total_tokens += usage.get("output_tokens").and_then(Value::as_i64).unwrap_or(0);
                    }
                    if let Some(Value::Array(blocks)) = message.get("content") {
                        for block in blocks {
                            match block.get("type").and_then(Value::as_str) {
                                Some("tool_use") => tool_calls += 1,
                                Some("tool_result") if block.get("is_error").and_then(Value::as_bool) == Some(true) => {
                                    errors += 1;
                                }
                                _ => {}
                            }
                        }
                    }
                }
            }

            if !in_window(started_at, start, end) {
                continue;
            }

            summaries.truncate(5);
            records.push(DiscoveredSession {
                run_id,
                agent_type: "claude".to_string(),
                session_path: path.to_string_lossy().into_owned(),
                start_time: started_at,
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
