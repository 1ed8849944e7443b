//! OpenCode adapter: reads sessions from OpenCode's `opencode.db` SQLite
//! database. Ported from `adapters/opencode.py`.
//!
//! OpenCode stores everything in three tables (`session`, `message`,
//! `part`) with JSON blobs in a `data` column and millisecond-epoch
//! timestamps. Like the Cursor adapter, each session is exported to its
//! own JSONL cache file so the rest of the pipeline reads it as plain
//! text.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::{compute_file_hash, in_window, load_jsonl_dict_lines, parse_timestamp_numeric};
use crate::protocol::{Adapter, DiscoveredSession, ViewerMessage, ViewerSession};

pub struct OpenCodeAdapter;

impl OpenCodeAdapter {
    fn cache_dir(&self) -> PathBuf {
        dirs::home_dir().unwrap_or_default().join(".lerim").join("cache").join("opencode")
    }

    fn resolve_db_path(root: &Path) -> Option<PathBuf> {
        if root.is_file() && root.file_name().and_then(|n| n.to_str()) == Some("opencode.db") {
            return Some(root.to_path_buf());
        }
        let candidate = root.join("opencode.db");
        candidate.is_file().then_some(candidate)
    }

    fn json_col(raw: Option<&str>) -> Value {
        raw.and_then(|s| serde_json::from_str::<Value>(s).ok())
            .filter(Value::is_object)
            .unwrap_or_else(|| Value::Object(Default::default()))
    }

    fn epoch_millis_to_ts(value: Option<&Value>) -> Option<DateTime<Utc>> {
        value.and_then(Value::as_i64).and_then(|ms| parse_timestamp_numeric(ms as f64))
    }
}

impl Adapter for OpenCodeAdapter {
    fn name(&self) -> &'static str {
        "opencode"
    }

    fn default_path(&self) -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".local/share/opencode"))
    }

    fn count_sessions(&self, path: &Path) -> usize {
        if !path.exists() {
            return 0;
        }
        let Some(db_path) = Self::resolve_db_path(path) else { return 0 };
        let Ok(conn) = rusqlite::Connection::open_with_flags(&db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY) else {
            return 0;
        };
        conn.query_row("SELECT COUNT(*) FROM session", [], |row| row.get::<_, i64>(0))
            .map(|n| n as usize)
            .unwrap_or(0)
    }

    fn find_session_path(&self, session_id: &str, traces_dir: Option<&Path>) -> Option<PathBuf> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return None;
        }
        let cache_path = self.cache_dir().join(format!("{session_id}.jsonl"));
        if cache_path.is_file() {
            return Some(cache_path);
        }
        let root = traces_dir.map(Path::to_path_buf).or_else(|| self.default_path())?;
        if !root.exists() {
            return None;
        }
        let db_path = Self::resolve_db_path(&root)?;
        let conn = rusqlite::Connection::open_with_flags(&db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        let found: Option<String> = conn
            .query_row("SELECT id FROM session WHERE id = ?1 LIMIT 1", [session_id], |row| row.get(0))
            .ok();
        found.map(|_| db_path)
    }

    fn read_session(&self, session_path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        if session_path.extension().and_then(|e| e.to_str()) == Some("jsonl") && session_path.is_file() {
            return self.read_session_jsonl(session_path, session_id);
        }
        let db_path = if session_path.is_dir() {
            Self::resolve_db_path(session_path)?
        } else {
            session_path.to_path_buf()
        };
        let session_id = session_id?;
        if db_path.is_file() {
            self.read_session_db(&db_path, session_id)
        } else {
            None
        }
    }

    fn iter_sessions(
        &self,
        traces_dir: Option<&Path>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        known_run_hashes: Option<&HashMap<String, String>>,
    ) -> Vec<DiscoveredSession> {
        let Some(root) = traces_dir.map(Path::to_path_buf).or_else(|| self.default_path()) else {
            return Vec::new();
        };
        if !root.exists() {
            return Vec::new();
        }
        let Some(db_path) = Self::resolve_db_path(&root) else { return Vec::new() };

        let out_dir = self.cache_dir();
        if std::fs::create_dir_all(&out_dir).is_err() {
            return Vec::new();
        }

        let Ok(conn) = rusqlite::Connection::open_with_flags(&db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY) else {
            return Vec::new();
        };
        let Ok(mut stmt) =
            conn.prepare("SELECT id, directory, title, time_created FROM session ORDER BY time_created")
        else {
            return Vec::new();
        };
        let rows: Vec<(String, Option<String>, Option<String>, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))
            .map(|r| r.flatten().collect())
            .unwrap_or_default();
        drop(stmt);

        let mut records = Vec::new();
        for (sess_id, directory, _title, time_created) in rows {
            let start_dt = parse_timestamp_numeric(time_created as f64);
            if !in_window(start_dt, start, end) {
                continue;
            }
            let Some(session) = self.read_session_db(&db_path, &sess_id) else { continue };

            let jsonl_path = self.export_session_jsonl(&sess_id, &session, &out_dir);
            let Ok(file_hash) = compute_file_hash(&jsonl_path) else { continue };
            if let Some(known) = known_run_hashes {
                if known.get(&sess_id) == Some(&file_hash) {
                    continue;
                }
            }

            let mut summaries = Vec::new();
            for msg in &session.messages {
                if matches!(msg.role.as_str(), "user" | "assistant") {
                    let trimmed = msg.content.as_deref().unwrap_or("").trim();
                    if !trimmed.is_empty() {
                        summaries.push(trimmed.chars().take(140).collect::<String>());
                    }
                }
                if summaries.len() >= 5 {
                    break;
                }
            }
            let message_count = session.messages.iter().filter(|m| matches!(m.role.as_str(), "user" | "assistant")).count() as i64;
            let tool_calls = session.messages.iter().filter(|m| m.role == "tool").count() as i64;

            records.push(DiscoveredSession {
                run_id: sess_id,
                agent_type: "opencode".to_string(),
                session_path: jsonl_path.to_string_lossy().into_owned(),
                start_time: start_dt,
                repo_name: directory,
                status: "completed".to_string(),
                duration_ms: 0,
                message_count,
                tool_call_count: tool_calls,
                error_count: 0,
                total_tokens: session.total_input_tokens + session.total_output_tokens,
                summaries,
                content_hash: file_hash,
            });
        }
        records
    }
}

impl OpenCodeAdapter {
    fn read_session_db(&self, db_path: &Path, session_id: &str) -> Option<ViewerSession> {
        let conn = rusqlite::Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;

        let (cwd, _version, title): (Option<String>, Option<String>, Option<String>) = conn
            .query_row(
                "SELECT directory, version, title FROM session WHERE id = ?1",
                [session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .ok()?;

        let mut stmt = conn
            .prepare("SELECT id, data FROM message WHERE session_id = ?1 ORDER BY time_created")
            .ok()?;
        let msg_rows: Vec<(String, Option<String>)> = stmt
            .query_map([session_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok()?
            .flatten()
            .collect();
        drop(stmt);

        let mut total_input = 0i64;
        let mut total_output = 0i64;
        let mut messages = Vec::new();

        for (msg_id, msg_raw) in msg_rows {
            let msg = Self::json_col(msg_raw.as_deref());
            let role = msg.get("role").and_then(Value::as_str).unwrap_or("assistant").to_string();
            let timestamp = Self::epoch_millis_to_ts(msg.get("time").and_then(|t| t.get("created")));
            let ts_iso = timestamp.map(|t| t.to_rfc3339());

            if let Some(tokens) = msg.get("tokens") {
                total_input += tokens.get("input").and_then(Value::as_i64).unwrap_or(0);
                total_output += tokens.get("output").and_then(Value::as_i64).unwrap_or(0);
                total_output += tokens.get("reasoning").and_then(Value::as_i64).unwrap_or(0);
            }
            let model_id = msg.get("modelID").and_then(Value::as_str).map(str::to_string);

            let mut part_stmt = conn
                .prepare("SELECT data FROM part WHERE message_id = ?1 ORDER BY time_created")
                .ok()?;
            let part_rows: Vec<Option<String>> = part_stmt
                .query_map([&msg_id], |row| row.get(0))
                .ok()?
                .flatten()
                .collect();
            drop(part_stmt);

            let mut text_parts = Vec::new();
            for part_raw in part_rows {
                let part = Self::json_col(part_raw.as_deref());
                match part.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = part.get("text").and_then(Value::as_str) {
                            if !text.trim().is_empty() {
                                text_parts.push(text.trim().to_string());
                            }
                        }
                    }
                    Some("tool") => {
                        let tool_name = part.get("tool").and_then(Value::as_str).unwrap_or("tool").to_string();
                        let state = part.get("state").cloned().unwrap_or(Value::Null);
                        let tool_ts = Self::epoch_millis_to_ts(state.get("time").and_then(|t| t.get("start")));
                        messages.push(ViewerMessage {
                            role: "tool".to_string(),
                            tool_name: Some(tool_name),
                            tool_input: state.get("input").cloned(),
                            tool_output: state.get("output").cloned(),
                            timestamp: tool_ts.map(|t| t.to_rfc3339()),
                            ..Default::default()
                        });
                    }
                    _ => {}
                }
            }

            let content = text_parts.join("\n");
            if !content.trim().is_empty() {
                messages.push(ViewerMessage {
                    role,
                    content: Some(content),
                    timestamp: ts_iso,
                    model: model_id,
                    ..Default::default()
                });
            }
        }

        let mut meta = HashMap::new();
        if let Some(title) = title {
            meta.insert("title".to_string(), Value::String(title));
        }

        Some(ViewerSession {
            session_id: session_id.to_string(),
            cwd,
            messages,
            total_input_tokens: total_input,
            total_output_tokens: total_output,
            meta,
            ..Default::default()
        })
    }

    fn read_session_jsonl(&self, path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        let lines = load_jsonl_dict_lines(path);
        let (metadata, rows) = lines.split_first()?;
        let resolved_id = session_id
            .map(str::to_string)
            .or_else(|| metadata.get("session_id").and_then(Value::as_str).map(str::to_string))
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let mut messages = Vec::new();
        for row in rows {
            let role = row.get("role").and_then(Value::as_str).unwrap_or("assistant").to_string();
            if role == "tool" {
                messages.push(ViewerMessage {
                    role,
                    tool_name: row.get("tool_name").and_then(Value::as_str).map(str::to_string),
                    tool_input: row.get("tool_input").cloned(),
                    tool_output: row.get("tool_output").cloned(),
                    timestamp: row.get("timestamp").and_then(Value::as_str).map(str::to_string),
                    ..Default::default()
                });
            } else {
                let content = row.get("content").and_then(Value::as_str).unwrap_or("");
                if !content.trim().is_empty() {
                    messages.push(ViewerMessage {
                        role,
                        content: Some(content.to_string()),
                        timestamp: row.get("timestamp").and_then(Value::as_str).map(str::to_string),
                        model: row.get("model").and_then(Value::as_str).map(str::to_string),
                        ..Default::default()
                    });
                }
            }
        }
        Some(ViewerSession {
            session_id: resolved_id,
            cwd: metadata.get("cwd").and_then(Value::as_str).map(str::to_string),
            messages,
            total_input_tokens: metadata.get("total_input_tokens").and_then(Value::as_i64).unwrap_or(0),
            total_output_tokens: metadata.get("total_output_tokens").and_then(Value::as_i64).unwrap_or(0),
            ..Default::default()
        })
    }

    fn export_session_jsonl(&self, session_id: &str, session: &ViewerSession, out_dir: &Path) -> PathBuf {
        let jsonl_path = out_dir.join(format!("{session_id}.jsonl"));
        if let Ok(mut file) = std::fs::File::create(&jsonl_path) {
            let metadata = serde_json::json!({
                "session_id": session.session_id,
                "cwd": session.cwd,
                "total_input_tokens": session.total_input_tokens,
                "total_output_tokens": session.total_output_tokens,
                "meta": session.meta,
            });
            let _ = writeln!(file, "{}", metadata);
            for msg in &session.messages {
                let _ = writeln!(file, "{}", serde_json::to_string(msg).unwrap_or_default());
            }
        }
        jsonl_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_col_falls_back_to_empty_object_on_garbage() {
        assert_eq!(OpenCodeAdapter::json_col(Some("not-json")), serde_json::json!({}));
        assert_eq!(OpenCodeAdapter::json_col(None), serde_json::json!({}));
    }

    #[test]
    fn epoch_millis_to_ts_roundtrips() {
        let ts = OpenCodeAdapter::epoch_millis_to_ts(Some(&Value::from(1_706_000_000_000i64))).unwrap();
        assert_eq!(ts.timestamp(), 1_706_000_000);
    }

    #[test]
    fn read_session_jsonl_rebuilds_tool_and_text_messages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        std::fs::write(
            &path,
            "{\"session_id\":\"sess\",\"cwd\":\"/tmp\"}\n\
             {\"role\":\"user\",\"content\":\"hi\"}\n\
             {\"role\":\"tool\",\"tool_name\":\"bash\",\"tool_input\":{\"cmd\":\"ls\"}}\n",
        )
        .unwrap();
        let adapter = OpenCodeAdapter;
        let session = adapter.read_session_jsonl(&path, None).unwrap();
        assert_eq!(session.session_id, "sess");
        assert_eq!(session.cwd.as_deref(), Some("/tmp"));
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].tool_name.as_deref(), Some("bash"));
    }
}
