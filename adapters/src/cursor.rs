//! Cursor adapter: extracts sessions from Cursor's `state.vscdb` SQLite
//! database. Ported from `adapters/cursor.py`.
//!
//! Cursor keeps every session in one `cursorDiskKV` key/value table:
//! session metadata under `composerData:<composerId>` and individual
//! messages under `bubbleId:<composerId>:<bubbleId>`. Each composer is
//! exported to its own JSONL cache file (metadata first line, then one
//! bubble per line) so the rest of the pipeline can treat it like any
//! other adapter's transcript.

use std::collections::{HashMap, HashSet};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::common::{compute_file_hash, in_window, load_jsonl_dict_lines, parse_timestamp};
use crate::protocol::{Adapter, DiscoveredSession, ViewerMessage, ViewerSession};

pub struct CursorAdapter;

impl CursorAdapter {
    fn cache_dir(&self) -> PathBuf {
        dirs::home_dir().unwrap_or_default().join(".lerim").join("cache").join("cursor")
    }

    /// Resolves candidate `state.vscdb` files from a root path: the root
    /// itself if it's a file, `<root>/state.vscdb`, or any
    /// `<root>/*/state.vscdb`.
    fn resolve_db_paths(root: &Path) -> Vec<PathBuf> {
        if root.is_file() {
            return vec![root.to_path_buf()];
        }
        let direct = root.join("state.vscdb");
        if direct.is_file() {
            return vec![direct];
        }
        let mut out = Vec::new();
        if let Ok(entries) = std::fs::read_dir(root) {
            for entry in entries.flatten() {
                let candidate = entry.path().join("state.vscdb");
                if candidate.is_file() {
                    out.push(candidate);
                }
            }
        }
        out
    }

    /// Cursor stores some values double-JSON-encoded (a JSON string
    /// containing another JSON document). Unwraps one layer when present.
    fn parse_json_value(raw: &str) -> Option<Value> {
        let value: Value = serde_json::from_str(raw).ok()?;
        if let Value::String(inner) = &value {
            if let Ok(nested) = serde_json::from_str::<Value>(inner) {
                return Some(nested);
            }
        }
        Some(value)
    }

    fn extract_text(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Object(map) => {
                for key in ["text", "content", "message", "value"] {
                    if let Some(v) = map.get(key) {
                        return Self::extract_text(v);
                    }
                }
                String::new()
            }
            Value::Array(items) => items
                .iter()
                .map(Self::extract_text)
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }

    /// Normalizes Cursor's bubble `type` (1=user, 2=assistant, otherwise
    /// tool) and string role aliases into `user`/`assistant`/`tool`.
    fn normalize_role(value: Option<&Value>) -> String {
        match value {
            Some(Value::Number(n)) => match n.as_i64() {
                Some(1) => "user".to_string(),
                Some(2) => "assistant".to_string(),
                _ => "tool".to_string(),
            },
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "user" | "human" | "human_user" => "user".to_string(),
                "assistant" | "ai" | "bot" | "model" => "assistant".to_string(),
                "tool" | "function" => "tool".to_string(),
                _ => "assistant".to_string(),
            },
            _ => "assistant".to_string(),
        }
    }

    fn query_bubble_ids(db_path: &Path) -> HashSet<String> {
        let mut ids = HashSet::new();
        let Ok(conn) = rusqlite::Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY) else {
            return ids;
        };
        let Ok(mut stmt) = conn.prepare("SELECT key FROM cursorDiskKV WHERE key LIKE 'bubbleId:%'") else {
            return ids;
        };
        let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(0)) else {
            return ids;
        };
        for key in rows.flatten() {
            let parts: Vec<&str> = key.splitn(3, ':').collect();
            if parts.len() >= 3 {
                ids.insert(parts[1].to_string());
            }
        }
        ids
    }
}

impl Adapter for CursorAdapter {
    fn name(&self) -> &'static str {
        "cursor"
    }

    fn default_path(&self) -> Option<PathBuf> {
        let home = dirs::home_dir()?;
        if cfg!(target_os = "macos") {
            Some(home.join("Library/Application Support/Cursor/User/globalStorage"))
        } else {
            Some(home.join(".config/Cursor/User/globalStorage"))
        }
    }

    fn count_sessions(&self, path: &Path) -> usize {
        if !path.exists() {
            return 0;
        }
        let mut ids = HashSet::new();
        for db_path in Self::resolve_db_paths(path) {
            ids.extend(Self::query_bubble_ids(&db_path));
        }
        ids.len()
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
        for db_path in Self::resolve_db_paths(&root) {
            if Self::query_bubble_ids(&db_path).contains(session_id) {
                return Some(db_path);
            }
        }
        None
    }

    fn read_session(&self, session_path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        if session_path.extension().and_then(|e| e.to_str()) == Some("jsonl") && session_path.is_file() {
            return self.read_session_jsonl(session_path, session_id);
        }
        let session_id = session_id?;
        if session_path.extension().and_then(|e| e.to_str()) == Some("vscdb") {
            return self.read_session_db(session_path, session_id);
        }
        let db_path = session_path.join("state.vscdb");
        if db_path.exists() {
            return self.read_session_db(&db_path, session_id);
        }
        None
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

        let out_dir = self.cache_dir();
        if std::fs::create_dir_all(&out_dir).is_err() {
            return Vec::new();
        }

        let mut records = Vec::new();
        for db_path in Self::resolve_db_paths(&root) {
            let Ok(conn) = rusqlite::Connection::open_with_flags(&db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY) else {
                continue;
            };

            let mut composers: HashMap<String, Value> = HashMap::new();
            if let Ok(mut stmt) = conn.prepare("SELECT key, value FROM cursorDiskKV WHERE key LIKE 'composerData:%'") {
                if let Ok(rows) = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))) {
                    for (key, raw) in rows.flatten() {
                        if let Some(cid) = key.split_once(':').map(|(_, rest)| rest.to_string()) {
                            if let Some(parsed) = Self::parse_json_value(&raw) {
                                if parsed.is_object() {
                                    composers.insert(cid, parsed);
                                }
                            }
                        }
                    }
                }
            }

            let mut bubbles: HashMap<String, Vec<Value>> = HashMap::new();
            if let Ok(mut stmt) =
                conn.prepare("SELECT key, value FROM cursorDiskKV WHERE key LIKE 'bubbleId:%' ORDER BY key")
            {
                if let Ok(rows) = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))) {
                    for (key, raw) in rows.flatten() {
                        let parts: Vec<&str> = key.splitn(3, ':').collect();
                        if parts.len() < 3 {
                            continue;
                        }
                        if let Some(parsed) = Self::parse_json_value(&raw) {
                            if parsed.is_object() {
                                bubbles.entry(parts[1].to_string()).or_default().push(parsed);
                            }
                        }
                    }
                }
            }

            for (cid, bubble_list) in bubbles {
                let metadata = composers.get(&cid).cloned().unwrap_or(Value::Object(Default::default()));
                let started_at = metadata
                    .get("createdAt")
                    .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
                    .and_then(|s| parse_timestamp(&s).or_else(|| {
                        s.parse::<f64>().ok().and_then(crate::common::parse_timestamp_numeric)
                    }));

                if !in_window(started_at, start, end) {
                    continue;
                }

                let jsonl_path = out_dir.join(format!("{cid}.jsonl"));
                if let Ok(mut file) = std::fs::File::create(&jsonl_path) {
                    let _ = writeln!(file, "{}", metadata);
                    for bubble in &bubble_list {
                        let _ = writeln!(file, "{}", bubble);
                    }
                }

                let Ok(file_hash) = compute_file_hash(&jsonl_path) else { continue };
                if let Some(known) = known_run_hashes {
                    if known.get(&cid) == Some(&file_hash) {
                        continue;
                    }
                }

                let is_turn = |b: &Value| matches!(b.get("type").and_then(Value::as_i64), Some(1) | Some(2));
                let message_count = bubble_list.iter().filter(|b| is_turn(b)).count() as i64;
                let tool_count = bubble_list.iter().filter(|b| !is_turn(b)).count() as i64;

                let mut summaries = Vec::new();
                for bubble in &bubble_list {
                    if bubble.get("type").and_then(Value::as_i64) == Some(1) {
                        let text = Self::extract_text(bubble.get("text").unwrap_or(&Value::Null));
                        let trimmed = text.trim();
                        if !trimmed.is_empty() {
                            summaries.push(trimmed.chars().take(140).collect::<String>());
                        }
                        if summaries.len() >= 5 {
                            break;
                        }
                    }
                }

                records.push(DiscoveredSession {
                    run_id: cid,
                    agent_type: "cursor".to_string(),
                    session_path: jsonl_path.to_string_lossy().into_owned(),
                    start_time: started_at,
                    repo_name: None,
                    status: "completed".to_string(),
                    duration_ms: 0,
                    message_count,
                    tool_call_count: tool_count,
                    error_count: 0,
                    total_tokens: 0,
                    summaries,
                    content_hash: file_hash,
                });
            }
        }
        records
    }
}

impl CursorAdapter {
    fn read_session_jsonl(&self, path: &Path, session_id: Option<&str>) -> Option<ViewerSession> {
        let lines = load_jsonl_dict_lines(path);
        let (metadata, bubbles) = lines.split_first()?;
        let resolved_id = session_id
            .map(str::to_string)
            .or_else(|| metadata.get("composerId").and_then(Value::as_str).map(str::to_string))
            .or_else(|| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let mut messages = Vec::new();
        for bubble in bubbles {
            let role = Self::normalize_role(bubble.get("type"));
            let text = Self::extract_text(bubble.get("text").unwrap_or(&Value::Null));
            if text.trim().is_empty() {
                continue;
            }
            messages.push(ViewerMessage {
                role,
                content: Some(text),
                ..Default::default()
            });
        }
        Some(ViewerSession {
            session_id: resolved_id,
            messages,
            ..Default::default()
        })
    }

    fn read_session_db(&self, db_path: &Path, session_id: &str) -> Option<ViewerSession> {
        let conn = rusqlite::Connection::open_with_flags(db_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        let mut stmt = conn
            .prepare("SELECT value FROM cursorDiskKV WHERE key LIKE ?1 ORDER BY key")
            .ok()?;
        let pattern = format!("bubbleId:{session_id}:%");
        let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0)).ok()?;

        let mut messages = Vec::new();
        for raw in rows.flatten() {
            let Some(bubble) = Self::parse_json_value(&raw) else { continue };
            if !bubble.is_object() {
                continue;
            }
            let role = Self::normalize_role(bubble.get("type"));
            let text = Self::extract_text(bubble.get("text").unwrap_or(&Value::Null));
            if text.trim().is_empty() {
                continue;
            }
            messages.push(ViewerMessage {
                role,
                content: Some(text),
                ..Default::default()
            });
        }
        if messages.is_empty() {
            None
        } else {
            Some(ViewerSession {
                session_id: session_id.to_string(),
                messages,
                ..Default::default()
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_role_maps_integer_bubble_types() {
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from(1))), "user");
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from(2))), "assistant");
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from(9))), "tool");
    }

    #[test]
    fn normalize_role_maps_string_aliases() {
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from("human"))), "user");
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from("bot"))), "assistant");
        assert_eq!(CursorAdapter::normalize_role(Some(&Value::from("function"))), "tool");
        assert_eq!(CursorAdapter::normalize_role(None), "assistant");
    }

    #[test]
    fn extract_text_unwraps_nested_dict_and_list() {
        let value = serde_json::json!({"content": [{"text": "a"}, {"text": "b"}]});
        assert_eq!(CursorAdapter::extract_text(&value), "a\nb");
    }

    #[test]
    fn parse_json_value_unwraps_double_encoding() {
        let raw = serde_json::to_string(&serde_json::to_string(&serde_json::json!({"a": 1})).unwrap()).unwrap();
        let parsed = CursorAdapter::parse_json_value(&raw).unwrap();
        assert_eq!(parsed, serde_json::json!({"a": 1}));
    }

    #[test]
    fn read_session_jsonl_skips_blank_bubbles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.jsonl");
        std::fs::write(
            &path,
            "{\"composerId\":\"abc\"}\n{\"type\":1,\"text\":\"hi\"}\n{\"type\":1,\"text\":\"  \"}\n",
        )
        .unwrap();
        let adapter = CursorAdapter;
        let session = adapter.read_session_jsonl(&path, None).unwrap();
        assert_eq!(session.session_id, "abc");
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, "user");
    }
}
