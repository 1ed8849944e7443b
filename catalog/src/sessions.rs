//! The session catalog: one row per discovered coding-agent session, kept
//! in sync with an FTS5 full-text index via triggers so search never runs
//! against a stale shadow table.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::connection::open_connection;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub run_id: String,
    pub agent_type: String,
    pub session_path: String,
    pub start_time: DateTime<Utc>,
    pub repo_name: Option<String>,
    pub message_count: i64,
    pub tool_call_count: i64,
    pub error_count: i64,
    pub total_tokens: i64,
    pub summaries: Vec<String>,
    pub content_hash: String,
    /// Discovery-time status: `active` while the session file is still
    /// being appended to, `complete` once the adapter sees no further
    /// growth across a poll cycle.
    pub status: String,
    pub duration_ms: Option<i64>,
    /// `success | error | unknown`, set by the extract pipeline from the
    /// session's final turns.
    pub outcome: Option<String>,
    pub indexed_at: DateTime<Utc>,
    pub tags: Vec<String>,
    /// Raw transcript turns as adapter-normalized JSON, used to replay a
    /// session for `/api/runs/<id>/messages` without re-reading the source
    /// file from disk.
    pub turns_json: Option<String>,
    /// The extract pipeline's generated narrative summary, stored alongside
    /// `summaries` (tag-like short phrases) for full-text search and the
    /// summary memory primitive this session produced.
    pub summary_text: Option<String>,
}

#[derive(Clone)]
pub struct SessionCatalog {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl SessionCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        let catalog = SessionCatalog {
            conn: Arc::new(Mutex::new(conn)),
        };
        catalog.init_schema()?;
        Ok(catalog)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_docs (
                id INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL UNIQUE,
                agent_type TEXT NOT NULL,
                session_path TEXT NOT NULL,
                start_time TEXT NOT NULL,
                repo_name TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                tool_call_count INTEGER NOT NULL DEFAULT 0,
                error_count INTEGER NOT NULL DEFAULT 0,
                total_tokens INTEGER NOT NULL DEFAULT 0,
                summaries TEXT NOT NULL DEFAULT '[]',
                content_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'complete',
                duration_ms INTEGER,
                outcome TEXT,
                indexed_at TEXT NOT NULL,
                tags TEXT NOT NULL DEFAULT '[]',
                turns_json TEXT,
                summary_text TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_session_docs_agent_type
                ON session_docs(agent_type);
            CREATE INDEX IF NOT EXISTS idx_session_docs_start_time
                ON session_docs(start_time);

            CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
                run_id,
                repo_name,
                summaries,
                summary_text,
                content='session_docs',
                content_rowid='id'
            );

            CREATE TRIGGER IF NOT EXISTS session_docs_ai AFTER INSERT ON session_docs BEGIN
                INSERT INTO sessions_fts(rowid, run_id, repo_name, summaries, summary_text)
                VALUES (new.id, new.run_id, new.repo_name, new.summaries, new.summary_text);
            END;

            CREATE TRIGGER IF NOT EXISTS session_docs_ad AFTER DELETE ON session_docs BEGIN
                INSERT INTO sessions_fts(sessions_fts, rowid, run_id, repo_name, summaries, summary_text)
                VALUES ('delete', old.id, old.run_id, old.repo_name, old.summaries, old.summary_text);
            END;

            CREATE TRIGGER IF NOT EXISTS session_docs_au AFTER UPDATE ON session_docs BEGIN
                INSERT INTO sessions_fts(sessions_fts, rowid, run_id, repo_name, summaries, summary_text)
                VALUES ('delete', old.id, old.run_id, old.repo_name, old.summaries, old.summary_text);
                INSERT INTO sessions_fts(rowid, run_id, repo_name, summaries, summary_text)
                VALUES (new.id, new.run_id, new.repo_name, new.summaries, new.summary_text);
            END;",
        )?;

        Ok(())
    }

    /// Inserts or replaces a session's catalog row, keyed on `run_id`.
    pub fn upsert_session(&self, record: &SessionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let summaries_json = serde_json::to_string(&record.summaries)?;
        let tags_json = serde_json::to_string(&record.tags)?;
        conn.execute(
            "INSERT INTO session_docs
                (run_id, agent_type, session_path, start_time, repo_name,
                 message_count, tool_call_count, error_count, total_tokens,
                 summaries, content_hash, status, duration_ms, outcome,
                 indexed_at, tags, turns_json, summary_text)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
             ON CONFLICT(run_id) DO UPDATE SET
                agent_type = excluded.agent_type,
                session_path = excluded.session_path,
                start_time = excluded.start_time,
                repo_name = excluded.repo_name,
                message_count = excluded.message_count,
                tool_call_count = excluded.tool_call_count,
                error_count = excluded.error_count,
                total_tokens = excluded.total_tokens,
                summaries = excluded.summaries,
                content_hash = excluded.content_hash,
                status = excluded.status,
                duration_ms = excluded.duration_ms,
                outcome = excluded.outcome,
                indexed_at = excluded.indexed_at,
                tags = excluded.tags,
                turns_json = excluded.turns_json,
                summary_text = excluded.summary_text;",
            params![
                record.run_id,
                record.agent_type,
                record.session_path,
                record.start_time.to_rfc3339(),
                record.repo_name,
                record.message_count,
                record.tool_call_count,
                record.error_count,
                record.total_tokens,
                summaries_json,
                record.content_hash,
                record.status,
                record.duration_ms,
                record.outcome,
                record.indexed_at.to_rfc3339(),
                tags_json,
                record.turns_json,
                record.summary_text,
            ],
        )?;
        Ok(())
    }

    /// Returns `{run_id: content_hash}` for every known run of `agent_type`,
    /// used by adapters to skip unchanged sessions during discovery.
    pub fn known_run_hashes(&self, agent_type: &str) -> Result<HashMap<String, String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT run_id, content_hash FROM session_docs WHERE agent_type = ?1;",
        )?;
        let rows = stmt.query_map(params![agent_type], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (run_id, hash) = row?;
            out.insert(run_id, hash);
        }
        Ok(out)
    }

    pub fn get_by_run_id(&self, run_id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT run_id, agent_type, session_path, start_time, repo_name,
                    message_count, tool_call_count, error_count, total_tokens,
                    summaries, content_hash, status, duration_ms, outcome,
                    indexed_at, tags, turns_json, summary_text
             FROM session_docs WHERE run_id = ?1;",
            params![run_id],
            Self::row_to_record,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_runs(
        &self,
        agent_type: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let since_str = since.map(|dt| dt.to_rfc3339());

        let mut stmt = conn.prepare(
            "SELECT run_id, agent_type, session_path, start_time, repo_name,
                    message_count, tool_call_count, error_count, total_tokens,
                    summaries, content_hash, status, duration_ms, outcome,
                    indexed_at, tags, turns_json, summary_text
             FROM session_docs
             WHERE (?1 IS NULL OR agent_type = ?1)
               AND (?2 IS NULL OR start_time >= ?2)
             ORDER BY start_time DESC;",
        )?;
        let rows = stmt.query_map(params![agent_type, since_str], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Paginated, multi-filter listing backing `/api/runs` (§4.1): filters
    /// by any of `agent_types` (empty means all), an inclusive `since`/
    /// `until` window, orders newest-first, and returns the page alongside
    /// the total matching row count so a caller can compute `has_more`.
    pub fn list_window(
        &self,
        limit: usize,
        offset: usize,
        agent_types: &[String],
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<(Vec<SessionRecord>, u64)> {
        let conn = self.conn.lock().unwrap();
        let since_str = since.map(|dt| dt.to_rfc3339());
        let until_str = until.map(|dt| dt.to_rfc3339());

        let agent_filter_sql = if agent_types.is_empty() {
            String::new()
        } else {
            let placeholders = agent_types.iter().map(|t| format!("'{}'", t.replace('\'', "''"))).collect::<Vec<_>>().join(",");
            format!("AND agent_type IN ({placeholders})")
        };

        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(1) FROM session_docs
                 WHERE (?1 IS NULL OR start_time >= ?1)
                   AND (?2 IS NULL OR start_time <= ?2)
                   {agent_filter_sql};"
            ),
            params![since_str, until_str],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT run_id, agent_type, session_path, start_time, repo_name,
                    message_count, tool_call_count, error_count, total_tokens,
                    summaries, content_hash, status, duration_ms, outcome,
                    indexed_at, tags, turns_json, summary_text
             FROM session_docs
             WHERE (?1 IS NULL OR start_time >= ?1)
               AND (?2 IS NULL OR start_time <= ?2)
               {agent_filter_sql}
             ORDER BY start_time DESC
             LIMIT ?3 OFFSET ?4;"
        ))?;
        let rows = stmt.query_map(params![since_str, until_str, limit as i64, offset as i64], Self::row_to_record)?;
        let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((records, total.max(0) as u64))
    }

    /// Per-status, per-outcome totals for `/api/runs/stats`.
    pub fn stats(&self) -> Result<SessionStats> {
        let conn = self.conn.lock().unwrap();
        let total: i64 = conn.query_row("SELECT COUNT(1) FROM session_docs;", [], |row| row.get(0))?;
        let errored: i64 = conn.query_row(
            "SELECT COUNT(1) FROM session_docs WHERE outcome = 'error';",
            [],
            |row| row.get(0),
        )?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(1) FROM session_docs WHERE status = 'active';",
            [],
            |row| row.get(0),
        )?;
        let total_tokens: i64 = conn.query_row(
            "SELECT COALESCE(SUM(total_tokens), 0) FROM session_docs;",
            [],
            |row| row.get(0),
        )?;
        Ok(SessionStats {
            total_sessions: total,
            error_sessions: errored,
            active_sessions: active,
            total_tokens,
        })
    }

    /// Full-text search over run_id/repo_name/summaries/summary_text,
    /// ranked by FTS5's built-in bm25 relevance.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT d.run_id, d.agent_type, d.session_path, d.start_time, d.repo_name,
                    d.message_count, d.tool_call_count, d.error_count, d.total_tokens,
                    d.summaries, d.content_hash, d.status, d.duration_ms, d.outcome,
                    d.indexed_at, d.tags, d.turns_json, d.summary_text
             FROM sessions_fts f
             JOIN session_docs d ON d.id = f.rowid
             WHERE sessions_fts MATCH ?1
             ORDER BY bm25(sessions_fts)
             LIMIT ?2;",
        )?;
        let rows = stmt.query_map(params![query, limit as i64], Self::row_to_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<SessionRecord> {
        let summaries_json: String = row.get(9)?;
        let summaries: Vec<String> = serde_json::from_str(&summaries_json).unwrap_or_default();
        let start_time_str: String = row.get(3)?;
        let start_time = DateTime::parse_from_rfc3339(&start_time_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let indexed_at_str: String = row.get(14)?;
        let indexed_at = DateTime::parse_from_rfc3339(&indexed_at_str)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());
        let tags_json: String = row.get(15)?;
        let tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();

        Ok(SessionRecord {
            run_id: row.get(0)?,
            agent_type: row.get(1)?,
            session_path: row.get(2)?,
            start_time,
            repo_name: row.get(4)?,
            message_count: row.get(5)?,
            tool_call_count: row.get(6)?,
            error_count: row.get(7)?,
            total_tokens: row.get(8)?,
            summaries,
            content_hash: row.get(10)?,
            status: row.get(11)?,
            duration_ms: row.get(12)?,
            outcome: row.get(13)?,
            indexed_at,
            tags,
            turns_json: row.get(16)?,
            summary_text: row.get(17)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: i64,
    pub error_sessions: i64,
    pub active_sessions: i64,
    pub total_tokens: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(run_id: &str, hash: &str) -> SessionRecord {
        SessionRecord {
            run_id: run_id.to_string(),
            agent_type: "claude".to_string(),
            session_path: format!("/sessions/{run_id}.jsonl"),
            start_time: Utc::now(),
            repo_name: Some("lerim".to_string()),
            message_count: 10,
            tool_call_count: 3,
            error_count: 0,
            total_tokens: 1200,
            summaries: vec!["did a thing".to_string()],
            content_hash: hash.to_string(),
            status: "complete".to_string(),
            duration_ms: Some(45_000),
            outcome: Some("success".to_string()),
            indexed_at: Utc::now(),
            tags: vec!["rust".to_string()],
            turns_json: Some("[]".to_string()),
            summary_text: Some("Refactored the queue module.".to_string()),
        }
    }

    #[test]
    fn upsert_then_get_by_run_id_round_trips() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();

        let fetched = catalog.get_by_run_id("run-1").unwrap().unwrap();
        assert_eq!(fetched.content_hash, "abc");
        assert_eq!(fetched.message_count, 10);
        assert_eq!(fetched.outcome.as_deref(), Some("success"));
        assert_eq!(fetched.tags, vec!["rust".to_string()]);
    }

    #[test]
    fn upsert_on_existing_run_id_replaces_row() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();
        catalog.upsert_session(&sample("run-1", "def")).unwrap();

        let hashes = catalog.known_run_hashes("claude").unwrap();
        assert_eq!(hashes.get("run-1"), Some(&"def".to_string()));
        assert_eq!(hashes.len(), 1);
    }

    #[test]
    fn search_finds_by_summary_text() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();

        let results = catalog.search("thing", 10).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].run_id, "run-1");

        let by_summary_text = catalog.search("queue", 10).unwrap();
        assert_eq!(by_summary_text.len(), 1);

        let empty = catalog.search("nonexistent", 10).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn list_runs_filters_by_agent_type() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();
        let mut other = sample("run-2", "xyz");
        other.agent_type = "codex".to_string();
        catalog.upsert_session(&other).unwrap();

        let claude_runs = catalog.list_runs(Some("claude"), None).unwrap();
        assert_eq!(claude_runs.len(), 1);
        let all_runs = catalog.list_runs(None, None).unwrap();
        assert_eq!(all_runs.len(), 2);
    }

    #[test]
    fn list_window_paginates_and_reports_total() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        for i in 0..5 {
            catalog.upsert_session(&sample(&format!("run-{i}"), "h")).unwrap();
        }

        let (page, total) = catalog.list_window(2, 0, &[], None, None).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 5);

        let (next_page, total_again) = catalog.list_window(2, 2, &[], None, None).unwrap();
        assert_eq!(next_page.len(), 2);
        assert_eq!(total_again, 5);
        assert_ne!(page[0].run_id, next_page[0].run_id);
    }

    #[test]
    fn list_window_filters_by_multiple_agent_types() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();
        let mut codex = sample("run-2", "xyz");
        codex.agent_type = "codex".to_string();
        catalog.upsert_session(&codex).unwrap();
        let mut cursor = sample("run-3", "def");
        cursor.agent_type = "cursor".to_string();
        catalog.upsert_session(&cursor).unwrap();

        let (page, total) = catalog
            .list_window(10, 0, &["claude".to_string(), "codex".to_string()], None, None)
            .unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 2);
    }

    #[test]
    fn stats_aggregates_across_sessions() {
        let dir = tempdir().unwrap();
        let catalog = SessionCatalog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        catalog.upsert_session(&sample("run-1", "abc")).unwrap();
        let mut errored = sample("run-2", "xyz");
        errored.outcome = Some("error".to_string());
        errored.status = "active".to_string();
        catalog.upsert_session(&errored).unwrap();

        let stats = catalog.stats().unwrap();
        assert_eq!(stats.total_sessions, 2);
        assert_eq!(stats.error_sessions, 1);
        assert_eq!(stats.active_sessions, 1);
        assert_eq!(stats.total_tokens, 2400);
    }
}
