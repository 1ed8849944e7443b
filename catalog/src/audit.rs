//! Service-run audit log: one row per sync/maintain *cycle* (not per
//! session run_id — a single cycle processes many sessions), kept
//! independently of the job queue so history survives job cleanup. Grounded
//! on the original `service_runs` table in `sessions/catalog.py`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::connection::open_connection;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRun {
    pub id: i64,
    pub job_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct AuditLog {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl AuditLog {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        let log = AuditLog {
            conn: Arc::new(Mutex::new(conn)),
        };
        log.init_schema()?;
        Ok(log)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS service_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                trigger TEXT,
                details_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_service_runs_job_type ON service_runs(job_type, started_at);",
        )?;
        Ok(())
    }

    /// Opens a new `running` cycle row and returns its id.
    pub fn start(&self, job_type: &str, trigger: Option<&str>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO service_runs (job_type, status, started_at, trigger)
             VALUES (?1, 'running', ?2, ?3);",
            params![job_type, Utc::now().to_rfc3339(), trigger],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish(&self, id: i64, status: &str, details: Option<serde_json::Value>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let details_json = details.map(|v| v.to_string());
        conn.execute(
            "UPDATE service_runs SET status = ?2, completed_at = ?3, details_json = ?4 WHERE id = ?1;",
            params![id, status, Utc::now().to_rfc3339(), details_json],
        )?;
        Ok(())
    }

    /// Most recent cycle of a given type, regardless of outcome. Used by
    /// `/api/status` to report "last sync" / "last maintain" timestamps.
    pub fn latest(&self, job_type: &str) -> Result<Option<ServiceRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_type, status, started_at, completed_at, trigger, details_json
             FROM service_runs WHERE job_type = ?1 ORDER BY started_at DESC LIMIT 1;",
        )?;
        let mut rows = stmt.query_map(params![job_type], Self::row_to_run)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn recent(&self, job_type: &str, limit: usize) -> Result<Vec<ServiceRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_type, status, started_at, completed_at, trigger, details_json
             FROM service_runs WHERE job_type = ?1 ORDER BY started_at DESC LIMIT ?2;",
        )?;
        let rows = stmt.query_map(params![job_type, limit as i64], Self::row_to_run)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn row_to_run(row: &rusqlite::Row) -> rusqlite::Result<ServiceRun> {
        let started_at: String = row.get(3)?;
        let completed_at: Option<String> = row.get(4)?;
        let details_json: Option<String> = row.get(6)?;
        Ok(ServiceRun {
            id: row.get(0)?,
            job_type: row.get(1)?,
            status: row.get(2)?,
            started_at: DateTime::parse_from_rfc3339(&started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            completed_at: completed_at.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
            trigger: row.get(5)?,
            details: details_json.and_then(|s| serde_json::from_str(&s).ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn start_then_finish_records_status() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        let id = log.start("sync", Some("schedule")).unwrap();
        log.finish(id, "ok", Some(serde_json::json!({"added": 2}))).unwrap();

        let runs = log.recent("sync", 10).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, "ok");
        assert!(runs[0].completed_at.is_some());
        assert_eq!(runs[0].trigger.as_deref(), Some("schedule"));
    }

    #[test]
    fn latest_returns_most_recent_of_type_only() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        let sync_id = log.start("sync", None).unwrap();
        log.finish(sync_id, "ok", None).unwrap();
        let maintain_id = log.start("maintain", None).unwrap();
        log.finish(maintain_id, "ok", None).unwrap();

        let latest_sync = log.latest("sync").unwrap().unwrap();
        assert_eq!(latest_sync.job_type, "sync");
        let latest_maintain = log.latest("maintain").unwrap().unwrap();
        assert_eq!(latest_maintain.job_type, "maintain");
    }

    #[test]
    fn latest_is_none_when_type_never_ran() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(&dir.path().join("sessions.sqlite3")).unwrap();
        assert!(log.latest("sync").unwrap().is_none());
    }
}
