//! The durable sync/maintain job queue: one row per `(run_id, job_type)`,
//! carried through `pending -> running -> done/failed/dead_letter` with
//! exponential-backoff retry and stale-claim reclamation. Grounded on the
//! original `sessions/catalog.py` queue functions (`enqueue_session_job`,
//! `claim_session_jobs`, `fail_session_job`) — the schema and claim
//! transaction here are a direct port of that logic into one SQL table.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::connection::open_connection;
use crate::Result;

pub const JOB_TYPE_EXTRACT: &str = "extract";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Failed,
    DeadLetter,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::DeadLetter => "dead_letter",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "done" => JobStatus::Done,
            "failed" => JobStatus::Failed,
            "dead_letter" => JobStatus::DeadLetter,
            _ => JobStatus::Pending,
        }
    }
}

/// The canonical set of statuses `count_jobs_by_status` always zero-fills,
/// so callers never have to guard a missing key.
pub const ALL_STATUSES: [JobStatus; 5] = [
    JobStatus::Pending,
    JobStatus::Running,
    JobStatus::Done,
    JobStatus::Failed,
    JobStatus::DeadLetter,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub run_id: String,
    pub job_type: String,
    pub agent_type: Option<String>,
    pub session_path: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub status: JobStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub trigger: Option<String>,
    pub available_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Options accepted by [`JobQueue::enqueue`]. `force = true` resets an
/// existing terminal/in-flight job back to `pending` with attempts cleared,
/// matching the re-enqueue-on-change behavior discovery triggers for
/// content-hash-changed sessions.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub agent_type: Option<String>,
    pub session_path: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub trigger: Option<String>,
    pub force: bool,
    pub max_attempts: i64,
}

#[derive(Clone)]
pub struct JobQueue {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl JobQueue {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        let queue = JobQueue {
            conn: Arc::new(Mutex::new(conn)),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                job_type TEXT NOT NULL DEFAULT 'extract',
                agent_type TEXT,
                session_path TEXT,
                start_time TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                trigger TEXT,
                available_at TEXT NOT NULL,
                claimed_at TEXT,
                completed_at TEXT,
                heartbeat_at TEXT,
                error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(run_id, job_type)
            );
            CREATE INDEX IF NOT EXISTS idx_session_jobs_status_available
                ON session_jobs(status, available_at);
            CREATE INDEX IF NOT EXISTS idx_session_jobs_claim
                ON session_jobs(status, start_time, available_at, id);",
        )?;
        Ok(())
    }

    /// Inserts a new job, or resets an existing `(run_id, job_type)` row
    /// back to `pending` when `force` is set. Without `force`, an existing
    /// job that is still pending/running/failed/done is left untouched and
    /// this call is a no-op (returns `false`).
    pub fn enqueue(&self, run_id: &str, job_type: &str, opts: EnqueueOptions) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let max_attempts = opts.max_attempts.max(1);

        let existing_status: Option<String> = conn
            .query_row(
                "SELECT status FROM session_jobs WHERE run_id = ?1 AND job_type = ?2;",
                params![run_id, job_type],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(status) = existing_status {
            if !opts.force {
                return Ok(false);
            }
            let _ = status;
            conn.execute(
                "UPDATE session_jobs SET
                    agent_type = ?1, session_path = ?2, start_time = ?3, status = 'pending',
                    attempts = 0, trigger = ?4, available_at = ?5, claimed_at = NULL,
                    completed_at = NULL, heartbeat_at = NULL, error = NULL,
                    updated_at = ?5, max_attempts = ?6
                 WHERE run_id = ?7 AND job_type = ?8;",
                params![
                    opts.agent_type,
                    opts.session_path,
                    opts.start_time.map(|t| t.to_rfc3339()),
                    opts.trigger,
                    now_str,
                    max_attempts,
                    run_id,
                    job_type,
                ],
            )?;
            return Ok(true);
        }

        conn.execute(
            "INSERT INTO session_jobs
                (run_id, job_type, agent_type, session_path, start_time, status,
                 attempts, max_attempts, trigger, available_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, ?6, ?7, ?8, ?8, ?8);",
            params![
                run_id,
                job_type,
                opts.agent_type,
                opts.session_path,
                opts.start_time.map(|t| t.to_rfc3339()),
                max_attempts,
                opts.trigger,
                now_str,
            ],
        )?;
        Ok(true)
    }

    /// Reclaims stale `running` jobs (no heartbeat within `timeout_seconds`)
    /// and claims up to `limit` eligible jobs, both within one transaction
    /// so two concurrent cycles can never double-claim a row. Claim order:
    /// newest `start_time` first, then earliest `available_at`, then `id`.
    pub fn claim_jobs(
        &self,
        limit: usize,
        run_ids: Option<&[String]>,
        job_type: &str,
        timeout_seconds: i64,
    ) -> Result<Vec<Job>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let stale_before = (now - chrono::Duration::seconds(timeout_seconds.max(30))).to_rfc3339();

        let stale: Vec<(i64, i64, i64)> = {
            let mut stmt = tx.prepare(
                "SELECT id, attempts, max_attempts FROM session_jobs
                 WHERE status = 'running'
                   AND COALESCE(heartbeat_at, claimed_at) IS NOT NULL
                   AND COALESCE(heartbeat_at, claimed_at) < ?1;",
            )?;
            let rows = stmt.query_map(params![stale_before], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (id, attempts, max_attempts) in stale {
            let new_status = if attempts >= max_attempts {
                "dead_letter"
            } else {
                "pending"
            };
            tx.execute(
                "UPDATE session_jobs
                 SET status = ?1, available_at = ?2, claimed_at = NULL,
                     heartbeat_at = NULL, updated_at = ?2
                 WHERE id = ?3;",
                params![new_status, now_str, id],
            )?;
        }

        let ids: Vec<i64> = {
            // rusqlite has no portable array binding without an extension;
            // filter run_ids in Rust instead of SQL to keep this dependency-free.
            let mut stmt = tx.prepare(
                "SELECT id, run_id FROM session_jobs
                 WHERE status IN ('pending', 'failed') AND job_type = ?1 AND available_at <= ?2
                 ORDER BY start_time DESC, available_at ASC, id ASC
                 LIMIT ?3;",
            )?;
            let cap = if run_ids.is_some() {
                // Over-fetch since we may filter some out below.
                (limit.max(1) * 8) as i64
            } else {
                limit.max(1) as i64
            };
            let rows = stmt.query_map(params![job_type, now_str, cap], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (id, run_id) = row?;
                if let Some(filter) = run_ids {
                    if !filter.iter().any(|r| r == &run_id) {
                        continue;
                    }
                }
                out.push(id);
                if out.len() >= limit.max(1) {
                    break;
                }
            }
            out
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            tx.execute(
                "UPDATE session_jobs SET
                    status = 'running', attempts = attempts + 1,
                    claimed_at = ?1, heartbeat_at = ?1, updated_at = ?1
                 WHERE id = ?2;",
                params![now_str, id],
            )?;
            let job = tx.query_row(
                "SELECT id, run_id, job_type, agent_type, session_path, start_time, status,
                        attempts, max_attempts, trigger, available_at, claimed_at,
                        completed_at, heartbeat_at, error, created_at, updated_at
                 FROM session_jobs WHERE id = ?1;",
                params![id],
                Self::row_to_job,
            )?;
            claimed.push(job);
        }

        tx.commit()?;
        Ok(claimed)
    }

    /// Refreshes `heartbeat_at` for a running job. No-op if the job is not
    /// currently `running` (e.g. it was already reclaimed as stale).
    pub fn heartbeat(&self, run_id: &str, job_type: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE session_jobs SET heartbeat_at = ?1, updated_at = ?1
             WHERE run_id = ?2 AND job_type = ?3 AND status = 'running';",
            params![now, run_id, job_type],
        )?;
        Ok(changed > 0)
    }

    pub fn complete(&self, run_id: &str, job_type: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE session_jobs SET status = 'done', completed_at = ?1,
                heartbeat_at = ?1, updated_at = ?1
             WHERE run_id = ?2 AND job_type = ?3;",
            params![now, run_id, job_type],
        )?;
        Ok(changed > 0)
    }

    /// Marks a job failed, retrying with exponential backoff
    /// `min(3600, 30 * 2^(attempts-1))` seconds until `attempts >=
    /// max_attempts`, at which point it moves to `dead_letter` instead.
    pub fn fail(&self, run_id: &str, job_type: &str, error: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT attempts, max_attempts FROM session_jobs WHERE run_id = ?1 AND job_type = ?2;",
                params![run_id, job_type],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((attempts, max_attempts)) = row else {
            return Ok(false);
        };

        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let exhausted = attempts >= max_attempts;
        let status = if exhausted { "dead_letter" } else { "failed" };
        let available_at = if exhausted {
            now
        } else {
            now + chrono::Duration::seconds(backoff_seconds(attempts))
        };
        let completed_at = if exhausted { Some(now_str.clone()) } else { None };

        let changed = conn.execute(
            "UPDATE session_jobs SET
                status = ?1, available_at = ?2, completed_at = ?3,
                heartbeat_at = ?4, updated_at = ?4, error = ?5
             WHERE run_id = ?6 AND job_type = ?7;",
            params![
                status,
                available_at.to_rfc3339(),
                completed_at,
                now_str,
                error,
                run_id,
                job_type,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn count_by_status(&self) -> Result<std::collections::HashMap<String, i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT status, COUNT(1) FROM session_jobs GROUP BY status;")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut counts = std::collections::HashMap::new();
        for status in ALL_STATUSES {
            counts.insert(status.as_str().to_string(), 0);
        }
        for row in rows {
            let (status, total) = row?;
            counts.insert(status, total);
        }
        Ok(counts)
    }

    fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<Job> {
        let parse = |s: Option<String>| {
            s.and_then(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            })
        };
        Ok(Job {
            id: row.get(0)?,
            run_id: row.get(1)?,
            job_type: row.get(2)?,
            agent_type: row.get(3)?,
            session_path: row.get(4)?,
            start_time: parse(row.get(5)?),
            status: JobStatus::from_str(&row.get::<_, String>(6)?),
            attempts: row.get(7)?,
            max_attempts: row.get(8)?,
            trigger: row.get(9)?,
            available_at: parse(row.get(10)?).unwrap_or_else(Utc::now),
            claimed_at: parse(row.get(11)?),
            completed_at: parse(row.get(12)?),
            heartbeat_at: parse(row.get(13)?),
            error: row.get(14)?,
            created_at: parse(row.get(15)?).unwrap_or_else(Utc::now),
            updated_at: parse(row.get(16)?).unwrap_or_else(Utc::now),
        })
    }
}

/// `min(3600, 30 * 2^(attempts-1))`, `attempts` being the job's post-claim
/// attempt count at the time of this failure (already 1-indexed by
/// `claim_jobs`, which increments `attempts` before a job ever runs).
fn backoff_seconds(attempts: i64) -> i64 {
    let attempt = attempts.max(1);
    let exp = 30i64.saturating_mul(1i64 << (attempt - 1).clamp(0, 32));
    exp.min(3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts() -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: 3,
            ..Default::default()
        }
    }

    #[test]
    fn enqueue_then_claim_round_trips() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        assert!(queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap());

        let claimed = queue.claim_jobs(10, None, JOB_TYPE_EXTRACT, 300).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].run_id, "run-1");
        assert_eq!(claimed[0].attempts, 1);
        assert_eq!(claimed[0].status, JobStatus::Running);
    }

    #[test]
    fn enqueue_without_force_is_noop_when_in_flight() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap();
        assert!(!queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap());
    }

    #[test]
    fn enqueue_with_force_resets_to_pending() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap();
        queue.claim_jobs(10, None, JOB_TYPE_EXTRACT, 300).unwrap();
        queue.fail("run-1", JOB_TYPE_EXTRACT, "boom").unwrap();

        let forced = EnqueueOptions {
            force: true,
            ..opts()
        };
        assert!(queue.enqueue("run-1", JOB_TYPE_EXTRACT, forced).unwrap());
        let counts = queue.count_by_status().unwrap();
        assert_eq!(counts["pending"], 1);
        assert_eq!(counts["failed"], 0);
    }

    #[test]
    fn claim_orders_newest_start_time_first() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let later = Utc::now() - chrono::Duration::hours(1);
        queue
            .enqueue(
                "old",
                JOB_TYPE_EXTRACT,
                EnqueueOptions {
                    start_time: Some(earlier),
                    ..opts()
                },
            )
            .unwrap();
        queue
            .enqueue(
                "new",
                JOB_TYPE_EXTRACT,
                EnqueueOptions {
                    start_time: Some(later),
                    ..opts()
                },
            )
            .unwrap();

        let claimed = queue.claim_jobs(1, None, JOB_TYPE_EXTRACT, 300).unwrap();
        assert_eq!(claimed[0].run_id, "new");
    }

    #[test]
    fn fail_backs_off_then_dead_letters_at_max_attempts() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap();

        for _ in 0..2 {
            queue.claim_jobs(1, None, JOB_TYPE_EXTRACT, 300).unwrap();
            queue.fail("run-1", JOB_TYPE_EXTRACT, "boom").unwrap();
            // Force availability so the retry can be claimed immediately in tests.
            let conn = queue.conn.lock().unwrap();
            conn.execute(
                "UPDATE session_jobs SET available_at = ?1 WHERE run_id = 'run-1';",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();
        }

        let counts = queue.count_by_status().unwrap();
        assert_eq!(counts["failed"], 1);

        queue.claim_jobs(1, None, JOB_TYPE_EXTRACT, 300).unwrap();
        queue.fail("run-1", JOB_TYPE_EXTRACT, "final").unwrap();
        let counts = queue.count_by_status().unwrap();
        assert_eq!(counts["dead_letter"], 1);
    }

    #[test]
    fn stale_running_job_is_reclaimed_on_next_claim() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        queue.enqueue("run-1", JOB_TYPE_EXTRACT, opts()).unwrap();
        queue.claim_jobs(1, None, JOB_TYPE_EXTRACT, 300).unwrap();

        // Backdate the heartbeat to simulate a dead worker.
        {
            let conn = queue.conn.lock().unwrap();
            let stale = (Utc::now() - chrono::Duration::seconds(600)).to_rfc3339();
            conn.execute(
                "UPDATE session_jobs SET heartbeat_at = ?1 WHERE run_id = 'run-1';",
                params![stale],
            )
            .unwrap();
        }

        let reclaimed = queue.claim_jobs(1, None, JOB_TYPE_EXTRACT, 300).unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].attempts, 2);
    }

    #[test]
    fn backoff_formula_matches_spec() {
        assert_eq!(backoff_seconds(1), 30);
        assert_eq!(backoff_seconds(2), 60);
        assert_eq!(backoff_seconds(3), 120);
        assert_eq!(backoff_seconds(10), 3600);
    }

    #[test]
    fn count_by_status_zero_fills_canonical_keys() {
        let dir = tempdir().unwrap();
        let queue = JobQueue::open(&dir.path().join("sessions.sqlite3")).unwrap();
        let counts = queue.count_by_status().unwrap();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts["pending"], 0);
    }
}
