//! Tracks per-memory-file access history and computes the deterministic
//! confidence-decay used by the maintain pipeline's archive pass. Decay is
//! pure arithmetic — never LLM-computed — so it is reproducible and cheap
//! to recompute on every maintain cycle.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::connection::open_connection;
use crate::Result;

#[derive(Clone)]
pub struct AccessTracker {
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl AccessTracker {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_connection(path)?;
        let tracker = AccessTracker {
            conn: Arc::new(Mutex::new(conn)),
        };
        tracker.init_schema()?;
        Ok(tracker)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_access (
                memory_id TEXT NOT NULL,
                memory_root TEXT NOT NULL,
                access_count INTEGER NOT NULL DEFAULT 0,
                last_accessed TEXT NOT NULL,
                PRIMARY KEY (memory_id, memory_root)
            );",
        )?;
        Ok(())
    }

    /// `memory_id` is the primitive's relative path (e.g.
    /// `decisions/20260101-foo.md`); `memory_root` distinguishes the
    /// project data root from the global one so the same relative path in
    /// two scopes never collides.
    pub fn record_access(&self, memory_id: &str, memory_root: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO memory_access (memory_id, memory_root, access_count, last_accessed)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT(memory_id, memory_root) DO UPDATE SET
                access_count = access_count + 1,
                last_accessed = excluded.last_accessed;",
            params![memory_id, memory_root, now],
        )?;
        Ok(())
    }

    pub fn last_access(&self, memory_id: &str, memory_root: &str) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let raw: Option<String> = conn
            .query_row(
                "SELECT last_accessed FROM memory_access WHERE memory_id = ?1 AND memory_root = ?2;",
                params![memory_id, memory_root],
                |row| row.get(0),
            )
            .optional()?;
        Ok(raw.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    pub fn access_count(&self, memory_id: &str, memory_root: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: Option<i64> = conn
            .query_row(
                "SELECT access_count FROM memory_access WHERE memory_id = ?1 AND memory_root = ?2;",
                params![memory_id, memory_root],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }
}

/// Applies the confidence-decay formula:
///
/// ```text
/// effective = confidence * max(floor, 1 - days_since_reference / decay_days)
/// ```
///
/// where `days_since_reference` is days since last access, or days since
/// creation when no access record exists. Memories accessed within
/// `grace_days` are exempt and return their raw confidence unchanged.
#[allow(clippy::too_many_arguments)]
pub fn effective_confidence(
    confidence: f64,
    created_at: DateTime<Utc>,
    last_access: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    decay_days: u32,
    min_confidence_floor: f64,
    grace_days: u32,
) -> f64 {
    let reference = last_access.unwrap_or(created_at);
    let days_since = (now - reference).num_seconds() as f64 / 86_400.0;

    if days_since <= grace_days as f64 {
        return confidence;
    }

    if decay_days == 0 {
        return confidence * min_confidence_floor;
    }

    let decay_factor = 1.0 - days_since / decay_days as f64;
    confidence * decay_factor.max(min_confidence_floor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_access_increments_count() {
        let dir = tempdir().unwrap();
        let tracker = AccessTracker::open(&dir.path().join("memories.sqlite3")).unwrap();
        tracker.record_access("decisions/foo.md", "project").unwrap();
        tracker.record_access("decisions/foo.md", "project").unwrap();
        assert!(tracker
            .last_access("decisions/foo.md", "project")
            .unwrap()
            .is_some());
        assert_eq!(tracker.access_count("decisions/foo.md", "project").unwrap(), 2);
    }

    #[test]
    fn same_path_in_different_roots_is_tracked_independently() {
        let dir = tempdir().unwrap();
        let tracker = AccessTracker::open(&dir.path().join("memories.sqlite3")).unwrap();
        tracker.record_access("decisions/foo.md", "project").unwrap();
        assert_eq!(tracker.access_count("decisions/foo.md", "project").unwrap(), 1);
        assert_eq!(tracker.access_count("decisions/foo.md", "global").unwrap(), 0);
    }

    #[test]
    fn within_grace_period_confidence_is_unchanged() {
        let now = Utc::now();
        let created = now - chrono::Duration::days(1);
        let result = effective_confidence(0.9, created, None, now, 30, 0.1, 3);
        assert_eq!(result, 0.9);
    }

    #[test]
    fn decay_reduces_confidence_linearly_after_grace() {
        let now = Utc::now();
        let created = now - chrono::Duration::days(15);
        let result = effective_confidence(1.0, created, None, now, 30, 0.1, 3);
        assert!((result - 0.5).abs() < 0.01);
    }

    #[test]
    fn decay_never_drops_below_floor() {
        let now = Utc::now();
        let created = now - chrono::Duration::days(300);
        let result = effective_confidence(1.0, created, None, now, 30, 0.1, 3);
        assert!((result - 0.1).abs() < 1e-9);
    }

    #[test]
    fn last_access_overrides_created_at_as_reference() {
        let now = Utc::now();
        let created = now - chrono::Duration::days(300);
        let recent_access = now - chrono::Duration::days(1);
        let result = effective_confidence(1.0, created, Some(recent_access), now, 30, 0.1, 3);
        assert_eq!(result, 1.0);
    }
}
