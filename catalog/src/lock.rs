//! Advisory writer lock: a single process may hold the memory-write lock
//! at a time, enforced by an `O_CREAT|O_EXCL` lock file carrying owner and
//! heartbeat metadata, so a crashed holder's lock can be safely reclaimed.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{LerimError, Result};

/// A lock is considered abandoned if its heartbeat is older than this and
/// its owning pid is no longer alive.
const STALE_HEARTBEAT_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockState {
    pid: u32,
    owner: String,
    command: String,
    started_at: DateTime<Utc>,
    heartbeat_at: DateTime<Utc>,
    host: String,
}

pub struct WriterLock {
    path: PathBuf,
    pid: u32,
}

impl WriterLock {
    /// Attempts to acquire the lock at `path`. Reclaims a stale lock (dead
    /// pid and expired heartbeat) once before giving up with
    /// `LerimError::LockBusy`.
    pub fn acquire(path: &Path, owner: &str, command: &str) -> Result<Self> {
        match Self::try_create(path, owner, command) {
            Ok(lock) => return Ok(lock),
            Err(LerimError::LockBusy { .. }) => {}
            Err(other) => return Err(other),
        }

        if Self::reclaim_if_stale(path)? {
            return Self::try_create(path, owner, command);
        }

        let state = read_state(path)?;
        Err(LerimError::LockBusy {
            pid: state.pid,
            owner: state.owner,
        })
    }

    fn try_create(path: &Path, owner: &str, command: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pid = std::process::id();
        let now = Utc::now();
        let state = LockState {
            pid,
            owner: owner.to_string(),
            command: command.to_string(),
            started_at: now,
            heartbeat_at: now,
            host: hostname(),
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let existing = read_state(path)?;
                return Err(LerimError::LockBusy {
                    pid: existing.pid,
                    owner: existing.owner,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let body = serde_json::to_vec_pretty(&state)?;
        file.write_all(&body)?;

        Ok(WriterLock {
            path: path.to_path_buf(),
            pid,
        })
    }

    fn reclaim_if_stale(path: &Path) -> Result<bool> {
        let state = match read_state(path) {
            Ok(state) => state,
            Err(_) => return Ok(true),
        };

        let age = Utc::now() - state.heartbeat_at;
        let stale = age.num_seconds() > STALE_HEARTBEAT_SECONDS && !pid_is_alive(state.pid);
        if stale {
            std::fs::remove_file(path)?;
        }
        Ok(stale)
    }

    /// Refreshes this lock's heartbeat timestamp in place.
    pub fn heartbeat(&self) -> Result<()> {
        let mut state = read_state(&self.path)?;
        if state.pid != self.pid {
            return Err(LerimError::LockBusy {
                pid: state.pid,
                owner: state.owner,
            });
        }
        state.heartbeat_at = Utc::now();
        let body = serde_json::to_vec_pretty(&state)?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Releases the lock. A no-op if some other process now owns it (this
    /// guards against releasing a lock that was reclaimed out from under
    /// us after a missed heartbeat).
    pub fn release(self) -> Result<()> {
        if let Ok(state) = read_state(&self.path) {
            if state.pid == self.pid {
                std::fs::remove_file(&self.path)?;
            }
        }
        Ok(())
    }
}

fn read_state(path: &Path) -> Result<LockState> {
    let mut text = String::new();
    OpenOptions::new()
        .read(true)
        .open(path)?
        .read_to_string(&mut text)?;
    serde_json::from_str(&text).map_err(Into::into)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.lock");
        let lock = WriterLock::acquire(&path, "daemon", "lerim sync").unwrap();
        lock.release().unwrap();
        assert!(WriterLock::acquire(&path, "daemon", "lerim sync").is_ok());
    }

    #[test]
    fn second_acquire_while_held_is_busy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.lock");
        let _lock = WriterLock::acquire(&path, "daemon", "lerim sync").unwrap();

        let second = WriterLock::acquire(&path, "other", "lerim maintain");
        assert!(matches!(second, Err(LerimError::LockBusy { .. })));
    }

    #[test]
    fn heartbeat_updates_timestamp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.lock");
        let lock = WriterLock::acquire(&path, "daemon", "lerim sync").unwrap();
        let before = read_state(&path).unwrap().heartbeat_at;
        std::thread::sleep(std::time::Duration::from_millis(10));
        lock.heartbeat().unwrap();
        let after = read_state(&path).unwrap().heartbeat_at;
        assert!(after >= before);
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reclaimed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("writer.lock");
        let stale = LockState {
            pid: 999_999,
            owner: "ghost".to_string(),
            command: "old".to_string(),
            started_at: Utc::now() - chrono::Duration::minutes(10),
            heartbeat_at: Utc::now() - chrono::Duration::minutes(10),
            host: "test".to_string(),
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&stale).unwrap()).unwrap();

        let lock = WriterLock::acquire(&path, "daemon", "lerim sync");
        assert!(lock.is_ok());
    }
}
