//! Shared SQLite connection setup: WAL journaling, busy timeout, foreign
//! keys on. Every catalog-backed table lives behind one of these handles.

use std::path::Path;

use rusqlite::Connection;

use crate::Result;

pub fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(std::time::Duration::from_secs(30))?;
    Ok(conn)
}
