//! Shared adapter helpers: timestamp parsing, JSONL loading, window
//! filtering, and content hashing. Ported from `adapters/common.py`.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Parses timestamps in RFC 3339 string form. The original also accepts
/// raw epoch seconds/millis; `parse_timestamp_numeric` covers that case
/// since JSON numbers and strings need different entry points in Rust.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Parses an epoch timestamp, scaling millisecond-resolution values
/// (`abs(value) > 1e10`) down to seconds first, matching the original's
/// heuristic for distinguishing the two units.
pub fn parse_timestamp_numeric(value: f64) -> Option<DateTime<Utc>> {
    let seconds = if value.abs() > 1e10 { value / 1000.0 } else { value };
    Utc.timestamp_opt(seconds as i64, 0).single()
}

/// Reads a JSONL file, skipping blank lines and lines that don't parse as
/// a JSON object. Malformed lines are dropped rather than failing the read.
pub fn load_jsonl_dict_lines(path: &Path) -> Vec<serde_json::Map<String, Value>> {
    let Ok(file) = File::open(path) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else { continue };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(trimmed) {
            out.push(map);
        }
    }
    out
}

/// Counts non-empty files under `root` matching a glob-style suffix (e.g.
/// `.jsonl`), recursing into subdirectories.
pub fn count_non_empty_files(root: &Path, extension: &str) -> usize {
    fn walk(dir: &Path, extension: &str, count: &mut usize) {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, extension, count);
            } else if path.extension().map(|e| format!(".{}", e.to_string_lossy())) == Some(extension.to_string())
            {
                if let Ok(meta) = path.metadata() {
                    if meta.len() > 0 {
                        *count += 1;
                    }
                }
            }
        }
    }
    if !root.exists() {
        return 0;
    }
    let mut count = 0;
    walk(root, extension, &mut count);
    count
}

/// Whether `value` falls inside the inclusive `[start, end]` window. A
/// missing `value` is only in-window when the window itself is unbounded.
pub fn in_window(
    value: Option<DateTime<Utc>>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> bool {
    match value {
        None => start.is_none() && end.is_none(),
        Some(v) => {
            if let Some(start) = start {
                if v < start {
                    return false;
                }
            }
            if let Some(end) = end {
                if v > end {
                    return false;
                }
            }
            true
        }
    }
}

/// SHA-256 hex digest of a file's raw bytes, read in 8KiB chunks.
pub fn compute_file_hash(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("not-a-date").is_none());
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("2026-02-19T10:00:00+00:00").is_some());
    }

    #[test]
    fn parse_timestamp_numeric_scales_millis() {
        let secs = parse_timestamp_numeric(1_706_000_000.0).unwrap();
        let millis = parse_timestamp_numeric(1_706_000_000_000.0).unwrap();
        assert_eq!(secs, millis);
    }

    #[test]
    fn load_jsonl_skips_malformed_and_non_object_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.jsonl");
        let mut file = File::create(&path).unwrap();
        writeln!(file, r#"{{"a":1}}"#).unwrap();
        writeln!(file, r#"{{"b":2}}"#).unwrap();
        writeln!(file, "not-json").unwrap();
        writeln!(file, "[1,2,3]").unwrap();
        let rows = load_jsonl_dict_lines(&path);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn compute_file_hash_is_deterministic_and_changes_with_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.jsonl");
        std::fs::write(&path, r#"{"a":1}"#).unwrap();
        let h1 = compute_file_hash(&path).unwrap();
        assert_eq!(h1.len(), 64);
        let h2 = compute_file_hash(&path).unwrap();
        assert_eq!(h1, h2);
        std::fs::write(&path, r#"{"c":3}"#).unwrap();
        let h3 = compute_file_hash(&path).unwrap();
        assert_ne!(h1, h3);
    }

    #[test]
    fn in_window_respects_inclusive_bounds() {
        let now = Utc::now();
        assert!(in_window(Some(now), Some(now), Some(now)));
        assert!(!in_window(Some(now), Some(now + chrono::Duration::seconds(1)), None));
        assert!(in_window(None, None, None));
        assert!(!in_window(None, Some(now), None));
    }

    #[test]
    fn count_non_empty_files_skips_empty_and_wrong_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jsonl"), "x").unwrap();
        std::fs::write(dir.path().join("empty.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("b.txt"), "x").unwrap();
        assert_eq!(count_non_empty_files(dir.path(), ".jsonl"), 1);
    }
}
