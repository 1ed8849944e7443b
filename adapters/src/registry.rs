//! Connected-platform registry, persisted as `platforms.json`. Ported
//! from `adapters/registry.py`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use lerim_core::Result;

use crate::{adapter_for, KNOWN_PLATFORMS};

/// One connected platform's recorded path and connection timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEntry {
    pub path: String,
    pub connected_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryData {
    #[serde(default)]
    platforms: HashMap<String, PlatformEntry>,
}

/// Outcome of a `connect` attempt, mirroring the CLI/API response shape.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectResult {
    pub name: String,
    pub path: Option<String>,
    pub session_count: i64,
    pub connected_at: Option<String>,
    pub status: String,
}

/// Summary row for `list_platforms`.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub name: String,
    pub path: String,
    pub connected_at: String,
    pub session_count: i64,
    pub exists: bool,
}

/// Reads and writes the `platforms.json` connection registry.
#[derive(Clone)]
pub struct PlatformRegistry {
    path: PathBuf,
}

impl PlatformRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> RegistryData {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return RegistryData::default();
        };
        serde_json::from_str(&text).unwrap_or_default()
    }

    fn save(&self, data: &RegistryData) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(data)?;
        std::fs::write(&self.path, format!("{json}\n"))?;
        Ok(())
    }

    /// Seeds the registry with any known platform whose default path
    /// exists on this host, but only if the registry file doesn't exist
    /// yet — an already-connected (or explicitly emptied) registry is
    /// never overwritten.
    pub fn auto_seed(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        let mut data = RegistryData::default();
        for name in KNOWN_PLATFORMS {
            let Ok(adapter) = adapter_for(name) else { continue };
            let Some(default) = adapter.default_path() else { continue };
            if default.exists() {
                data.platforms.insert(
                    name.to_string(),
                    PlatformEntry {
                        path: default.to_string_lossy().into_owned(),
                        connected_at: Utc::now().to_rfc3339(),
                    },
                );
            }
        }
        if !data.platforms.is_empty() {
            self.save(&data)?;
        }
        Ok(())
    }

    /// Connects a platform, using its default path unless `custom_path`
    /// is given. Records the connection only on success.
    pub fn connect(&self, name: &str, custom_path: Option<&str>) -> Result<ConnectResult> {
        let mut data = self.load();

        let resolved: Option<PathBuf> = if let Some(custom) = custom_path {
            Some(expand_and_canonicalize(custom))
        } else {
            adapter_for(name).ok().and_then(|a| a.default_path())
        };

        let Some(resolved) = resolved else {
            return Ok(ConnectResult {
                name: name.to_string(),
                path: None,
                session_count: 0,
                connected_at: None,
                status: "unknown_platform".to_string(),
            });
        };

        if !resolved.exists() {
            return Ok(ConnectResult {
                name: name.to_string(),
                path: Some(resolved.to_string_lossy().into_owned()),
                session_count: 0,
                connected_at: None,
                status: "path_not_found".to_string(),
            });
        }

        let session_count = adapter_for(name).map(|a| a.count_sessions(&resolved) as i64).unwrap_or(0);
        let connected_at = Utc::now().to_rfc3339();
        data.platforms.insert(
            name.to_string(),
            PlatformEntry {
                path: resolved.to_string_lossy().into_owned(),
                connected_at: connected_at.clone(),
            },
        );
        self.save(&data)?;

        Ok(ConnectResult {
            name: name.to_string(),
            path: Some(resolved.to_string_lossy().into_owned()),
            session_count,
            connected_at: Some(connected_at),
            status: "connected".to_string(),
        })
    }

    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut data = self.load();
        let removed = data.platforms.remove(name).is_some();
        if removed {
            self.save(&data)?;
        }
        Ok(removed)
    }

    /// Lists connected platforms, optionally re-counting sessions live
    /// (costs a filesystem/DB scan per platform).
    pub fn list(&self, with_counts: bool) -> Vec<PlatformStatus> {
        let data = self.load();
        let mut out: Vec<PlatformStatus> = data
            .platforms
            .into_iter()
            .map(|(name, entry)| {
                let platform_path = PathBuf::from(&entry.path);
                let session_count = if with_counts {
                    adapter_for(&name).map(|a| a.count_sessions(&platform_path) as i64).unwrap_or(0)
                } else {
                    0
                };
                PlatformStatus {
                    exists: platform_path.exists(),
                    name,
                    path: entry.path,
                    connected_at: entry.connected_at,
                    session_count,
                }
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn connected_agents(&self) -> Result<Vec<String>> {
        self.auto_seed()?;
        let mut names: Vec<String> = self.load().platforms.into_keys().collect();
        names.sort();
        Ok(names)
    }

    pub fn connected_platform_paths(&self) -> Result<HashMap<String, PathBuf>> {
        self.auto_seed()?;
        let mut out = HashMap::new();
        for (name, entry) in self.load().platforms {
            let path = PathBuf::from(&entry.path);
            if path.exists() {
                out.insert(name, path);
            }
        }
        Ok(out)
    }
}

fn expand_and_canonicalize(raw: &str) -> PathBuf {
    let expanded = if let Some(rest) = raw.strip_prefix("~/") {
        dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| PathBuf::from(raw))
    } else {
        PathBuf::from(raw)
    };
    expanded.canonicalize().unwrap_or(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn auto_seed_is_noop_when_registry_already_exists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("platforms.json");
        std::fs::write(&path, "{\"platforms\":{}}").unwrap();
        let registry = PlatformRegistry::new(path.clone());
        registry.auto_seed().unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "{\"platforms\":{}}");
    }

    #[test]
    fn connect_unknown_platform_reports_status() {
        let dir = tempdir().unwrap();
        let registry = PlatformRegistry::new(dir.path().join("platforms.json"));
        let result = registry.connect("nonexistent", None).unwrap();
        assert_eq!(result.status, "unknown_platform");
    }

    #[test]
    fn connect_missing_path_reports_status() {
        let dir = tempdir().unwrap();
        let registry = PlatformRegistry::new(dir.path().join("platforms.json"));
        let missing = dir.path().join("does-not-exist");
        let result = registry.connect("claude", Some(missing.to_str().unwrap())).unwrap();
        assert_eq!(result.status, "path_not_found");
    }

    #[test]
    fn connect_then_remove_round_trips() {
        let dir = tempdir().unwrap();
        let registry_path = dir.path().join("platforms.json");
        let registry = PlatformRegistry::new(registry_path);
        let custom = dir.path().join("claude-traces");
        std::fs::create_dir_all(&custom).unwrap();

        let result = registry.connect("claude", Some(custom.to_str().unwrap())).unwrap();
        assert_eq!(result.status, "connected");
        assert_eq!(registry.list(false).len(), 1);

        assert!(registry.remove("claude").unwrap());
        assert!(registry.list(false).is_empty());
        assert!(!registry.remove("claude").unwrap());
    }
}
