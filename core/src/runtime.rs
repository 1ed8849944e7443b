//! The `Runtime` struct: an explicit dependency-injection root replacing
//! the original implementation's global `lru_cache`-backed config
//! singleton. Every crate that needs configuration or logging takes a
//! `&Runtime` (or an `Arc<Runtime>`) instead of reaching for process-global
//! state, so tests can construct as many independent runtimes as they like
//! within a single process.

use std::path::Path;
use std::sync::Arc;

use crate::config::{self, Config};
use crate::logging;
use crate::Result;

/// Holds the resolved configuration for one invocation. Constructed once
/// per CLI command, per daemon process, or per test case.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
}

impl Runtime {
    /// Resolves configuration from `repo_path` (normally the current
    /// working directory) and initializes logging. Call once at process
    /// start.
    pub fn bootstrap(repo_path: &Path) -> Result<Self> {
        logging::init_logging();
        let config = config::load_config(repo_path)?;
        Ok(Runtime {
            config: Arc::new(config),
        })
    }

    /// Builds a runtime directly from an already-resolved config, skipping
    /// logging initialization and disk layer reads. Used by tests that
    /// need full control over the configuration under test.
    pub fn from_config(config: Config) -> Self {
        Runtime {
            config: Arc::new(config),
        }
    }

    pub fn tracing_enabled(&self) -> bool {
        logging::tracing_enabled(self.config.tracing_enabled)
    }
}
