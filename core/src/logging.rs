//! `tracing`/`tracing-subscriber` initialization, driven by environment
//! variables so the daemon, CLI, and API share identical log behavior.
//!
//! - `LERIM_LOG_LEVEL` — filter directive (default `info`), parsed by
//!   `tracing_subscriber::EnvFilter`.
//! - `LERIM_LOG_COLOR` — `0`/`false` disables ANSI colour (default on).
//! - `LERIM_TRACING` — truthy enables verbose span logging for the sync and
//!   maintain pipelines; independent of `LERIM_LOG_LEVEL`.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber. Safe to call more than once
/// per process in tests; subsequent calls are no-ops.
pub fn init_logging() {
    let filter = std::env::var("LERIM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let ansi = !matches!(
        std::env::var("LERIM_LOG_COLOR").as_deref(),
        Ok("0") | Ok("false") | Ok("no")
    );

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_ansi(ansi)
        .with_target(false)
        .try_init();
}

/// Whether verbose pipeline tracing (prompts, tool calls, LLM payloads) is
/// enabled, combining a config flag with the `LERIM_TRACING` env override.
pub fn tracing_enabled(config_flag: bool) -> bool {
    let env_truthy = matches!(
        std::env::var("LERIM_TRACING").as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    );
    config_flag || env_truthy
}
