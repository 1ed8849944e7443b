//! Coding-agent session adapters: one module per viewer format (Claude,
//! Codex, Cursor, OpenCode), a shared normalization layer, and the
//! connected-platform registry persisted to `platforms.json`.

pub mod claude;
pub mod codex;
pub mod common;
pub mod cursor;
pub mod opencode;
pub mod protocol;
pub mod registry;

pub use common::{compute_file_hash, count_non_empty_files, in_window, load_jsonl_dict_lines, parse_timestamp};
pub use protocol::{Adapter, DiscoveredSession, ViewerMessage, ViewerSession};
pub use registry::{PlatformEntry, PlatformRegistry};

use lerim_core::Result;

/// The fixed set of adapters Lerim ships with, in discovery/connect order.
pub const KNOWN_PLATFORMS: [&str; 4] = ["claude", "codex", "opencode", "cursor"];

/// Resolves an adapter implementation by platform name.
pub fn adapter_for(name: &str) -> Result<Box<dyn Adapter>> {
    match name {
        "claude" => Ok(Box::new(claude::ClaudeAdapter)),
        "codex" => Ok(Box::new(codex::CodexAdapter)),
        "opencode" => Ok(Box::new(opencode::OpenCodeAdapter)),
        "cursor" => Ok(Box::new(cursor::CursorAdapter)),
        other => Err(lerim_core::LerimError::Adapter {
            adapter: other.to_string(),
            reason: "unknown platform".to_string(),
        }),
    }
}
