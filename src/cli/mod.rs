//! CLI surface (§6): argument parsing routes straight through to the
//! catalog/pipelines/memory crates — this module owns grammar and exit
//! codes only, never business logic.

pub mod dispatch;

use clap::{Parser, Subcommand};

pub use dispatch::run;

/// Exit codes per §6: 0 ok, 1 fatal, 2 usage, 3 partial, 4 lock busy.
pub const EXIT_OK: i32 = 0;
pub const EXIT_FATAL: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_PARTIAL: i32 = 3;
pub const EXIT_LOCK_BUSY: i32 = 4;

#[derive(Debug, Parser)]
#[command(name = "lerim", author, version, about = "Continual-learning memory layer for coding-agent sessions", long_about = None)]
pub struct Cli {
    /// Emit structured JSON on stdout instead of a human-readable summary.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive-in-spirit first-run wizard; writes the user config.
    Init,

    /// Manage connected coding-agent platforms.
    Connect {
        #[command(subcommand)]
        action: Option<ConnectAction>,
    },

    /// Manage tracked project directories.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Discover, index, and extract memory from new/changed sessions.
    Sync {
        #[arg(long)]
        run_id: Option<String>,
        #[arg(long, value_delimiter = ',')]
        agent: Vec<String>,
        #[arg(long)]
        window: Option<String>,
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        max_sessions: Option<usize>,
        #[arg(long)]
        no_extract: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        ignore_lock: bool,
    },

    /// Merge, archive, and consolidate the memory tree offline.
    Maintain {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the cooperative sync/maintain scheduler.
    Daemon {
        /// Run one sync + one maintain cycle and exit, instead of looping.
        #[arg(long)]
        once: bool,
        /// Advisory poll granularity; this scheduler wakes precisely at the
        /// next due cycle rather than polling, so this only widens the
        /// minimum sleep between checks.
        #[arg(long)]
        poll_seconds: Option<u64>,
    },

    /// Inspect and edit memory primitives directly.
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },

    /// Ask a question over indexed sessions and memory (forwards to HTTP).
    Chat {
        question: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a snapshot of catalog/queue/memory/platform state.
    Status,

    /// Run the combined HTTP API + dashboard + daemon server in the foreground.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Start the combined server as a detached background process.
    Up {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },

    /// Stop a background server started with `up`.
    Down,

    /// Tail the background server's log file.
    Logs {
        #[arg(short = 'f', long)]
        follow: bool,
    },

    /// Print the dashboard URL for the currently configured server.
    Dashboard,
}

#[derive(Debug, Subcommand)]
pub enum ConnectAction {
    /// List connected platforms and their live session counts.
    List,
    /// Auto-seed every known platform whose default path exists on this host.
    Auto,
    /// Disconnect a previously connected platform.
    Remove { name: String },
    /// Connect one platform, optionally at a custom path: `connect <name> [--path P]`.
    #[command(external_subcommand)]
    Platform(Vec<String>),
}

#[derive(Debug, Subcommand)]
pub enum ProjectAction {
    Add { path: String },
    List,
    Remove { name: String },
}

#[derive(Debug, Subcommand)]
pub enum MemoryAction {
    Search {
        query: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        body: String,
        #[arg(long, default_value = "learning")]
        primitive: String,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long, default_value_t = 0.7)]
        confidence: f64,
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,
    },
    Export {
        #[arg(long, default_value = "json")]
        format: String,
        #[arg(long)]
        output: Option<String>,
    },
    Reset {
        #[arg(long)]
        scope: String,
        #[arg(long)]
        yes: bool,
    },
}
