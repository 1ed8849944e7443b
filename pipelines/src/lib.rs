//! The sync/maintain pipelines and the daemon scheduler that ties them
//! together on a timer (§4.4-§4.6).

pub mod daemon;
pub mod maintain;
pub mod sync;
pub mod wiring;

pub use daemon::{run_forever, run_once};
pub use maintain::{run_maintain, MaintainDeps, MaintainOptions, MaintainSummary};
pub use sync::{run_sync, SyncDeps, SyncOptions, SyncSummary};
pub use wiring::{build_pipeline_handles, memory_root_key, PipelineHandles};
