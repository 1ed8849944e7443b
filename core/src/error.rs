//! Central error taxonomy for the sync/maintain orchestration engine.
//!
//! Every subsystem returns [`LerimError`] so that the two process boundaries
//! (CLI exit codes, HTTP status codes) can map a single type instead of each
//! re-deriving its own conversion.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum LerimError {
    #[error("path '{path}' escapes allowed roots {allowed:?}")]
    Boundary {
        path: PathBuf,
        allowed: Vec<PathBuf>,
    },

    #[error("artifact missing: {0}")]
    ArtifactMissing(String),

    #[error("artifact invalid: {0}")]
    ArtifactInvalid(String),

    #[error("writer lock busy, held by pid {pid} ({owner})")]
    LockBusy { pid: u32, owner: String },

    #[error("adapter '{adapter}' failed: {reason}")]
    Adapter { adapter: String, reason: String },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("job '{run_id}' not found")]
    JobNotFound { run_id: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

impl LerimError {
    /// Maps a failure onto the CLI exit-code contract (0 ok, 1 fatal, 2
    /// usage, 3 partial, 4 lock busy). Partial (3) is never produced here —
    /// it is a pipeline-level outcome, not a single error — callers that
    /// finish a cycle with mixed success/failure construct the exit code
    /// directly rather than through this mapping.
    pub fn exit_code(&self) -> i32 {
        match self {
            LerimError::LockBusy { .. } => 4,
            LerimError::Config(_) => 2,
            _ => 1,
        }
    }

    /// Maps a failure onto an HTTP status code for the read-only/write API.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            LerimError::Boundary { .. } => StatusCode::FORBIDDEN,
            LerimError::ArtifactMissing(_) | LerimError::ArtifactInvalid(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LerimError::LockBusy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            LerimError::Adapter { .. } => StatusCode::BAD_GATEWAY,
            LerimError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LerimError::Config(_) => StatusCode::BAD_REQUEST,
            LerimError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            LerimError::Io(_) | LerimError::Sqlite(_) | LerimError::Json(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LerimError::TomlDecode(_) => StatusCode::BAD_REQUEST,
            LerimError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
