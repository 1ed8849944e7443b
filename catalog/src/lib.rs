//! SQLite-backed persistence for the session catalog: the discovered-session
//! index with full-text search, the durable sync/maintain job queue, the
//! writer advisory lock, the service-run audit log, and the memory
//! access-decay tracker.

pub mod access;
pub mod audit;
pub mod connection;
pub mod lock;
pub mod queue;
pub mod sessions;

pub use lerim_core::{LerimError, Result};

pub use access::{effective_confidence, AccessTracker};
pub use audit::{AuditLog, ServiceRun};
pub use lock::WriterLock;
pub use queue::{EnqueueOptions, Job, JobQueue, JobStatus, JOB_TYPE_EXTRACT};
pub use sessions::{SessionCatalog, SessionRecord, SessionStats};
