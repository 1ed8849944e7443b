//! Memory primitive schema and repository: the decision/learning/summary
//! markdown files that make up a data root's `memory/` tree, plus the
//! decay-aware archival pass built on [`lerim_catalog::AccessTracker`].

pub mod primitive;
pub mod repo;

pub use lerim_core::{LerimError, Result};
pub use primitive::{
    slugify, Frontmatter, LearningKind, MemoryPrimitive, PrimitiveType, SummaryFrontmatter,
    SummaryRecord,
};
pub use repo::{extract_memory_id, MemoryRepo, MemoryRepoEntry};
