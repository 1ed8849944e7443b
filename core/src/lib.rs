//! Shared foundations for the Lerim memory layer: error taxonomy, layered
//! configuration, canonical path layout, project-scope resolution, the
//! window-duration grammar, logging/tracing setup, and the `Runtime`
//! dependency-injection struct that every other crate in the workspace is
//! built against.

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod project_scope;
pub mod runtime;
pub mod window;

pub use config::Config;
pub use error::LerimError;
pub use runtime::Runtime;

pub type Result<T> = std::result::Result<T, LerimError>;
