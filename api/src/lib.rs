//! HTTP API surface (§6): read-only stats/list/search endpoints plus
//! write endpoints that kick off sync/maintain cycles in the background,
//! so the dashboard and any IDE/editor integration share one server.

pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::*;
pub use models::*;
pub use server::*;
