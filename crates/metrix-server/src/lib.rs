//! Collector server for metrix agents.
//!
//! Accepts single and batched metric updates over HTTP, applies them to a
//! [`metrix_storage::StorageEngine`] and serves the stored values back as
//! JSON, plain text or an HTML table.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod state;
