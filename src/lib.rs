// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod annotate;
pub mod api;
pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod market;
pub mod metrics;
pub mod notify;
pub mod pipeline;
pub mod store;
pub mod summary;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::PipelineConfig;
pub use crate::market::Market;
pub use crate::notify::NotifierMux;
pub use crate::pipeline::{Pipeline, RunHandle, RunReport, RunState};
