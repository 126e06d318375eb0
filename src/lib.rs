// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod adapters;
pub mod api;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod enrich;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::Config;
pub use crate::scheduler::Scheduler;
