// src/jobs/mod.rs
pub mod lease;
pub mod registry;

pub use lease::{AcquireOutcome, SourceLeases};
pub use registry::JobRegistry;
