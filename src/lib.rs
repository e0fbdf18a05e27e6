//! Catalog Pipeline Library
//!
//! Aggregates music metadata from independent catalogs, unifies records that describe
//! the same artist, album or track, and matches downloaded recordings acoustically.
//! This library exposes the internal modules for the binary and for testing.

pub mod backoff;
pub mod config;
pub mod console;
pub mod fingerprint;
pub mod media;
pub mod metrics;
pub mod pipeline;
pub mod runner;
pub mod sources;
pub mod sqlite_persistence;
pub mod store;
pub mod unify;

// Re-export commonly used types for convenience
pub use backoff::{BackoffLedger, BackoffPolicy};
pub use pipeline::{create_pipeline, PipelineHandle, RunOutcome, TaskContext, TaskNode};
pub use store::{CatalogStore, EntityKind, Ident};
