//! Common test infrastructure
//!
//! This module provides everything the end-to-end tests need: an isolated catalog
//! on disk, a controllable clock, a running scheduler and scripted stand-ins for
//! every external collaborator. Tests should only import from this module, not from
//! internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, VIDEO_A};
//! use catalog_pipeline::pipeline::{RunOutcome, TaskNode};
//!
//! #[tokio::test]
//! async fn test_empty_pipeline() {
//!     let env = TestEnv::new();
//!     env.seed(VIDEO_A);
//!     let handle = env.spawn(TaskNode::group("all", vec![]));
//!     assert_eq!(handle.run().await.unwrap(), RunOutcome::FixedPoint);
//! }
//! ```

mod constants;
mod env;
mod fakes;

// Public API - this is what tests import
pub use constants::*;
pub use env::TestEnv;
#[allow(unused_imports)]
pub use env::parse;
#[allow(unused_imports)]
pub use fakes::{
    frames, record, FailingClassifier, FakeDownloader, FakeExtractor, FakeFetcher, FakeImages,
    FakePages, FakeProber,
};
