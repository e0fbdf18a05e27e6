//! Convergence-loop task scheduler.
//!
//! Tasks are authored as a [`TaskNode`] tree, flattened once, and then executed in
//! order, round after round, until a full round reports no mutation. The operator can
//! stop the loop, set breakpoints on task indices or single-step through it.

mod build;
mod context;
mod handle;
mod scheduler;
mod task;

pub use build::{default_pipeline, Collaborators};
pub use context::{TaskContext, DEFAULT_CONCURRENCY};
pub use handle::{
    PipelineHandle, PipelineSnapshot, RunOutcome, SchedulerError, SchedulerStatus,
};
pub use scheduler::{create_pipeline, PipelineScheduler, MAX_DIRTY_ROUNDS};
pub use task::{PipelineTask, TaskError, TaskNode};
