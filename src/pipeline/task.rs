use super::context::TaskContext;
use crate::unify::UnifyError;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors a pipeline task can stop the scheduler with.
///
/// Per-row failures never surface here: they go to the backoff ledger and the task
/// carries on. A `TaskError` means the task as a whole could not make progress.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Unify(#[from] UnifyError),
    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
    #[error("{0}")]
    Failed(String),
}

/// A named, idempotent unit of work driven by the scheduler.
#[async_trait]
pub trait PipelineTask: Send + Sync {
    /// Stable name, also used as the backoff ledger key.
    fn name(&self) -> &str;

    /// Runs one pass. Returns true if anything observable changed.
    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError>;
}

/// Authoring tree for the task list. Groups only organise; they carry no
/// dependency semantics and vanish when flattened.
pub enum TaskNode {
    Task(Arc<dyn PipelineTask>),
    Group(String, Vec<TaskNode>),
}

impl TaskNode {
    pub fn task<T: PipelineTask + 'static>(task: T) -> Self {
        TaskNode::Task(Arc::new(task))
    }

    pub fn group(label: impl Into<String>, children: Vec<TaskNode>) -> Self {
        TaskNode::Group(label.into(), children)
    }

    /// Depth-first, in authoring order.
    pub fn flatten(self) -> Vec<Arc<dyn PipelineTask>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<Arc<dyn PipelineTask>>) {
        match self {
            TaskNode::Task(task) => out.push(task),
            TaskNode::Group(_, children) => {
                for child in children {
                    child.flatten_into(out);
                }
            }
        }
    }
}
