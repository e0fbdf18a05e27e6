use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};

/// Scheduler lifecycle. `Stopped` is both the initial and the idle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerStatus {
    Running,
    PendingStop,
    Stopped,
}

/// Why a `run()` call returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    /// A full round made no mutation.
    FixedPoint,
    /// `stop()` was honoured at a task boundary.
    Stopped { idx: usize },
    Breakpoint { idx: usize },
    SingleStep { idx: usize },
    /// Too many consecutive dirty rounds.
    Oscillation { rounds: u32 },
    TaskFailed {
        idx: usize,
        task: String,
        error: String,
    },
    /// Another run was already in flight; nothing happened.
    AlreadyRunning,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::FixedPoint => write!(f, "fixed point reached"),
            RunOutcome::Stopped { idx } => write!(f, "stopped before task {}", idx),
            RunOutcome::Breakpoint { idx } => write!(f, "breakpoint before task {}", idx),
            RunOutcome::SingleStep { idx } => write!(f, "stepped, next task {}", idx),
            RunOutcome::Oscillation { rounds } => {
                write!(f, "no fixed point after {} rounds", rounds)
            }
            RunOutcome::TaskFailed { idx, task, error } => {
                write!(f, "task {} ({}) failed: {}", idx, task, error)
            }
            RunOutcome::AlreadyRunning => write!(f, "already running"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    SchedulerGone,
    #[error("no task at index {idx} (have {len})")]
    InvalidIndex { idx: usize, len: usize },
}

/// Command sent to the scheduler actor.
pub enum SchedulerCommand {
    Run {
        response: oneshot::Sender<RunOutcome>,
    },
}

/// State shared between the scheduler actor and its handles.
#[derive(Debug)]
pub struct SharedPipelineState {
    /// Flattened task names, fixed at creation.
    pub task_names: Vec<String>,
    pub status: SchedulerStatus,
    /// Set while a run is being driven. Checked before `status` so a second
    /// `run()` can never start a parallel loop.
    pub in_flight: bool,
    /// Next task to execute.
    pub idx: usize,
    /// Tasks that mutated during the current round.
    pub dirty: BTreeSet<usize>,
    /// Consecutive dirty rounds.
    pub trip_count: u32,
    pub breakpoints: BTreeSet<usize>,
    pub single_step: bool,
    /// Task currently executing, if any.
    pub current: Option<usize>,
    pub last_error: Option<String>,
}

impl SharedPipelineState {
    pub fn new(task_names: Vec<String>) -> Self {
        Self {
            task_names,
            status: SchedulerStatus::Stopped,
            in_flight: false,
            idx: 0,
            dirty: BTreeSet::new(),
            trip_count: 0,
            breakpoints: BTreeSet::new(),
            single_step: false,
            current: None,
            last_error: None,
        }
    }
}

/// Point-in-time view of the scheduler, for the console and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineSnapshot {
    pub status: SchedulerStatus,
    pub idx: usize,
    pub dirty: Vec<usize>,
    pub trip_count: u32,
    pub breakpoints: Vec<usize>,
    pub single_step: bool,
    pub current: Option<usize>,
    pub current_task: Option<String>,
    pub last_error: Option<String>,
    pub tasks: Vec<String>,
}

/// Handle to control the pipeline scheduler.
#[derive(Clone)]
pub struct PipelineHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedPipelineState>>,
}

impl PipelineHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedPipelineState>>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
        }
    }

    /// Drives the pipeline from the retained index until it stops, and returns why.
    ///
    /// Returns [`RunOutcome::AlreadyRunning`] immediately if a run is in flight.
    pub async fn run(&self) -> Result<RunOutcome, SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(SchedulerCommand::Run {
                response: response_tx,
            })
            .await
            .map_err(|_| SchedulerError::SchedulerGone)?;
        response_rx.await.map_err(|_| SchedulerError::SchedulerGone)
    }

    /// Requests a stop at the next task boundary. No-op unless running.
    pub async fn stop(&self) {
        let mut state = self.shared_state.write().await;
        if state.status == SchedulerStatus::Running {
            state.status = SchedulerStatus::PendingStop;
        }
    }

    /// A breakpoint at `idx` halts the scheduler right before that task runs.
    pub async fn set_breakpoint(&self, idx: usize, on: bool) -> Result<(), SchedulerError> {
        let mut state = self.shared_state.write().await;
        let len = state.task_names.len();
        if idx >= len {
            return Err(SchedulerError::InvalidIndex { idx, len });
        }
        if on {
            state.breakpoints.insert(idx);
        } else {
            state.breakpoints.remove(&idx);
        }
        Ok(())
    }

    pub async fn set_single_step(&self, on: bool) {
        self.shared_state.write().await.single_step = on;
    }

    pub async fn snapshot(&self) -> PipelineSnapshot {
        let state = self.shared_state.read().await;
        PipelineSnapshot {
            status: state.status,
            idx: state.idx,
            dirty: state.dirty.iter().copied().collect(),
            trip_count: state.trip_count,
            breakpoints: state.breakpoints.iter().copied().collect(),
            single_step: state.single_step,
            current: state.current,
            current_task: state
                .current
                .and_then(|i| state.task_names.get(i).cloned()),
            last_error: state.last_error.clone(),
            tasks: state.task_names.clone(),
        }
    }

    pub async fn tasks(&self) -> Vec<String> {
        self.shared_state.read().await.task_names.clone()
    }
}
