use super::context::TaskContext;
use super::handle::{
    PipelineHandle, RunOutcome, SchedulerCommand, SchedulerStatus, SharedPipelineState,
};
use super::task::{PipelineTask, TaskNode};
use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Consecutive dirty rounds after which the scheduler gives up on reaching a fixed point.
pub const MAX_DIRTY_ROUNDS: u32 = 10;

/// Drives the flattened task list to a fixed point, one task at a time.
pub struct PipelineScheduler {
    tasks: Vec<Arc<dyn PipelineTask>>,

    /// Shared state accessible by PipelineHandle
    shared_state: Arc<RwLock<SharedPipelineState>>,

    /// Receiver for commands from PipelineHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    ctx: TaskContext,
}

impl PipelineScheduler {
    pub fn new(
        tasks: Vec<Arc<dyn PipelineTask>>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        ctx: TaskContext,
        shared_state: Arc<RwLock<SharedPipelineState>>,
    ) -> Self {
        Self {
            tasks,
            shared_state,
            command_receiver,
            shutdown_token,
            ctx,
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Main scheduler loop. Returns when the shutdown token fires or every handle
    /// has been dropped.
    pub async fn run(&mut self) {
        info!("Starting pipeline scheduler with {} tasks", self.tasks.len());

        loop {
            tokio::select! {
                cmd = self.command_receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        debug!("All pipeline handles dropped");
                        break;
                    }
                },
                _ = self.shutdown_token.cancelled() => {
                    info!("Pipeline scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Pipeline scheduler stopped");
    }

    async fn handle_command(&mut self, cmd: SchedulerCommand) {
        match cmd {
            SchedulerCommand::Run { response } => {
                let outcome = self.drive().await;
                let _ = response.send(outcome);
            }
        }
    }

    /// Executes tasks from the retained index until something stops the run.
    async fn drive(&mut self) -> RunOutcome {
        {
            let mut state = self.shared_state.write().await;
            if state.in_flight || state.status != SchedulerStatus::Stopped {
                return RunOutcome::AlreadyRunning;
            }
            state.in_flight = true;
            state.status = SchedulerStatus::Running;
            state.last_error = None;
            info!("Pipeline running from task {}", state.idx);
        }

        let outcome = if self.tasks.is_empty() {
            RunOutcome::FixedPoint
        } else {
            self.drive_tasks().await
        };

        let mut state = self.shared_state.write().await;
        state.in_flight = false;
        state.status = SchedulerStatus::Stopped;
        state.current = None;
        info!("Pipeline halted: {}", outcome);
        outcome
    }

    async fn drive_tasks(&mut self) -> RunOutcome {
        let len = self.tasks.len();
        loop {
            let idx = {
                let mut state = self.shared_state.write().await;
                if state.idx >= len {
                    state.idx = 0;
                }
                state.current = Some(state.idx);
                state.idx
            };

            let task = Arc::clone(&self.tasks[idx]);
            debug!("Running task {} ({})", idx, task.name());
            let started = Instant::now();

            let result = {
                let fut = task.run(&self.ctx);
                tokio::pin!(fut);
                loop {
                    tokio::select! {
                        biased;
                        result = &mut fut => break result,
                        Some(SchedulerCommand::Run { response }) = self.command_receiver.recv() => {
                            let _ = response.send(RunOutcome::AlreadyRunning);
                        }
                    }
                }
            };
            let elapsed = started.elapsed();

            let mut state = self.shared_state.write().await;
            state.current = None;

            match result {
                Err(e) => {
                    error!("Task {} ({}) failed after {:?}: {}", idx, task.name(), elapsed, e);
                    metrics::record_task_run(task.name(), "failed", elapsed);
                    state.last_error = Some(format!("{}: {}", task.name(), e));
                    return RunOutcome::TaskFailed {
                        idx,
                        task: task.name().to_string(),
                        error: e.to_string(),
                    };
                }
                Ok(true) => {
                    debug!("Task {} ({}) mutated in {:?}", idx, task.name(), elapsed);
                    metrics::record_task_run(task.name(), "mutated", elapsed);
                    state.dirty.insert(idx);
                }
                Ok(false) => {
                    metrics::record_task_run(task.name(), "clean", elapsed);
                }
            }

            state.idx = idx + 1;
            if state.idx == len {
                metrics::record_round();
                state.idx = 0;
                if state.dirty.is_empty() {
                    state.trip_count = 0;
                    return RunOutcome::FixedPoint;
                }
                state.dirty.clear();
                state.trip_count += 1;
                debug!("Round dirty, trip count {}", state.trip_count);
                if state.trip_count >= MAX_DIRTY_ROUNDS {
                    let rounds = state.trip_count;
                    state.trip_count = 0;
                    warn!("No fixed point after {} dirty rounds, stopping", rounds);
                    state.last_error = Some(format!("oscillation: {} dirty rounds", rounds));
                    return RunOutcome::Oscillation { rounds };
                }
            }

            let next = state.idx;
            if state.status == SchedulerStatus::PendingStop || self.shutdown_token.is_cancelled() {
                return RunOutcome::Stopped { idx: next };
            }
            if state.breakpoints.contains(&next) {
                return RunOutcome::Breakpoint { idx: next };
            }
            if state.single_step {
                return RunOutcome::SingleStep { idx: next };
            }
        }
    }
}

/// Creates the scheduler actor and a handle to control it.
pub fn create_pipeline(
    tasks: TaskNode,
    shutdown_token: CancellationToken,
    ctx: TaskContext,
) -> (PipelineScheduler, PipelineHandle) {
    let tasks = tasks.flatten();
    let (command_tx, command_rx) = mpsc::channel(16);
    let shared_state = Arc::new(RwLock::new(SharedPipelineState::new(
        tasks.iter().map(|t| t.name().to_string()).collect(),
    )));

    let scheduler = PipelineScheduler::new(
        tasks,
        command_rx,
        shutdown_token,
        ctx,
        Arc::clone(&shared_state),
    );
    let handle = PipelineHandle::new(command_tx, shared_state);

    (scheduler, handle)
}
