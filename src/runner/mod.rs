//! Bounded fan-out of async work inside a single task.

mod pacer;
mod progress;

pub use pacer::Pacer;
pub use progress::{BarProgress, LogProgress, Progress, ProgressSink};

#[cfg(test)]
pub(crate) use progress::tests::RecordingSink;

use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// How a batch of items settled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs `f` over `items` with at most `limit` futures in flight.
///
/// The next item is admitted as soon as a slot frees. Progress is reported as the
/// share of items dispatched so far. A failing item is logged and counted, and never
/// cancels its siblings. Returns once every item has settled.
pub async fn run_bounded<T, F, Fut, E>(
    items: Vec<T>,
    limit: usize,
    progress: Option<&Progress>,
    f: F,
) -> RunReport
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let total = items.len();
    if total == 0 {
        return RunReport::default();
    }

    let mut dispatched = 0usize;
    let results: Vec<Result<(), E>> = stream::iter(items)
        .map(|item| {
            dispatched += 1;
            if let Some(progress) = progress {
                progress.set(dispatched as f64 * 100.0 / total as f64);
            }
            f(item)
        })
        .buffer_unordered(limit.max(1))
        .collect()
        .await;

    let mut report = RunReport::default();
    for result in results {
        match result {
            Ok(()) => report.succeeded += 1,
            Err(e) => {
                let label = progress.map(|p| p.label()).unwrap_or("runner");
                warn!("{}: item failed: {}", label, e);
                report.failed += 1;
            }
        }
    }
    if let Some(progress) = progress {
        progress.finish();
    }
    report
}
