use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tracing::debug;

/// Receives fractional progress of the task currently fanning out work.
pub trait ProgressSink: Send + Sync {
    /// `percent` is always within `0.0..=100.0`.
    fn update(&self, label: &str, percent: f64);

    fn finish(&self, _label: &str) {}
}

/// Progress reporter bound to one label.
#[derive(Clone)]
pub struct Progress {
    label: String,
    sink: Arc<dyn ProgressSink>,
}

impl Progress {
    pub fn new(label: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            label: label.into(),
            sink,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set(&self, percent: f64) {
        let percent = if percent.is_nan() {
            0.0
        } else {
            percent.clamp(0.0, 100.0)
        };
        self.sink.update(&self.label, percent);
    }

    pub fn finish(&self) {
        self.sink.finish(&self.label);
    }
}

/// Emits progress as debug events.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn update(&self, label: &str, percent: f64) {
        debug!("{}: {:.1}%", label, percent);
    }
}

/// Terminal progress bar for interactive runs.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.green} {msg:24} [{bar:40.cyan/blue}] {pos:>3}%")
        {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn update(&self, label: &str, percent: f64) {
        self.bar.set_message(label.to_string());
        self.bar.set_position(percent.round() as u64);
    }

    fn finish(&self, label: &str) {
        self.bar.set_message(format!("{} done", label));
        self.bar.set_position(100);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Sink that keeps every reported value.
    #[derive(Default)]
    pub struct RecordingSink {
        pub updates: Mutex<Vec<(String, f64)>>,
    }

    impl ProgressSink for RecordingSink {
        fn update(&self, label: &str, percent: f64) {
            self.updates.lock().unwrap().push((label.to_string(), percent));
        }
    }

    #[test]
    fn values_are_clamped() {
        let sink = Arc::new(RecordingSink::default());
        let progress = Progress::new("fetch", sink.clone());
        progress.set(-3.0);
        progress.set(42.0);
        progress.set(250.0);
        progress.set(f64::NAN);

        let values: Vec<f64> = sink.updates.lock().unwrap().iter().map(|(_, p)| *p).collect();
        assert_eq!(values, vec![0.0, 42.0, 100.0, 0.0]);
    }
}
