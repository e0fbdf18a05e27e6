use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub media_dir: Option<String>,
    pub fpcalc_path: Option<String>,
    pub ffprobe_path: Option<String>,
    pub yt_dlp_path: Option<String>,

    // Feature configs
    pub pipeline: Option<PipelineConfig>,
    pub matcher: Option<MatcherFileConfig>,
    pub backoff: Option<BackoffConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// In-flight limit for network fan-out inside a task.
    pub concurrency: Option<usize>,
    /// In-flight limit for fingerprint extraction.
    pub extract_concurrency: Option<usize>,
    /// Timeout of image and distributor page requests, in seconds.
    pub http_timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatcherFileConfig {
    pub candidate_threshold: Option<f64>,
    pub group_threshold: Option<f64>,
    pub duration_tolerance_s: Option<f64>,
    pub min_overlap_s: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackoffConfig {
    /// First interval of the exponential retry backoff.
    pub retry_base_hours: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
