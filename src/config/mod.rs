mod file_config;

pub use file_config::{BackoffConfig, FileConfig, MatcherFileConfig, PipelineConfig};

use crate::backoff::DAY;
use crate::fingerprint::{MatcherConfig, DEFAULT_EXTRACT_CONCURRENCY};
use crate::pipeline::DEFAULT_CONCURRENCY;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub fpcalc_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub yt_dlp_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    /// Media store root. Without it nothing is downloaded or fingerprinted.
    pub media_dir: Option<PathBuf>,
    pub fpcalc_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub yt_dlp_path: PathBuf,

    pub concurrency: usize,
    pub extract_concurrency: usize,
    pub http_timeout: Duration,
    pub retry_base: Duration,
    pub matcher: MatcherConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow::anyhow!("db path must be specified via --db or in config file"))?;
        if db_path.is_dir() {
            bail!("db path is a directory: {:?}", db_path);
        }

        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .or_else(|| cli.media_dir.clone());

        let tool = |file: Option<String>, cli: &Option<PathBuf>, default: &str| {
            file.map(PathBuf::from)
                .or_else(|| cli.clone())
                .unwrap_or_else(|| PathBuf::from(default))
        };
        let fpcalc_path = tool(file.fpcalc_path, &cli.fpcalc_path, "fpcalc");
        let ffprobe_path = tool(file.ffprobe_path, &cli.ffprobe_path, "ffprobe");
        let yt_dlp_path = tool(file.yt_dlp_path, &cli.yt_dlp_path, "yt-dlp");

        let pipeline = file.pipeline.unwrap_or_default();
        let concurrency = pipeline
            .concurrency
            .or(cli.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        let extract_concurrency = pipeline
            .extract_concurrency
            .unwrap_or(DEFAULT_EXTRACT_CONCURRENCY);
        if concurrency == 0 || extract_concurrency == 0 {
            bail!("concurrency limits must be at least 1");
        }
        let http_timeout = match pipeline.http_timeout_s {
            Some(0) => bail!("pipeline.http_timeout_s must be at least 1"),
            Some(secs) => Duration::from_secs(secs),
            None => DEFAULT_HTTP_TIMEOUT,
        };

        let retry_base = file
            .backoff
            .and_then(|b| b.retry_base_hours)
            .map(|h| Duration::from_secs(h * 60 * 60))
            .unwrap_or(DAY);

        let defaults = MatcherConfig::default();
        let matcher_file = file.matcher.unwrap_or_default();
        let matcher = MatcherConfig {
            candidate_threshold: matcher_file
                .candidate_threshold
                .unwrap_or(defaults.candidate_threshold),
            group_threshold: matcher_file.group_threshold.unwrap_or(defaults.group_threshold),
            duration_tolerance_s: matcher_file
                .duration_tolerance_s
                .unwrap_or(defaults.duration_tolerance_s),
            min_overlap_s: matcher_file.min_overlap_s.unwrap_or(defaults.min_overlap_s),
            frames_per_second: defaults.frames_per_second,
        };
        for (name, value) in [
            ("candidate_threshold", matcher.candidate_threshold),
            ("group_threshold", matcher.group_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("matcher.{} must be within 0..=1, got {}", name, value);
            }
        }

        Ok(Self {
            db_path,
            media_dir,
            fpcalc_path,
            ffprobe_path,
            yt_dlp_path,
            concurrency,
            extract_concurrency,
            http_timeout,
            retry_base,
            matcher,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/data/catalog.db")),
            media_dir: Some(PathBuf::from("/media")),
            fpcalc_path: Some(PathBuf::from("/opt/fpcalc")),
            concurrency: Some(2),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/data/catalog.db"));
        assert_eq!(config.media_dir, Some(PathBuf::from("/media")));
        assert_eq!(config.fpcalc_path, PathBuf::from("/opt/fpcalc"));
        assert_eq!(config.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.yt_dlp_path, PathBuf::from("yt-dlp"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.extract_concurrency, DEFAULT_EXTRACT_CONCURRENCY);
        assert_eq!(config.retry_base, DAY);
        assert_eq!(config.http_timeout, DEFAULT_HTTP_TIMEOUT);
        assert_eq!(config.matcher, MatcherConfig::default());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/should/be/overridden.db")),
            concurrency: Some(2),
            ..Default::default()
        };
        let file_config = FileConfig {
            db_path: Some("/toml/catalog.db".to_string()),
            pipeline: Some(PipelineConfig {
                concurrency: Some(16),
                extract_concurrency: Some(3),
                http_timeout_s: Some(5),
            }),
            matcher: Some(MatcherFileConfig {
                group_threshold: Some(0.5),
                ..Default::default()
            }),
            backoff: Some(BackoffConfig {
                retry_base_hours: Some(2),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_path, PathBuf::from("/toml/catalog.db"));
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.extract_concurrency, 3);
        assert_eq!(config.http_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_base, Duration::from_secs(2 * 60 * 60));
        assert_eq!(config.matcher.group_threshold, 0.5);
        // untouched thresholds keep their defaults
        assert_eq!(config.matcher.candidate_threshold, 0.75);
        assert_eq!(config.media_dir, None);
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db path must be specified"));
    }

    #[test]
    fn test_resolve_db_path_directory_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = CliConfig {
            db_path: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("is a directory"));
    }

    #[test]
    fn test_resolve_rejects_bad_limits_and_thresholds() {
        let cli = CliConfig {
            db_path: Some(PathBuf::from("/data/catalog.db")),
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());

        let cli = CliConfig {
            concurrency: None,
            ..cli
        };
        let file_config = FileConfig {
            matcher: Some(MatcherFileConfig {
                candidate_threshold: Some(1.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("candidate_threshold"));
    }
}
