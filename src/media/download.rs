//! Downloading the audio behind per-source records into the media store.

use super::probe::{MediaProber, ProbeError};
use super::store::MediaStore;
use crate::backoff::BackoffPolicy;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::run_bounded;
use crate::store::links::links_from;
use crate::store::records::record_meta;
use crate::store::sources::{insert_source, records_without_source, SourceInsert};
use crate::store::{Ident, LinkKind, Namespace, NewSource, SourceEvidence};
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DownloadError {
    /// Permanent: the upstream item is gone or was never downloadable.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("downloader failed: {0}")]
    ToolFailed(String),

    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Namespace whose records this downloader can fetch.
    fn namespace(&self) -> Namespace;

    /// Downloads the media for `ident` into `dir` and returns the written file.
    async fn download(&self, ident: &Ident, dir: &Path) -> Result<PathBuf, DownloadError>;
}

const UNAVAILABLE_MARKERS: &[&str] = &[
    "Video unavailable",
    "Private video",
    "This video has been removed",
    "account associated with this video has been terminated",
];

/// Best-audio download of YouTube videos through `yt-dlp`.
pub struct YtDlpDownloader {
    binary: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl MediaDownloader for YtDlpDownloader {
    fn namespace(&self) -> Namespace {
        Namespace::YoutubeVideo
    }

    async fn download(&self, ident: &Ident, dir: &Path) -> Result<PathBuf, DownloadError> {
        let url = format!("https://www.youtube.com/watch?v={}", ident.id());
        let output = Command::new(&self.binary)
            .args(["-f", "bestaudio", "--no-playlist", "--no-progress", "-o"])
            .arg(dir.join("%(id)s.%(ext)s"))
            .args(["--print", "after_move:filepath"])
            .arg(&url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
                return Err(DownloadError::Unavailable(stderr.trim().to_string()));
            }
            return Err(DownloadError::ToolFailed(stderr.trim().to_string()));
        }

        parse_printed_path(&String::from_utf8_lossy(&output.stdout))
    }
}

/// yt-dlp prints the final path last; earlier lines may be warnings.
fn parse_printed_path(stdout: &str) -> Result<PathBuf, DownloadError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .map(PathBuf::from)
        .ok_or_else(|| DownloadError::ToolFailed("no output file reported".to_string()))
}

/// Side-channel identity evidence for a record about to get a source.
fn source_evidence(conn: &Connection, ident: &Ident) -> Result<SourceEvidence> {
    let isrc = record_meta(conn, ident)?.and_then(|meta| meta.isrc);
    let foreign_song_id = links_from(conn, ident)?
        .into_iter()
        .find(|l| l.kind == LinkKind::VdSongId)
        .map(|l| l.data);
    Ok(SourceEvidence {
        isrc,
        foreign_song_id,
    })
}

/// Downloads every record of the downloader's namespace that has no source yet.
pub struct DownloadTask {
    name: String,
    downloader: Arc<dyn MediaDownloader>,
    prober: Arc<dyn MediaProber>,
    media: MediaStore,
}

impl DownloadTask {
    pub fn new(
        downloader: Arc<dyn MediaDownloader>,
        prober: Arc<dyn MediaProber>,
        media: MediaStore,
    ) -> Self {
        Self {
            name: format!("sources.download.{}", downloader.namespace().table()),
            downloader,
            prober,
            media,
        }
    }

    async fn fetch(&self, ident: &Ident) -> Result<(String, super::MediaInfo), DownloadError> {
        let scratch = self.media.scratch_dir()?;
        let file = self.downloader.download(ident, scratch.path()).await?;
        let info = self.prober.probe(&file).await?;
        let hash = self.media.import(&file).await?;
        Ok((hash, info))
    }

    async fn download_one(&self, ctx: &TaskContext, ident: Ident, changed: &AtomicUsize) -> Result<()> {
        let key = ident.to_string();
        let (hash, info) = match self.fetch(&ident).await {
            Ok(fetched) => fetched,
            Err(e) => {
                let policy = match e {
                    DownloadError::Unavailable(_) => BackoffPolicy::Forever,
                    _ => ctx.retry_policy(),
                };
                ctx.ledger.record(&key, &self.name, policy)?;
                return Err(anyhow::anyhow!("{}: {}", ident, e));
            }
        };

        let inserted = ctx.store.with_transaction(|tx| -> Result<SourceInsert> {
            let evidence = source_evidence(tx, &ident)?;
            insert_source(
                tx,
                &NewSource {
                    hash: hash.clone(),
                    ident: ident.clone(),
                    bitrate: info.bitrate,
                    width: info.width,
                    height: info.height,
                    duration_s: info.duration_s,
                    evidence,
                },
            )
        })?;
        match inserted {
            SourceInsert::Created => debug!("Stored source {} for {}", hash, ident),
            SourceInsert::Aliased => info!("{} serves the same media as source {}", ident, hash),
            SourceInsert::Known => debug!("Source {} already known for {}", hash, ident),
        }
        if inserted.changed() {
            changed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for DownloadTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let filter = ctx.ledger.filter(&self.name);
        let ns = self.downloader.namespace();
        let pending = ctx
            .store
            .with_conn(|conn| records_without_source(conn, ns, &filter))?;
        if pending.is_empty() {
            return Ok(false);
        }

        info!("{}: downloading {} records", self.name, pending.len());
        let progress = ctx.progress(&self.name);
        let changed = AtomicUsize::new(0);
        let report = run_bounded(pending, ctx.concurrency, Some(&progress), |ident| {
            self.download_one(ctx, ident, &changed)
        })
        .await;
        let changed = changed.load(Ordering::Relaxed);
        info!(
            "{}: {} downloaded, {} new sources, {} failed",
            self.name, report.succeeded, changed, report.failed
        );
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn printed_path_is_last_line() {
        let stdout = "WARNING: something\n/tmp/x/abc.webm\n\n";
        assert_eq!(
            parse_printed_path(stdout).unwrap(),
            PathBuf::from("/tmp/x/abc.webm")
        );
        assert!(matches!(
            parse_printed_path("  \n"),
            Err(DownloadError::ToolFailed(_))
        ));
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let downloader = YtDlpDownloader::new("/nonexistent/yt-dlp");
        let dir = tempfile::TempDir::new().unwrap();
        let result = downloader
            .download(&"yv/abc".parse().unwrap(), dir.path())
            .await;
        assert!(matches!(result, Err(DownloadError::Io(_))));
    }
}
