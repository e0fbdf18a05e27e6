//! Downloading image URLs into the media store.

use super::MediaStore;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::run_bounded;
use crate::store::images::{delete_image, pending_images, set_image_hash, PendingImage};
use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub const IMAGES_TASK: &str = "images.download.url_to_hash";

// some image CDNs refuse unknown agents
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

#[derive(Debug, Error)]
pub enum ImageError {
    /// The URL no longer serves an image. Never retried.
    #[error("image gone: {0}")]
    Gone(String),

    #[error("fetch failed: {0}")]
    Failed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Downloads `url` into `dir` and returns the written file.
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

fn extension_for(content_type: Option<&str>) -> &'static str {
    match content_type.map(|c| c.split(';').next().unwrap_or(c).trim()) {
        Some("image/jpeg") => "jpg",
        Some("image/png") => "png",
        Some("image/webp") => "webp",
        Some("image/gif") => "gif",
        Some("image/avif") => "avif",
        _ => "img",
    }
}

#[async_trait]
impl ImageFetcher for HttpImageFetcher {
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ImageError::Failed(e.to_string()))?;
        let status = response.status();
        match status {
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(ImageError::Gone(format!("{} returned {}", url, status)))
            }
            s if !s.is_success() => {
                return Err(ImageError::Failed(format!("{} returned {}", url, status)))
            }
            _ => {}
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let path = dir.join(format!("image.{}", extension_for(content_type)));
        let mut file = tokio::fs::File::create(&path).await?;
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ImageError::Failed(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(path)
    }
}

/// Pixel size of an image file, read from its header.
pub async fn image_dimensions(path: &Path) -> Result<(i64, i64), ImageError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || image::image_dimensions(&path))
        .await
        .map_err(|e| ImageError::Failed(e.to_string()))?
        .map(|(w, h)| (i64::from(w), i64::from(h)))
        .map_err(|e| ImageError::Gone(format!("not a readable image: {}", e)))
}

/// Replaces image URLs with the hash of the downloaded bytes, measuring the image
/// when the upstream catalog gave no dimensions.
pub struct ImageDownloadTask {
    fetcher: Arc<dyn ImageFetcher>,
    media: MediaStore,
}

impl ImageDownloadTask {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, media: MediaStore) -> Self {
        Self { fetcher, media }
    }

    async fn fetch(&self, image: &PendingImage) -> Result<(String, i64, i64), ImageError> {
        let scratch = self.media.scratch_dir()?;
        let file = self.fetcher.fetch(&image.url, scratch.path()).await?;
        let (width, height) = match (image.width, image.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => image_dimensions(&file).await?,
        };
        let hash = self.media.import(&file).await?;
        Ok((hash, width, height))
    }

    async fn download_one(&self, ctx: &TaskContext, image: PendingImage, changed: &AtomicUsize) -> Result<()> {
        match self.fetch(&image).await {
            Ok((hash, width, height)) => {
                ctx.store
                    .with_conn(|conn| set_image_hash(conn, image.id, &hash, width, height))?;
                debug!("Stored image {} of {} ({}x{})", hash, image.ident, width, height);
            }
            Err(ImageError::Gone(reason)) => {
                ctx.store.with_conn(|conn| delete_image(conn, image.id))?;
                warn!("Dropped image {} of {}: {}", image.url, image.ident, reason);
            }
            Err(e) => {
                ctx.ledger
                    .record(&image.ident.to_string(), IMAGES_TASK, ctx.retry_policy())?;
                return Err(anyhow::anyhow!("{} ({}): {}", image.url, image.ident, e));
            }
        }
        changed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for ImageDownloadTask {
    fn name(&self) -> &str {
        IMAGES_TASK
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let filter = ctx.ledger.filter(IMAGES_TASK);
        let pending = ctx.store.with_conn(|conn| pending_images(conn, &filter))?;
        if pending.is_empty() {
            return Ok(false);
        }

        let changed = AtomicUsize::new(0);
        let progress = ctx.progress(IMAGES_TASK);
        let report = run_bounded(pending, ctx.concurrency, Some(&progress), |image| {
            self.download_one(ctx, image, &changed)
        })
        .await;
        info!(
            "{}: {} settled, {} failed",
            IMAGES_TASK, report.succeeded, report.failed
        );
        Ok(changed.load(Ordering::Relaxed) > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffLedger, ManualClock};
    use crate::store::images::{append_images, images_of, ImageKind, ImageRef};
    use crate::store::{CatalogStore, Ident};
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves PNGs of fixed sizes; anything else is gone or failing.
    struct ScriptedFetcher {
        sizes: HashMap<&'static str, (u32, u32)>,
    }

    #[async_trait]
    impl ImageFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
            if url.ends_with("/gone.png") {
                return Err(ImageError::Gone("404".to_string()));
            }
            let Some(&(w, h)) = self.sizes.get(url) else {
                return Err(ImageError::Failed("connection reset".to_string()));
            };
            let path = dir.join("image.png");
            image::RgbImage::new(w, h)
                .save(&path)
                .map_err(|e| ImageError::Failed(e.to_string()))?;
            Ok(path)
        }
    }

    #[test]
    fn content_type_picks_extension() {
        assert_eq!(extension_for(Some("image/jpeg")), "jpg");
        assert_eq!(extension_for(Some("image/png; charset=binary")), "png");
        assert_eq!(extension_for(None), "img");
    }

    #[tokio::test]
    async fn urls_become_hashes_and_gone_images_are_dropped() {
        let dir = TempDir::new().unwrap();
        let store = CatalogStore::open_in_memory().unwrap();
        let ledger = BackoffLedger::new(&store, Arc::new(ManualClock::new(0)));
        let media = MediaStore::new(dir.path().join("media"));
        media.init().await.unwrap();
        let ctx = TaskContext::new(store.clone(), ledger.clone());

        let album: Ident = "sb/1".parse().unwrap();
        let artist: Ident = "sr/2".parse().unwrap();
        store
            .with_conn(|conn| {
                append_images(
                    conn,
                    &album,
                    &[
                        ImageRef::url(ImageKind::CoverArt, "https://img.example/cover.png"),
                        ImageRef::url(ImageKind::CoverArt, "https://img.example/gone.png"),
                    ],
                )?;
                append_images(
                    conn,
                    &artist,
                    &[ImageRef {
                        kind: ImageKind::ProfileArt,
                        url: "https://img.example/flaky.png".to_string(),
                        width: Some(300),
                        height: Some(300),
                    }],
                )
            })
            .unwrap();

        let fetcher = ScriptedFetcher {
            sizes: HashMap::from([("https://img.example/cover.png", (4, 3))]),
        };
        let task = ImageDownloadTask::new(Arc::new(fetcher), media.clone());
        assert!(task.run(&ctx).await.unwrap());

        let stored = store.with_conn(|conn| images_of(conn, &album)).unwrap();
        assert_eq!(stored.len(), 1);
        let hash = stored[0].hash.clone().expect("cover should be downloaded");
        assert_eq!((stored[0].width, stored[0].height), (Some(4), Some(3)));
        assert!(media.contains(&hash).await);

        // the flaky one stays pending behind a backoff
        assert!(ledger.suppressed("sr/2", IMAGES_TASK).unwrap());
        assert_eq!(
            store.with_conn(|conn| images_of(conn, &artist)).unwrap()[0].hash,
            None
        );
        assert!(!task.run(&ctx).await.unwrap());
    }
}
