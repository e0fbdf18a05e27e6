//! Scripted collaborators
//!
//! Stand-ins for the upstream catalogs, yt-dlp, ffprobe, fpcalc, distributor pages
//! and image hosts. Each one answers from a fixed script so pipeline runs are
//! deterministic.

#![allow(dead_code)]

use super::env::parse;
use anyhow::{bail, Result};
use async_trait::async_trait;
use catalog_pipeline::fingerprint::{ExtractError, Fingerprint, FingerprintExtractor};
use catalog_pipeline::media::{
    DownloadError, ImageError, ImageFetcher, MediaDownloader, MediaInfo, MediaProber, ProbeError,
};
use catalog_pipeline::sources::{
    FetchOutcome, FetchedRecord, LinkClassifier, MetadataFetcher, PageFetcher,
};
use catalog_pipeline::store::{Ident, LinkKind, Namespace};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Deterministic pseudo-random frames. Different seeds are about half the bits apart.
pub fn frames(seed: u32, len: usize) -> Vec<u32> {
    (0..len as u32)
        .map(|i| {
            let x = seed
                .wrapping_mul(2_654_435_761)
                .wrapping_add(i.wrapping_mul(40_503));
            x ^ (x >> 15) ^ (x << 7)
        })
        .collect()
}

/// Upstream catalog answering from a fixed table.
pub struct FakeFetcher {
    namespace: Namespace,
    outcomes: HashMap<Ident, FetchOutcome>,
    failing: bool,
    batch_size: Option<usize>,
    requests: Arc<Mutex<Vec<Vec<Ident>>>>,
}

impl FakeFetcher {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            outcomes: HashMap::new(),
            failing: false,
            batch_size: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn found(mut self, ident: &str, record: FetchedRecord) -> Self {
        self.outcomes.insert(parse(ident), FetchOutcome::Found(record));
        self
    }

    pub fn gone(mut self, ident: &str) -> Self {
        self.outcomes.insert(parse(ident), FetchOutcome::NotFound);
        self
    }

    /// Every request fails as if the network were down.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Every batch requested so far, in request order.
    pub fn requests(&self) -> Arc<Mutex<Vec<Vec<Ident>>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl MetadataFetcher for FakeFetcher {
    fn namespace(&self) -> Namespace {
        self.namespace
    }

    fn batch_size(&self) -> usize {
        self.batch_size.unwrap_or(catalog_pipeline::sources::MAX_BATCH)
    }

    async fn fetch(&self, ids: &[Ident]) -> Result<HashMap<Ident, FetchOutcome>> {
        self.requests.lock().unwrap().push(ids.to_vec());
        if self.failing {
            bail!("upstream unavailable");
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.outcomes.get(id).map(|o| (id.clone(), o.clone())))
            .collect())
    }
}

/// A named record with the given typed links.
pub fn record(name: &str, links: &[(LinkKind, &str)]) -> FetchedRecord {
    FetchedRecord {
        name: name.to_string(),
        links: links.iter().map(|(k, d)| (*k, d.to_string())).collect(),
        ..Default::default()
    }
}

/// Downloader writing fixed payloads instead of calling yt-dlp.
pub struct FakeDownloader {
    namespace: Namespace,
    payloads: HashMap<String, Vec<u8>>,
    unavailable: HashSet<String>,
}

impl FakeDownloader {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            payloads: HashMap::new(),
            unavailable: HashSet::new(),
        }
    }

    pub fn serves(mut self, id: &str, payload: &[u8]) -> Self {
        self.payloads.insert(id.to_string(), payload.to_vec());
        self
    }

    pub fn unavailable(mut self, id: &str) -> Self {
        self.unavailable.insert(id.to_string());
        self
    }
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    fn namespace(&self) -> Namespace {
        self.namespace
    }

    async fn download(&self, ident: &Ident, dir: &Path) -> Result<PathBuf, DownloadError> {
        if self.unavailable.contains(ident.id()) {
            return Err(DownloadError::Unavailable("Video unavailable".to_string()));
        }
        let Some(payload) = self.payloads.get(ident.id()) else {
            return Err(DownloadError::ToolFailed("HTTP Error 503".to_string()));
        };
        let path = dir.join(format!("{}.webm", ident.id()));
        tokio::fs::write(&path, payload).await?;
        Ok(path)
    }
}

pub struct FakeProber;

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, ProbeError> {
        Ok(MediaInfo {
            bitrate: 128_000,
            width: None,
            height: None,
            duration_s: Some(25.6),
        })
    }
}

/// Extractor keyed by file content. Unknown content is treated as silence.
#[derive(Default)]
pub struct FakeExtractor {
    by_content: HashMap<Vec<u8>, Fingerprint>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knows(mut self, payload: &[u8], frames: Vec<u32>, duration_s: f64) -> Self {
        self.by_content
            .insert(payload.to_vec(), Fingerprint { duration_s, frames });
        self
    }
}

#[async_trait]
impl FingerprintExtractor for FakeExtractor {
    async fn extract(&self, path: &Path) -> Result<Fingerprint, ExtractError> {
        let bytes = tokio::fs::read(path).await?;
        self.by_content
            .get(&bytes)
            .cloned()
            .ok_or_else(|| ExtractError::InsufficientAudio("silence".to_string()))
    }
}

/// Classifier whose backing service is always down.
pub struct FailingClassifier;

#[async_trait]
impl LinkClassifier for FailingClassifier {
    async fn classify(&self, _url: &str) -> Result<Option<(LinkKind, String)>> {
        bail!("resolver timed out")
    }
}

/// Distributor pages keyed by URL. Unknown URLs are 404s.
#[derive(Default)]
pub struct FakePages {
    pages: HashMap<String, String>,
    failing: bool,
    requests: Arc<Mutex<Vec<String>>>,
}

impl FakePages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn requests(&self) -> Arc<Mutex<Vec<String>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl PageFetcher for FakePages {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
        self.requests.lock().unwrap().push(url.to_string());
        if self.failing {
            bail!("connection reset");
        }
        Ok(self.pages.get(url).cloned())
    }
}

/// Image host serving blank PNGs of fixed sizes. Unknown URLs are gone.
#[derive(Default)]
pub struct FakeImages {
    sizes: HashMap<String, (u32, u32)>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serves(mut self, url: &str, width: u32, height: u32) -> Self {
        self.sizes.insert(url.to_string(), (width, height));
        self
    }
}

#[async_trait]
impl ImageFetcher for FakeImages {
    async fn fetch(&self, url: &str, dir: &Path) -> Result<PathBuf, ImageError> {
        let Some(&(width, height)) = self.sizes.get(url) else {
            return Err(ImageError::Gone(format!("{} returned 404 Not Found", url)));
        };
        let path = dir.join("image.png");
        image::RgbImage::new(width, height)
            .save(&path)
            .map_err(|e| ImageError::Failed(e.to_string()))?;
        Ok(path)
    }
}
