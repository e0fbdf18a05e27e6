//! Distributor landing pages (linkcore, lnk.to, karent) list the same release on
//! every store. Reading them turns one link into many `unknown` links for the
//! classifier.

use super::classify::CLASSIFY_TASK;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::run_bounded;
use crate::store::links::{record_expansion, unexpanded_links};
use crate::store::{Link, LinkKind};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const USER_AGENT: &str = concat!("catalog-pipeline/", env!("CARGO_PKG_VERSION"));

lazy_static! {
    static ref ANCHOR: Regex = Regex::new(r"(?is)<a\b([^>]*)>").expect("valid anchor regex");
    static ref ATTRIBUTE: Regex =
        Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .expect("valid attribute regex");
}

/// Fetches HTML pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// `None` when the page does not exist (404 or 410).
    async fn fetch_page(&self, url: &str) -> Result<Option<String>>;
}

pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch_page(&self, url: &str) -> Result<Option<String>> {
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(None),
            status if !status.is_success() => Err(anyhow!("{} returned {}", url, status)),
            _ => Ok(Some(response.text().await?)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distributor {
    /// `linkco.re/<id>`, store buttons carry `id="store_id_<n>"`.
    Linkcore,
    /// `<label>.lnk.to/<slug>`, every outbound anchor is a store.
    LnkTo,
    /// `karent.jp/album/<id>`, store buttons carry the `deli__btn` class.
    Karent,
}

impl Distributor {
    pub const ALL: [Distributor; 3] = [Distributor::Linkcore, Distributor::LnkTo, Distributor::Karent];

    pub fn link_kind(&self) -> LinkKind {
        match self {
            Distributor::Linkcore => LinkKind::Linkcore,
            Distributor::LnkTo => LinkKind::LnkTo,
            Distributor::Karent => LinkKind::KaAlbumId,
        }
    }

    pub fn task_name(&self) -> &'static str {
        match self {
            Distributor::Linkcore => "links.extrapolate.from_linkcore",
            Distributor::LnkTo => "links.extrapolate.from_lnk_to",
            Distributor::Karent => "links.extrapolate.from_karent_album",
        }
    }

    pub fn page_url(&self, data: &str) -> String {
        match self {
            Distributor::Linkcore => format!("https://linkco.re/{}", data),
            Distributor::LnkTo => match data.split_once('/') {
                Some((label, slug)) => format!("https://{}.lnk.to/{}", label, slug),
                None => format!("https://lnk.to/{}", data),
            },
            Distributor::Karent => format!("https://karent.jp/album/{}", data),
        }
    }

    fn is_store_anchor(&self, attrs: &HashMap<String, String>, href: &Url) -> bool {
        match self {
            Distributor::Linkcore => attrs.get("id").is_some_and(|id| id.starts_with("store_id_")),
            Distributor::LnkTo => href
                .host_str()
                .is_some_and(|host| host != "lnk.to" && !host.ends_with(".lnk.to")),
            Distributor::Karent => attrs
                .get("class")
                .is_some_and(|class| class.split_whitespace().any(|c| c == "deli__btn")),
        }
    }

    /// Absolute store URLs on a landing page, in page order, without repeats.
    pub fn store_urls(&self, html: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for attrs in anchors(html) {
            let Some(href) = attrs.get("href") else {
                continue;
            };
            let Ok(url) = Url::parse(href) else {
                continue;
            };
            if !matches!(url.scheme(), "http" | "https") || !self.is_store_anchor(&attrs, &url) {
                continue;
            }
            if !urls.contains(href) {
                urls.push(href.clone());
            }
        }
        urls
    }
}

fn unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Attributes of every `<a>` tag, names lowercased.
fn anchors(html: &str) -> Vec<HashMap<String, String>> {
    ANCHOR
        .captures_iter(html)
        .map(|tag| {
            ATTRIBUTE
                .captures_iter(&tag[1])
                .filter_map(|attr| {
                    let value = attr.get(2).or(attr.get(3)).or(attr.get(4))?;
                    Some((attr[1].to_ascii_lowercase(), unescape(value.as_str().trim())))
                })
                .collect()
        })
        .collect()
}

/// Reads the landing page behind each unexpanded link of one distributor and stores
/// the store URLs it lists on the link's origin.
pub struct DistributorExpandTask {
    distributor: Distributor,
    pages: Arc<dyn PageFetcher>,
}

impl DistributorExpandTask {
    pub fn new(distributor: Distributor, pages: Arc<dyn PageFetcher>) -> Self {
        Self { distributor, pages }
    }

    async fn expand_one(&self, ctx: &TaskContext, link: Link, added: &AtomicUsize) -> Result<()> {
        let name = self.distributor.task_name();
        let url = self.distributor.page_url(&link.data);
        let page = match self.pages.fetch_page(&url).await {
            Ok(page) => page,
            Err(e) => {
                ctx.ledger
                    .record(&link.ident.to_string(), name, ctx.retry_policy())?;
                return Err(e.context(url));
            }
        };

        let urls = match page {
            Some(html) => self.distributor.store_urls(&html),
            None => {
                debug!("{}: {} is gone", name, url);
                Vec::new()
            }
        };
        let new = ctx
            .store
            .with_transaction(|tx| record_expansion(tx, &link, &urls))?;
        if new > 0 {
            // fresh unknown links should not wait out an old classify backoff
            ctx.ledger.clear(&link.ident.to_string(), CLASSIFY_TASK)?;
            added.fetch_add(new, Ordering::Relaxed);
        }
        debug!("{}: {} listed {} stores, {} new", name, url, urls.len(), new);
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for DistributorExpandTask {
    fn name(&self) -> &str {
        self.distributor.task_name()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let name = self.distributor.task_name();
        let filter = ctx.ledger.filter(name);
        let kind = self.distributor.link_kind();
        let links = ctx.store.with_conn(|conn| unexpanded_links(conn, kind, &filter))?;
        if links.is_empty() {
            return Ok(false);
        }

        let added = AtomicUsize::new(0);
        let progress = ctx.progress(name);
        let report = run_bounded(links, ctx.concurrency, Some(&progress), |link| {
            self.expand_one(ctx, link, &added)
        })
        .await;
        let added = added.load(Ordering::Relaxed);
        info!(
            "{}: {} pages read, {} new links, {} failed",
            name, report.succeeded, added, report.failed
        );
        Ok(added > 0)
    }
}
