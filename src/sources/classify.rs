//! Turning raw `unknown` URLs into typed links.

use crate::backoff::{BackoffPolicy, MONTH};
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::run_bounded;
use crate::store::links::{reclassify, unknown_links};
use crate::store::{Link, LinkKind};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use url::Url;

pub const CLASSIFY_TASK: &str = "links.classify";

#[async_trait]
pub trait LinkClassifier: Send + Sync {
    /// Returns `None` for URLs this classifier does not recognise. Errors are for
    /// classifiers that need the network and failed to reach it.
    async fn classify(&self, url: &str) -> Result<Option<(LinkKind, String)>>;
}

struct Rule {
    host: &'static str,
    /// Leading path segment, or `None` to take the first segment as the id.
    prefix: Option<&'static str>,
    /// Query parameter holding the id instead of the path.
    param: Option<&'static str>,
    kind: LinkKind,
}

const RULES: &[Rule] = &[
    Rule { host: "youtube.com", prefix: Some("watch"), param: Some("v"), kind: LinkKind::YtVideoId },
    Rule { host: "youtube.com", prefix: Some("shorts"), param: None, kind: LinkKind::YtVideoId },
    Rule { host: "youtube.com", prefix: Some("embed"), param: None, kind: LinkKind::YtVideoId },
    Rule { host: "youtube.com", prefix: Some("live"), param: None, kind: LinkKind::YtVideoId },
    Rule { host: "youtube.com", prefix: Some("channel"), param: None, kind: LinkKind::YtChannelId },
    Rule { host: "youtube.com", prefix: Some("playlist"), param: Some("list"), kind: LinkKind::YtPlaylistId },
    Rule { host: "music.youtube.com", prefix: Some("watch"), param: Some("v"), kind: LinkKind::YtVideoId },
    Rule { host: "music.youtube.com", prefix: Some("channel"), param: None, kind: LinkKind::YtChannelId },
    Rule { host: "music.youtube.com", prefix: Some("playlist"), param: Some("list"), kind: LinkKind::YtPlaylistId },
    Rule { host: "youtu.be", prefix: None, param: None, kind: LinkKind::YtVideoId },
    Rule { host: "open.spotify.com", prefix: Some("track"), param: None, kind: LinkKind::SpTrackId },
    Rule { host: "open.spotify.com", prefix: Some("album"), param: None, kind: LinkKind::SpAlbumId },
    Rule { host: "open.spotify.com", prefix: Some("artist"), param: None, kind: LinkKind::SpArtistId },
    Rule { host: "vocadb.net", prefix: Some("S"), param: None, kind: LinkKind::VdSongId },
    Rule { host: "vocadb.net", prefix: Some("Al"), param: None, kind: LinkKind::VdAlbumId },
    Rule { host: "vocadb.net", prefix: Some("Ar"), param: None, kind: LinkKind::VdArtistId },
    Rule { host: "karent.jp", prefix: Some("album"), param: None, kind: LinkKind::KaAlbumId },
    Rule { host: "karent.jp", prefix: Some("artist"), param: None, kind: LinkKind::KaArtistId },
    Rule { host: "nicovideo.jp", prefix: Some("watch"), param: None, kind: LinkKind::NcVideoId },
    Rule { host: "twitter.com", prefix: None, param: None, kind: LinkKind::TwUser },
    Rule { host: "x.com", prefix: None, param: None, kind: LinkKind::TwUser },
    Rule { host: "piapro.jp", prefix: Some("my_page"), param: Some("pid"), kind: LinkKind::PiCreator },
    Rule { host: "piapro.jp", prefix: None, param: None, kind: LinkKind::PiCreator },
    Rule { host: "linkco.re", prefix: None, param: None, kind: LinkKind::Linkcore },
    Rule { host: "lnk.to", prefix: None, param: None, kind: LinkKind::LnkTo },
];

const LNK_TO: &str = "lnk.to";

/// Parses an absolute http(s) URL. Scheme-less input such as `youtu.be/xyz` is read
/// as https.
fn parse_url(raw: &str) -> Option<Url> {
    let raw = raw.trim();
    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(&format!("https://{}", raw)).ok()?
        }
        Err(_) => return None,
    };
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Host without the `www.` and `m.` prefixes. `Url` already lowercases it and keeps
/// ports and credentials out of it.
fn normalized_host(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let host = host
        .strip_prefix("www.")
        .or_else(|| host.strip_prefix("m."))
        .unwrap_or(host);
    Some(host.to_string())
}

/// Percent-decoded, non-empty path segments.
fn decoded_segments(url: &Url) -> Vec<String> {
    url.path_segments()
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .filter_map(|s| urlencoding::decode(s).ok().map(|s| s.into_owned()))
        .collect()
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

/// Offline classification by host and path shape. Locale prefixes such as
/// `open.spotify.com/intl-ja/track/...` are skipped.
pub fn classify_url(raw: &str) -> Option<(LinkKind, String)> {
    let url = parse_url(raw)?;
    let host = normalized_host(&url)?;
    let mut segments = decoded_segments(&url);
    if segments.first().is_some_and(|s| s.starts_with("intl-")) {
        segments.remove(0);
    }

    // label subdomains: `<label>.lnk.to/<slug>`
    if let Some(label) = host.strip_suffix(LNK_TO).and_then(|h| h.strip_suffix('.')) {
        return match segments.as_slice() {
            [slug] => Some((LinkKind::LnkTo, format!("{}/{}", label, slug))),
            _ => None,
        };
    }

    RULES.iter().filter(|r| r.host == host).find_map(|rule| {
        let tail: &[String] = match rule.prefix {
            Some(prefix) if segments.first().map(String::as_str) == Some(prefix) => &segments[1..],
            Some(_) => return None,
            // bare `host/<id>` only, deeper paths are posts or items
            None if segments.len() == 1 => &segments[..],
            None => return None,
        };
        let data = match rule.param {
            Some(param) => query_param(&url, param)?,
            None => tail.first()?.clone(),
        };
        Some((rule.kind, data))
    })
}

/// [`LinkClassifier`] backed by [`classify_url`].
pub struct WeakClassifier;

#[async_trait]
impl LinkClassifier for WeakClassifier {
    async fn classify(&self, url: &str) -> Result<Option<(LinkKind, String)>> {
        Ok(classify_url(url))
    }
}

/// Reclassifies `unknown` links whose origin is not suppressed.
pub struct ClassifyLinksTask {
    classifier: Box<dyn LinkClassifier>,
}

impl ClassifyLinksTask {
    pub fn new(classifier: Box<dyn LinkClassifier>) -> Self {
        Self { classifier }
    }

    async fn classify_one(&self, ctx: &TaskContext, link: Link, changed: &AtomicUsize) -> Result<()> {
        let classified = match self.classifier.classify(&link.data).await {
            Ok(classified) => classified,
            Err(e) => {
                ctx.ledger
                    .record(&link.ident.to_string(), CLASSIFY_TASK, ctx.retry_policy())?;
                return Err(e.context(link.data));
            }
        };
        let Some((kind, data)) = classified else {
            // retried monthly
            let wake = ctx.ledger.now_ms() + MONTH.as_millis() as i64;
            ctx.ledger.record(
                &link.ident.to_string(),
                CLASSIFY_TASK,
                BackoffPolicy::Exactly(wake),
            )?;
            debug!("{}: unrecognised {}", link.ident, link.data);
            return Ok(());
        };
        ctx.store
            .with_transaction(|tx| reclassify(tx, &link, kind, &data))?;
        debug!("{} -> {} {}", link.data, kind, data);
        changed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for ClassifyLinksTask {
    fn name(&self) -> &str {
        CLASSIFY_TASK
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let filter = ctx.ledger.filter(CLASSIFY_TASK);
        let links = ctx.store.with_conn(|conn| unknown_links(conn, &filter))?;
        if links.is_empty() {
            return Ok(false);
        }

        let changed = AtomicUsize::new(0);
        let progress = ctx.progress(CLASSIFY_TASK);
        let total = links.len();
        run_bounded(links, ctx.concurrency, Some(&progress), |link| {
            self.classify_one(ctx, link, &changed)
        })
        .await;

        let changed = changed.load(Ordering::Relaxed);
        info!("{}: classified {} of {} links", CLASSIFY_TASK, changed, total);
        Ok(changed > 0)
    }
}
