//! Metadata fetching for per-source records.

use super::extrapolate::EXTRAPOLATE_TASK;
use crate::backoff::BackoffPolicy;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::{run_bounded, Pacer};
use crate::store::images::{append_images, ImageRef};
use crate::store::links::append_links;
use crate::store::locale::{insert_text, Locale, LocalePart};
use crate::store::records::{delete_record, missing_meta, update_record};
use crate::store::{Ident, LinkKind, Namespace, RecordMeta};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Upper bound on ids per upstream request.
pub const MAX_BATCH: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct LocalizedText {
    pub locale: Locale,
    pub part: LocalePart,
    pub text: String,
}

/// Everything a fetcher learned about one record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedRecord {
    pub name: String,
    pub meta: RecordMeta,
    /// Links the fetcher already knows the kind of.
    pub links: Vec<(LinkKind, String)>,
    /// Raw URLs, stored as `unknown` links until classified.
    pub urls: Vec<String>,
    pub texts: Vec<LocalizedText>,
    /// Cover or profile art, downloaded later by `images.download.url_to_hash`.
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found(FetchedRecord),
    /// The upstream catalog positively reports the id as gone.
    NotFound,
}

/// Client for one external catalog.
#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    fn namespace(&self) -> Namespace;

    /// Ids per request, capped at [`MAX_BATCH`].
    fn batch_size(&self) -> usize {
        MAX_BATCH
    }

    /// Minimum spacing between request starts, for rate-limited APIs.
    fn pacing(&self) -> Option<Duration> {
        None
    }

    /// Fetches a batch. Ids missing from the returned map are treated as transient
    /// failures.
    async fn fetch(&self, ids: &[Ident]) -> Result<HashMap<Ident, FetchOutcome>>;
}

/// Fills in name, meta, links and locale text of records that were only stubs.
pub struct MetaFetchTask {
    name: String,
    fetcher: Box<dyn MetadataFetcher>,
}

impl MetaFetchTask {
    pub fn new(fetcher: Box<dyn MetadataFetcher>) -> Self {
        Self {
            name: format!("{}.meta", fetcher.namespace().table()),
            fetcher,
        }
    }

    fn store_outcome(&self, ctx: &TaskContext, ident: &Ident, outcome: FetchOutcome) -> Result<()> {
        match outcome {
            FetchOutcome::Found(record) => {
                let unknown: Vec<(LinkKind, String)> = record
                    .urls
                    .into_iter()
                    .map(|url| (LinkKind::Unknown, url))
                    .collect();
                ctx.store.with_transaction(|tx| -> Result<()> {
                    update_record(tx, ident, &record.name, &record.meta)?;
                    append_links(tx, ident, &record.links)?;
                    append_links(tx, ident, &unknown)?;
                    for text in &record.texts {
                        insert_text(tx, ident, &text.locale, text.part, &text.text)?;
                    }
                    append_images(tx, ident, &record.images)?;
                    Ok(())
                })?;
                debug!("Fetched {} ({})", ident, record.name);
            }
            FetchOutcome::NotFound => {
                ctx.store.with_conn(|conn| delete_record(conn, ident))?;
                // keep links from recreating the stub
                ctx.ledger
                    .record(&ident.to_string(), EXTRAPOLATE_TASK, BackoffPolicy::Forever)?;
                info!("{} no longer exists upstream, removed", ident);
            }
        }
        Ok(())
    }

    async fn fetch_batch(
        &self,
        ctx: &TaskContext,
        pacer: Option<&Pacer>,
        batch: Vec<Ident>,
        stored: &AtomicUsize,
    ) -> Result<()> {
        if let Some(pacer) = pacer {
            pacer.wait().await;
        }
        let mut outcomes = match self.fetcher.fetch(&batch).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                for ident in &batch {
                    ctx.ledger
                        .record(&ident.to_string(), &self.name, ctx.retry_policy())?;
                }
                return Err(e.context(format!("batch of {} starting at {}", batch.len(), batch[0])));
            }
        };

        for ident in &batch {
            match outcomes.remove(ident) {
                Some(outcome) => {
                    self.store_outcome(ctx, ident, outcome)?;
                    stored.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    warn!("{}: no answer for {}", self.name, ident);
                    ctx.ledger
                        .record(&ident.to_string(), &self.name, ctx.retry_policy())?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for MetaFetchTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let filter = ctx.ledger.filter(&self.name);
        let ns = self.fetcher.namespace();
        let pending = ctx.store.with_conn(|conn| missing_meta(conn, ns, &filter))?;
        if pending.is_empty() {
            return Ok(false);
        }

        let batch_size = self.fetcher.batch_size().clamp(1, MAX_BATCH);
        let batches: Vec<Vec<Ident>> = pending.chunks(batch_size).map(<[Ident]>::to_vec).collect();
        info!(
            "{}: {} records in {} batches",
            self.name,
            pending.len(),
            batches.len()
        );

        let pacer = self.fetcher.pacing().map(Pacer::new);
        let stored = AtomicUsize::new(0);
        let progress = ctx.progress(&self.name);
        run_bounded(batches, ctx.concurrency, Some(&progress), |batch| {
            self.fetch_batch(ctx, pacer.as_ref(), batch, &stored)
        })
        .await;

        Ok(stored.load(Ordering::Relaxed) > 0)
    }
}
