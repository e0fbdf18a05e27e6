use super::extract::{ExtractError, FingerprintExtractor};
use super::matcher::Matcher;
use crate::backoff::BackoffPolicy;
use crate::media::MediaStore;
use crate::metrics;
use crate::pipeline::{PipelineTask, TaskContext, TaskError};
use crate::runner::run_bounded;
use crate::store::records::{assign_canonical_id, canonical_id, create_entity};
use crate::store::sources::{
    attach_fingerprint, fingerprinted_source, intern_fingerprint, placed_aliases,
    set_source_track, sources_without_fingerprint, unmatched_sources, PendingSource,
};
use crate::store::{EntityKind, Ident};
use crate::unify::{component, UnifyScope};
use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const EXTRACT_TASK: &str = "sources.fingerprint.extract";
pub const MATCH_TASK: &str = "track.match.fingerprint";

/// `fpcalc` is CPU bound, so it gets its own in-flight limit.
pub const DEFAULT_EXTRACT_CONCURRENCY: usize = 10;

/// Computes fingerprints for downloaded sources that do not have one.
pub struct ExtractFingerprintsTask {
    extractor: Arc<dyn FingerprintExtractor>,
    media: MediaStore,
    limit: usize,
}

impl ExtractFingerprintsTask {
    pub fn new(extractor: Arc<dyn FingerprintExtractor>, media: MediaStore) -> Self {
        Self {
            extractor,
            media,
            limit: DEFAULT_EXTRACT_CONCURRENCY,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    async fn extract_one(&self, ctx: &TaskContext, source: PendingSource) -> Result<()> {
        let path = self.media.path_of(&source.hash);
        let fingerprint = match self.extractor.extract(&path).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                let policy = match e {
                    ExtractError::InsufficientAudio(_) => BackoffPolicy::Forever,
                    _ => ctx.retry_policy(),
                };
                ctx.ledger
                    .record(&source.ident.to_string(), EXTRACT_TASK, policy)?;
                return Err(anyhow::anyhow!("{} ({}): {}", source.hash, source.ident, e));
            }
        };

        ctx.store.with_transaction(|tx| -> Result<()> {
            let id = intern_fingerprint(tx, &fingerprint.frames, fingerprint.duration_s)?;
            attach_fingerprint(tx, &source.hash, id, fingerprint.duration_s)?;
            Ok(())
        })?;
        debug!(
            "Fingerprinted {}: {} frames, {:.1}s",
            source.hash,
            fingerprint.frames.len(),
            fingerprint.duration_s
        );
        Ok(())
    }
}

#[async_trait]
impl PipelineTask for ExtractFingerprintsTask {
    fn name(&self) -> &str {
        EXTRACT_TASK
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let filter = ctx.ledger.filter(EXTRACT_TASK);
        let pending = ctx
            .store
            .with_conn(|conn| sources_without_fingerprint(conn, &filter))?;
        if pending.is_empty() {
            return Ok(false);
        }

        let progress = ctx.progress(EXTRACT_TASK);
        let report = run_bounded(pending, self.limit, Some(&progress), |source| {
            self.extract_one(ctx, source)
        })
        .await;
        info!(
            "{}: {} fingerprinted, {} failed",
            EXTRACT_TASK, report.succeeded, report.failed
        );
        Ok(report.succeeded > 0)
    }
}

/// How a source ended up on its track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    /// The origin record, or a record linked to it, already had a track.
    Adopted(i64),
    Matched(i64),
    Seeded(i64),
}

impl MatchResult {
    pub fn track_id(&self) -> i64 {
        match self {
            MatchResult::Adopted(id) | MatchResult::Matched(id) | MatchResult::Seeded(id) => *id,
        }
    }
}

/// Track held by `origin` or, failing that, by any track record in its link
/// component. Several distinct ids is a conflict left for `track.unify` to report;
/// the lowest one is returned.
fn linked_track(conn: &Connection, origin: &Ident) -> Result<Option<i64>> {
    if let Some(id) = canonical_id(conn, origin)?.flatten() {
        return Ok(Some(id));
    }
    let scope = UnifyScope::for_kind(EntityKind::Track);
    let mut held = BTreeSet::new();
    for member in component(conn, &scope, origin)? {
        if let Some(id) = canonical_id(conn, &member)?.flatten() {
            held.insert(id);
        }
    }
    Ok(held.into_iter().next())
}

/// Attaches one fingerprinted source to a track. Must run inside a transaction.
pub fn match_source(conn: &Connection, matcher: &Matcher, hash: &str) -> Result<Option<MatchResult>> {
    let Some(source) = fingerprinted_source(conn, hash)? else {
        return Ok(None);
    };
    if source.track_id.is_some() {
        return Ok(None);
    }

    let origin_is_track = source.ident.entity() == EntityKind::Track;
    let adopted = if origin_is_track {
        linked_track(conn, &source.ident)?
    } else {
        None
    };

    let result = match adopted {
        Some(id) => MatchResult::Adopted(id),
        None => match matcher.find_track(conn, &source)? {
            Some(id) => MatchResult::Matched(id),
            None => MatchResult::Seeded(create_entity(conn, EntityKind::Track)?),
        },
    };

    let track_id = result.track_id();
    set_source_track(conn, hash, track_id)?;
    if origin_is_track {
        assign_canonical_id(conn, &source.ident, track_id)?;
    }
    Ok(Some(result))
}

/// Puts unassigned records that serve already placed content onto that content's
/// track. Records assigned elsewhere are left alone.
pub fn place_aliases(conn: &Connection) -> Result<usize> {
    let mut placed = 0;
    for (ident, track_id) in placed_aliases(conn)? {
        if ident.entity() != EntityKind::Track {
            continue;
        }
        match canonical_id(conn, &ident)? {
            Some(None) => {
                assign_canonical_id(conn, &ident, track_id)?;
                placed += 1;
            }
            Some(Some(other)) if other != track_id => {
                debug!("{} is on track {}, its media on {}", ident, other, track_id)
            }
            _ => {}
        }
    }
    Ok(placed)
}

/// Places every fingerprinted, unplaced source onto a track, then the records
/// sharing its content.
///
/// Sources are handled one at a time in creation order: each placement changes the
/// groups later sources are checked against.
pub struct MatchFingerprintsTask {
    matcher: Matcher,
}

impl MatchFingerprintsTask {
    pub fn new(matcher: Matcher) -> Self {
        Self { matcher }
    }
}

#[async_trait]
impl PipelineTask for MatchFingerprintsTask {
    fn name(&self) -> &str {
        MATCH_TASK
    }

    async fn run(&self, ctx: &TaskContext) -> Result<bool, TaskError> {
        let hashes = ctx.store.with_conn(unmatched_sources)?;
        if hashes.is_empty() {
            return Ok(self.place_aliases(ctx)?);
        }

        let progress = ctx.progress(MATCH_TASK);
        let total = hashes.len();
        let mut mutated = false;
        for (i, hash) in hashes.iter().enumerate() {
            if ctx.is_cancelled() {
                break;
            }
            let result = ctx
                .store
                .with_transaction(|tx| match_source(tx, &self.matcher, hash))?;
            match result {
                Some(MatchResult::Seeded(id)) => {
                    metrics::record_entity_created(EntityKind::Track.table());
                    info!("Source {} seeded track {}", hash, id);
                }
                Some(MatchResult::Matched(id)) => info!("Source {} matched track {}", hash, id),
                Some(MatchResult::Adopted(id)) => debug!("Source {} adopted track {}", hash, id),
                None => {}
            }
            mutated |= result.is_some();
            progress.set((i + 1) as f64 * 100.0 / total as f64);
        }
        progress.finish();
        mutated |= self.place_aliases(ctx)?;
        Ok(mutated)
    }
}

impl MatchFingerprintsTask {
    fn place_aliases(&self, ctx: &TaskContext) -> Result<bool> {
        let placed = ctx.store.with_transaction(|tx| place_aliases(tx))?;
        if placed > 0 {
            info!("{}: {} records joined the track of their media", MATCH_TASK, placed);
        }
        Ok(placed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::MatcherConfig;
    use crate::store::links::append_links;
    use crate::store::records::insert_stub;
    use crate::store::sources::insert_source;
    use crate::store::{CatalogStore, LinkKind, NewSource, SourceEvidence};

    fn frames(seed: u32, len: usize) -> Vec<u32> {
        (0..len as u32)
            .map(|i| seed.wrapping_mul(2_654_435_761).wrapping_add(i.wrapping_mul(40_503)))
            .collect()
    }

    fn add_source(conn: &Connection, hash: &str, ident: &str, frames: &[u32], isrc: Option<&str>) {
        let ident: Ident = ident.parse().unwrap();
        insert_stub(conn, &ident).unwrap();
        insert_source(
            conn,
            &NewSource {
                hash: hash.to_string(),
                ident,
                bitrate: 128_000,
                width: None,
                height: None,
                duration_s: Some(200.0),
                evidence: SourceEvidence {
                    isrc: isrc.map(str::to_string),
                    foreign_song_id: None,
                },
            },
        )
        .unwrap();
        let fp = intern_fingerprint(conn, frames, 200.0).unwrap();
        attach_fingerprint(conn, hash, fp, 200.0).unwrap();
    }

    #[test]
    fn seeds_then_matches_then_vetoes() {
        let store = CatalogStore::open_in_memory().unwrap();
        let matcher = Matcher::new(MatcherConfig::default());
        let song = frames(9, 400);

        store
            .with_transaction(|tx| -> Result<()> {
                add_source(tx, "h1", "yv/a", &song, Some("JPX1"));
                add_source(tx, "h2", "yv/b", &song, None);
                add_source(tx, "h3", "yv/c", &song, Some("JPX2"));
                Ok(())
            })
            .unwrap();

        let first = store
            .with_transaction(|tx| match_source(tx, &matcher, "h1"))
            .unwrap();
        let Some(MatchResult::Seeded(track)) = first else {
            panic!("expected a new track, got {:?}", first);
        };

        let second = store
            .with_transaction(|tx| match_source(tx, &matcher, "h2"))
            .unwrap();
        assert_eq!(second, Some(MatchResult::Matched(track)));

        // identical audio, but the ISRC disagrees with h1
        let third = store
            .with_transaction(|tx| match_source(tx, &matcher, "h3"))
            .unwrap();
        assert!(matches!(third, Some(MatchResult::Seeded(id)) if id != track));

        store
            .with_conn(|conn| {
                assert_eq!(canonical_id(conn, &"yv/b".parse().unwrap())?, Some(Some(track)));
                assert!(unmatched_sources(conn)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn adopts_track_of_unified_origin() {
        let store = CatalogStore::open_in_memory().unwrap();
        let matcher = Matcher::new(MatcherConfig::default());

        let track = store
            .with_transaction(|tx| -> Result<i64> {
                add_source(tx, "h1", "sa/x", &frames(1, 300), None);
                let track = create_entity(tx, EntityKind::Track)?;
                assign_canonical_id(tx, &"sa/x".parse().unwrap(), track)?;
                Ok(track)
            })
            .unwrap();

        let result = store
            .with_transaction(|tx| match_source(tx, &matcher, "h1"))
            .unwrap();
        assert_eq!(result, Some(MatchResult::Adopted(track)));

        // already placed
        let again = store
            .with_transaction(|tx| match_source(tx, &matcher, "h1"))
            .unwrap();
        assert_eq!(again, None);
    }

    #[test]
    fn adopts_track_held_by_a_linked_upload() {
        let store = CatalogStore::open_in_memory().unwrap();
        let matcher = Matcher::new(MatcherConfig::default());

        store
            .with_transaction(|tx| -> Result<()> {
                let song: Ident = "vs/1".parse()?;
                insert_stub(tx, &song)?;
                append_links(
                    tx,
                    &song,
                    &[
                        (LinkKind::YtVideoId, "full".to_string()),
                        (LinkKind::YtVideoId, "short".to_string()),
                    ],
                )?;
                // different edits of the song, the audio does not match
                add_source(tx, "h1", "yv/full", &frames(2, 400), None);
                add_source(tx, "h2", "yv/short", &frames(3, 400), None);
                Ok(())
            })
            .unwrap();

        let first = store
            .with_transaction(|tx| match_source(tx, &matcher, "h1"))
            .unwrap();
        let Some(MatchResult::Seeded(track)) = first else {
            panic!("expected a new track, got {:?}", first);
        };
        let second = store
            .with_transaction(|tx| match_source(tx, &matcher, "h2"))
            .unwrap();
        assert_eq!(second, Some(MatchResult::Adopted(track)));
    }

    #[test]
    fn alias_records_join_the_track_of_their_media() {
        let store = CatalogStore::open_in_memory().unwrap();
        let matcher = Matcher::new(MatcherConfig::default());

        store
            .with_transaction(|tx| -> Result<()> {
                add_source(tx, "h1", "yv/orig", &frames(4, 300), None);
                let mirror: Ident = "yv/mirror".parse()?;
                insert_stub(tx, &mirror)?;
                insert_source(
                    tx,
                    &NewSource {
                        hash: "h1".to_string(),
                        ident: mirror,
                        bitrate: 128_000,
                        width: None,
                        height: None,
                        duration_s: Some(200.0),
                        evidence: SourceEvidence::default(),
                    },
                )?;
                Ok(())
            })
            .unwrap();

        // nothing placed yet, so nothing to follow
        assert_eq!(store.with_transaction(|tx| place_aliases(tx)).unwrap(), 0);

        let Some(MatchResult::Seeded(track)) = store
            .with_transaction(|tx| match_source(tx, &matcher, "h1"))
            .unwrap()
        else {
            panic!("expected a new track");
        };
        assert_eq!(store.with_transaction(|tx| place_aliases(tx)).unwrap(), 1);
        assert_eq!(store.with_transaction(|tx| place_aliases(tx)).unwrap(), 0);
        store
            .with_conn(|conn| {
                assert_eq!(canonical_id(conn, &"yv/mirror".parse::<Ident>()?)?, Some(Some(track)));
                Ok(())
            })
            .unwrap();
    }
}
