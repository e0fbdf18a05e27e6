//! Frame scoring and the track matching rules built on it.

use crate::store::sources::{assigned_sources_near, track_sources};
use crate::store::{FingerprintedSource, SourceEvidence};
use anyhow::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Matching thresholds. All of them can be overridden from the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum score for a fingerprinted source to be considered a candidate.
    pub candidate_threshold: f64,
    /// Minimum score against every source already on the candidate's track.
    pub group_threshold: f64,
    /// Maximum duration difference, in seconds.
    pub duration_tolerance_s: f64,
    /// Minimum aligned overlap, in seconds, for a score to count at all.
    pub min_overlap_s: f64,
    /// Fingerprint frame rate.
    pub frames_per_second: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            candidate_threshold: 0.75,
            group_threshold: 0.40,
            duration_tolerance_s: 7.0,
            min_overlap_s: 10.0,
            frames_per_second: 7.8,
        }
    }
}

impl MatcherConfig {
    pub fn min_frames(&self) -> usize {
        (self.min_overlap_s * self.frames_per_second).round().max(1.0) as usize
    }

    fn duration_close(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.duration_tolerance_s
    }
}

/// Similarity of two frame sequences aligned at offset 0, in `0.0..=1.0`.
///
/// Returns 0 when the overlap is shorter than `min_frames`.
pub fn score(a: &[u32], b: &[u32], min_frames: usize) -> f64 {
    let overlap = a.len().min(b.len());
    if overlap == 0 || overlap < min_frames {
        return 0.0;
    }
    let differing: u64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x ^ y).count_ones() as u64)
        .sum();
    1.0 - differing as f64 / (overlap as f64 * 32.0)
}

/// Evidence vetoes a match only when both sides carry a value and the values differ.
pub fn evidence_compatible(a: &SourceEvidence, b: &SourceEvidence) -> bool {
    fn agree(x: &Option<String>, y: &Option<String>) -> bool {
        match (x, y) {
            (Some(x), Some(y)) => x == y,
            _ => true,
        }
    }
    agree(&a.isrc, &b.isrc) && agree(&a.foreign_song_id, &b.foreign_song_id)
}

pub struct Matcher {
    config: MatcherConfig,
}

impl Matcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    /// Finds the track `source` belongs to among tracks that already have sources.
    ///
    /// Candidates are tried best score first; each distinct track is tried once.
    pub fn find_track(&self, conn: &Connection, source: &FingerprintedSource) -> Result<Option<i64>> {
        let min_frames = self.config.min_frames();
        let mut candidates: Vec<(f64, i64)> = assigned_sources_near(
            conn,
            source.duration_s,
            self.config.duration_tolerance_s,
            &source.hash,
        )?
        .into_iter()
        .filter_map(|candidate| {
            let track_id = candidate.track_id?;
            let s = score(&source.frames, &candidate.frames, min_frames);
            (s > self.config.candidate_threshold).then_some((s, track_id))
        })
        .collect();
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let mut tried = BTreeSet::new();
        for (candidate_score, track_id) in candidates {
            if !tried.insert(track_id) {
                continue;
            }
            let group = track_sources(conn, track_id)?;
            if self.fits_group(source, &group, min_frames) {
                debug!(
                    "Source {} matches track {} (score {:.3})",
                    source.hash, track_id, candidate_score
                );
                return Ok(Some(track_id));
            }
        }
        Ok(None)
    }

    /// Group check: `source` must be compatible with every source already on the track.
    pub fn fits_group(
        &self,
        source: &FingerprintedSource,
        group: &[FingerprintedSource],
        min_frames: usize,
    ) -> bool {
        group.iter().all(|member| {
            if !evidence_compatible(&source.evidence, &member.evidence) {
                debug!("Source {} vetoed by evidence of {}", source.hash, member.hash);
                return false;
            }
            self.config.duration_close(source.duration_s, member.duration_s)
                && score(&source.frames, &member.frames, min_frames) > self.config.group_threshold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(seed: u32, len: usize) -> Vec<u32> {
        (0..len as u32)
            .map(|i| seed.wrapping_mul(2_654_435_761).wrapping_add(i.wrapping_mul(40_503)))
            .collect()
    }

    fn source(hash: &str, frames: Vec<u32>, duration_s: f64) -> FingerprintedSource {
        FingerprintedSource {
            hash: hash.to_string(),
            ident: "yv/x".parse().unwrap(),
            track_id: None,
            duration_s,
            frames,
            evidence: SourceEvidence::default(),
        }
    }

    #[test]
    fn default_min_frames() {
        assert_eq!(MatcherConfig::default().min_frames(), 78);
    }

    #[test]
    fn identical_frames_score_one() {
        let a = frames(1, 200);
        assert_eq!(score(&a, &a, 78), 1.0);
    }

    #[test]
    fn inverted_frames_score_zero() {
        let a = frames(1, 100);
        let b: Vec<u32> = a.iter().map(|f| !f).collect();
        assert_eq!(score(&a, &b, 78), 0.0);
    }

    #[test]
    fn short_overlap_scores_zero() {
        let a = frames(1, 77);
        let b = frames(1, 500);
        assert_eq!(score(&a, &b, 78), 0.0);
        assert_eq!(score(&[], &[], 0), 0.0);
    }

    #[test]
    fn score_counts_bit_errors_over_overlap() {
        let a = vec![0u32; 100];
        let mut b = vec![0u32; 120];
        // 8 bits wrong in total across 100 frames of overlap
        b[0] = 0xff;
        assert!((score(&a, &b, 78) - (1.0 - 8.0 / 3200.0)).abs() < 1e-12);
    }

    #[test]
    fn evidence_vetoes_only_on_disagreement() {
        let isrc = |v: Option<&str>| SourceEvidence {
            isrc: v.map(str::to_string),
            foreign_song_id: None,
        };
        assert!(evidence_compatible(&isrc(None), &isrc(Some("A"))));
        assert!(evidence_compatible(&isrc(Some("A")), &isrc(Some("A"))));
        assert!(!evidence_compatible(&isrc(Some("A")), &isrc(Some("B"))));
    }

    #[test]
    fn group_check_uses_duration_and_lower_threshold() {
        let matcher = Matcher::new(MatcherConfig::default());
        let base = frames(3, 300);
        let mut noisy = base.clone();
        // flip half the bits of the first half: score 0.75
        for f in noisy.iter_mut().take(150) {
            *f ^= 0x0000_ffff;
        }
        let candidate = source("new", base.clone(), 200.0);

        let group = vec![source("m1", noisy.clone(), 203.0)];
        assert!(matcher.fits_group(&candidate, &group, 78));

        let far = vec![source("m2", noisy, 210.0)];
        assert!(!matcher.fits_group(&candidate, &far, 78));

        let unrelated = vec![source("m3", base.iter().map(|f| !f).collect(), 200.0)];
        assert!(!matcher.fits_group(&candidate, &unrelated, 78));
    }

    #[test]
    fn perfect_score_outside_duration_window_is_no_candidate() {
        use crate::store::records::create_entity;
        use crate::store::sources::{attach_fingerprint, insert_source, intern_fingerprint, set_source_track};
        use crate::store::{CatalogStore, EntityKind, NewSource};

        let store = CatalogStore::open_in_memory().unwrap();
        let matcher = Matcher::new(MatcherConfig::default());
        let song = frames(5, 300);

        let track = store
            .with_conn(|conn| {
                let track = create_entity(conn, EntityKind::Track)?;
                insert_source(
                    conn,
                    &NewSource {
                        hash: "placed".to_string(),
                        ident: "yv/placed".parse()?,
                        bitrate: 128_000,
                        width: None,
                        height: None,
                        duration_s: Some(200.0),
                        evidence: SourceEvidence::default(),
                    },
                )?;
                let fp = intern_fingerprint(conn, &song, 200.0)?;
                attach_fingerprint(conn, "placed", fp, 200.0)?;
                set_source_track(conn, "placed", track)?;
                Ok(track)
            })
            .unwrap();

        store
            .with_conn(|conn| {
                let near = source("near", song.clone(), 206.5);
                assert_eq!(matcher.find_track(conn, &near)?, Some(track));
                let far = source("far", song.clone(), 207.5);
                assert_eq!(matcher.find_track(conn, &far)?, None);
                Ok(())
            })
            .unwrap();
    }
}
