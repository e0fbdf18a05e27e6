//! Downloaded media sources and their interned fingerprints.

use super::ident::{Ident, Namespace};
use crate::backoff::SuppressionFilter;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

/// Identity evidence observed next to a source, used as a veto when matching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceEvidence {
    pub isrc: Option<String>,
    pub foreign_song_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub hash: String,
    pub ident: Ident,
    pub bitrate: i64,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_s: Option<f64>,
    pub evidence: SourceEvidence,
}

/// A source with a fingerprint attached, as the matcher sees it.
#[derive(Debug, Clone)]
pub struct FingerprintedSource {
    pub hash: String,
    pub ident: Ident,
    pub track_id: Option<i64>,
    pub duration_s: f64,
    pub frames: Vec<u32>,
    pub evidence: SourceEvidence,
}

/// A source waiting for fingerprint extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSource {
    pub hash: String,
    pub ident: Ident,
}

pub fn frames_to_blob(frames: &[u32]) -> Vec<u8> {
    frames.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_frames(blob: &[u8]) -> Vec<u32> {
    blob.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// What [`insert_source`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceInsert {
    /// New content.
    Created,
    /// The content was already stored for another record; this record now points at it.
    Aliased,
    /// Nothing new.
    Known,
}

impl SourceInsert {
    pub fn changed(&self) -> bool {
        !matches!(self, SourceInsert::Known)
    }
}

/// Stores a downloaded source and maps `source.ident` to its content hash. Content
/// that is already stored keeps its first record as `source.ident`.
pub fn insert_source(conn: &Connection, source: &NewSource) -> Result<SourceInsert> {
    let created = conn.execute(
        "INSERT OR IGNORE INTO source
            (hash, ident, bitrate, width, height, duration_s, isrc, foreign_song_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            source.hash,
            source.ident.to_string(),
            source.bitrate,
            source.width,
            source.height,
            source.duration_s,
            source.evidence.isrc,
            source.evidence.foreign_song_id,
        ],
    )?;
    let mapped = conn.execute(
        "INSERT OR IGNORE INTO source_ident (ident, hash) VALUES (?1, ?2)",
        params![source.ident.to_string(), source.hash],
    )?;
    Ok(match (created > 0, mapped > 0) {
        (true, _) => SourceInsert::Created,
        (false, true) => SourceInsert::Aliased,
        (false, false) => SourceInsert::Known,
    })
}

pub fn has_source(conn: &Connection, ident: &Ident) -> Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM source_ident WHERE ident = ?1",
            params![ident.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

/// Records that share stored content with a placed source but are not its first
/// record, paired with that source's track.
pub fn placed_aliases(conn: &Connection) -> Result<Vec<(Ident, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT si.ident, s.track_id FROM source_ident si JOIN source s ON s.hash = si.hash
         WHERE s.track_id IS NOT NULL AND si.ident != s.ident
         ORDER BY si.ident",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(ident, track)| Ok((ident.parse().with_context(|| format!("alias {}", ident))?, track)))
        .collect()
}

/// Stores a fingerprint once per distinct frame sequence and returns its id.
pub fn intern_fingerprint(conn: &Connection, frames: &[u32], duration_s: f64) -> Result<i64> {
    let blob = frames_to_blob(frames);
    let digest = format!("{:x}", Sha256::digest(&blob));
    conn.execute(
        "INSERT OR IGNORE INTO fingerprint (digest, frames, duration_s) VALUES (?1, ?2, ?3)",
        params![digest, blob, duration_s],
    )?;
    conn.query_row(
        "SELECT id FROM fingerprint WHERE digest = ?1",
        params![digest],
        |row| row.get(0),
    )
    .context("Interned fingerprint vanished")
}

pub fn attach_fingerprint(
    conn: &Connection,
    hash: &str,
    fingerprint_id: i64,
    duration_s: f64,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE source SET fingerprint_id = ?1, duration_s = ?2 WHERE hash = ?3",
        params![fingerprint_id, duration_s, hash],
    )?;
    Ok(changed > 0)
}

/// Sources with no fingerprint yet whose first record is not suppressed.
pub fn sources_without_fingerprint(
    conn: &Connection,
    filter: &SuppressionFilter,
) -> Result<Vec<PendingSource>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT s.hash, s.ident FROM source s WHERE s.fingerprint_id IS NULL AND {} ORDER BY s.hash",
        filter.sql("s.ident")
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(hash, ident)| {
            Ok(PendingSource {
                ident: ident.parse().with_context(|| format!("source {}", hash))?,
                hash,
            })
        })
        .collect()
}

/// Hashes of fingerprinted sources that are not attached to a track yet.
pub fn unmatched_sources(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT hash FROM source WHERE track_id IS NULL AND fingerprint_id IS NOT NULL ORDER BY created_at, hash",
    )?;
    let hashes = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hashes)
}

const FINGERPRINTED_SELECT: &str = "SELECT s.hash, s.ident, s.track_id, f.duration_s, f.frames, s.isrc, s.foreign_song_id
     FROM source s JOIN fingerprint f ON f.id = s.fingerprint_id";

type FingerprintedRow = (String, String, Option<i64>, f64, Vec<u8>, Option<String>, Option<String>);

fn read_fingerprinted(row: &Row<'_>) -> rusqlite::Result<FingerprintedRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn to_fingerprinted(row: FingerprintedRow) -> Result<FingerprintedSource> {
    let (hash, ident, track_id, duration_s, blob, isrc, foreign_song_id) = row;
    Ok(FingerprintedSource {
        ident: ident.parse().with_context(|| format!("source {}", hash))?,
        hash,
        track_id,
        duration_s,
        frames: blob_to_frames(&blob),
        evidence: SourceEvidence {
            isrc,
            foreign_song_id,
        },
    })
}

pub fn fingerprinted_source(conn: &Connection, hash: &str) -> Result<Option<FingerprintedSource>> {
    let row = conn
        .query_row(
            &format!("{} WHERE s.hash = ?1", FINGERPRINTED_SELECT),
            params![hash],
            read_fingerprinted,
        )
        .optional()?;
    row.map(to_fingerprinted).transpose()
}

/// Track-assigned sources whose duration lies within `tolerance_s` of `duration_s`.
pub fn assigned_sources_near(
    conn: &Connection,
    duration_s: f64,
    tolerance_s: f64,
    exclude_hash: &str,
) -> Result<Vec<FingerprintedSource>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{} WHERE s.track_id IS NOT NULL AND s.hash != ?1
           AND f.duration_s BETWEEN ?2 AND ?3",
        FINGERPRINTED_SELECT
    ))?;
    let rows = stmt
        .query_map(
            params![exclude_hash, duration_s - tolerance_s, duration_s + tolerance_s],
            read_fingerprinted,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(to_fingerprinted).collect()
}

/// Every fingerprinted source attached to `track_id`.
pub fn track_sources(conn: &Connection, track_id: i64) -> Result<Vec<FingerprintedSource>> {
    let mut stmt = conn.prepare_cached(&format!(
        "{} WHERE s.track_id = ?1 ORDER BY s.hash",
        FINGERPRINTED_SELECT
    ))?;
    let rows = stmt
        .query_map(params![track_id], read_fingerprinted)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(to_fingerprinted).collect()
}

/// Records of `ns` with no downloaded source yet, excluding suppressed ones.
pub fn records_without_source(
    conn: &Connection,
    ns: Namespace,
    filter: &SuppressionFilter,
) -> Result<Vec<Ident>> {
    let ident_expr = format!("'{}/' || t.id", ns.tag());
    let mut stmt = conn.prepare(&format!(
        "SELECT t.id FROM {table} t
         WHERE NOT EXISTS (SELECT 1 FROM source_ident si WHERE si.ident = {expr}) AND {filter}
         ORDER BY t.id",
        table = ns.table(),
        expr = ident_expr,
        filter = filter.sql(&ident_expr)
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| Ident::new(ns, id)).collect())
}

pub fn set_source_track(conn: &Connection, hash: &str, track_id: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE source SET track_id = ?1 WHERE hash = ?2 AND track_id IS NULL",
        params![track_id, hash],
    )?;
    Ok(changed > 0)
}
