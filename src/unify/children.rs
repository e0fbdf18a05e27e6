//! Reconciliation of child relations (credits, track listings) across the member
//! records of one canonical entity.

use crate::store::records::{assigned_entities, canonical_id, members_of};
use crate::store::{EntityKind, Namespace};
use anyhow::Result;
use rusqlite::{params, Connection};
use std::collections::VecDeque;

/// Credit sources, most trusted first.
const ARTIST_PRIORITY: [Namespace; 3] = [
    Namespace::SpotifyTrack,
    Namespace::VocadbSong,
    Namespace::YoutubeVideo,
];

/// Reconciles children for every assigned entity of `kind`. Returns true if a row
/// was added.
pub fn reconcile(conn: &Connection, kind: EntityKind) -> Result<bool> {
    let mut changed = false;
    match kind {
        EntityKind::Track => {
            for track_id in assigned_entities(conn, kind)? {
                changed |= reconcile_track_artists(conn, track_id)?;
            }
        }
        EntityKind::Album => {
            for album_id in assigned_entities(conn, kind)? {
                changed |= reconcile_album_tracks(conn, album_id)?;
            }
        }
        EntityKind::Artist => {}
    }
    Ok(changed)
}

/// Merges the artist credits of every member record into `track_artist`.
///
/// Lists are interleaved in priority order, one artist from each source at a time,
/// so every source's lead artist comes before anyone's featured artists. Credits that
/// do not resolve to a canonical artist yet are left for a later round.
pub fn reconcile_track_artists(conn: &Connection, track_id: i64) -> Result<bool> {
    let mut members = members_of(conn, EntityKind::Track, track_id)?;
    members.sort_by_key(|(ident, _)| {
        ARTIST_PRIORITY
            .iter()
            .position(|ns| *ns == ident.namespace())
            .unwrap_or(ARTIST_PRIORITY.len())
    });

    let mut lists: Vec<VecDeque<i64>> = Vec::new();
    for (_, meta) in &members {
        let mut resolved = VecDeque::new();
        for artist in &meta.artists {
            if let Some(Some(artist_id)) = canonical_id(conn, artist)? {
                resolved.push_back(artist_id);
            }
        }
        if !resolved.is_empty() {
            lists.push(resolved);
        }
    }

    let mut listing: Vec<i64> = Vec::new();
    while !lists.is_empty() {
        for list in lists.iter_mut() {
            if let Some(artist_id) = list.pop_front() {
                if !listing.contains(&artist_id) {
                    listing.push(artist_id);
                }
            }
        }
        lists.retain(|l| !l.is_empty());
    }

    let mut existing: i64 = conn.query_row(
        "SELECT count(*) FROM track_artist WHERE track_id = ?1",
        params![track_id],
        |row| row.get(0),
    )?;
    let mut insert = conn.prepare_cached(
        "INSERT OR IGNORE INTO track_artist (track_id, artist_id, position) VALUES (?1, ?2, ?3)",
    )?;
    let mut changed = false;
    for artist_id in listing {
        if insert.execute(params![track_id, artist_id, existing])? > 0 {
            existing += 1;
            changed = true;
        }
    }
    Ok(changed)
}

/// Copies every member record's track listing into `album_track`.
///
/// Sources that disagree on a position each keep their own row.
pub fn reconcile_album_tracks(conn: &Connection, album_id: i64) -> Result<bool> {
    let members = members_of(conn, EntityKind::Album, album_id)?;
    let mut insert = conn.prepare_cached(
        "INSERT OR IGNORE INTO album_track (album_id, track_id, disc, position) VALUES (?1, ?2, ?3, ?4)",
    )?;
    let mut changed = false;
    for (_, meta) in members {
        for entry in meta.tracks {
            let Some(Some(track_id)) = canonical_id(conn, &entry.track)? else {
                continue;
            };
            if insert.execute(params![album_id, track_id, entry.disc, entry.position])? > 0 {
                changed = true;
            }
        }
    }
    Ok(changed)
}
