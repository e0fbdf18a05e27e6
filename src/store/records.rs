//! Per-source record and canonical entity queries.
//!
//! These take a plain `&Connection` so they compose inside
//! [`super::CatalogStore::with_transaction`].

use super::ident::{EntityKind, Ident, Namespace};
use crate::backoff::SuppressionFilter;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Source metadata kept on a per-source record as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isrc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_s: Option<f64>,
    /// Credited artists, in the source's own order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artists: Vec<Ident>,
    /// Track listing for album records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tracks: Vec<AlbumTrackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumTrackEntry {
    pub disc: u32,
    pub position: u32,
    pub track: Ident,
}

fn parse_meta(raw: Option<String>) -> Result<RecordMeta> {
    match raw {
        Some(json) => serde_json::from_str(&json).context("Malformed record meta"),
        None => Ok(RecordMeta::default()),
    }
}

/// Inserts an empty row for `ident` if none exists. Returns true if a row was created.
pub fn insert_stub(conn: &Connection, ident: &Ident) -> Result<bool> {
    let changed = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO {} (id) VALUES (?1)",
            ident.namespace().table()
        ),
        params![ident.id()],
    )?;
    Ok(changed > 0)
}

pub fn record_exists(conn: &Connection, ident: &Ident) -> Result<bool> {
    Ok(conn
        .query_row(
            &format!("SELECT 1 FROM {} WHERE id = ?1", ident.namespace().table()),
            params![ident.id()],
            |_| Ok(()),
        )
        .optional()?
        .is_some())
}

pub fn delete_record(conn: &Connection, ident: &Ident) -> Result<bool> {
    let changed = conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", ident.namespace().table()),
        params![ident.id()],
    )?;
    Ok(changed > 0)
}

/// Canonical id of a record. The outer `None` means the row does not exist.
pub fn canonical_id(conn: &Connection, ident: &Ident) -> Result<Option<Option<i64>>> {
    let ns = ident.namespace();
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?1",
                ns.entity().id_column(),
                ns.table()
            ),
            params![ident.id()],
            |row| row.get::<_, Option<i64>>(0),
        )
        .optional()?)
}

/// Points a record at a canonical entity. Never overwrites an existing id; returns
/// false when the row is missing or already assigned.
pub fn assign_canonical_id(conn: &Connection, ident: &Ident, entity_id: i64) -> Result<bool> {
    let ns = ident.namespace();
    let column = ns.entity().id_column();
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET {column} = ?1 WHERE id = ?2 AND {column} IS NULL",
            ns.table()
        ),
        params![entity_id, ident.id()],
    )?;
    Ok(changed > 0)
}

pub fn create_entity(conn: &Connection, kind: EntityKind) -> Result<i64> {
    conn.execute(&format!("INSERT INTO {} DEFAULT VALUES", kind.table()), [])?;
    Ok(conn.last_insert_rowid())
}

pub fn entity_count(conn: &Connection, kind: EntityKind) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT count(*) FROM {}", kind.table()), [], |row| {
        row.get(0)
    })?)
}

/// Records of `ns` that do not point at a canonical entity yet.
pub fn unassigned(conn: &Connection, ns: Namespace) -> Result<Vec<Ident>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {} WHERE {} IS NULL ORDER BY id",
        ns.table(),
        ns.entity().id_column()
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| Ident::new(ns, id)).collect())
}

/// Records of `ns` whose metadata has not been fetched, excluding suppressed ones.
pub fn missing_meta(
    conn: &Connection,
    ns: Namespace,
    filter: &SuppressionFilter,
) -> Result<Vec<Ident>> {
    let ident_expr = format!("'{}/' || t.id", ns.tag());
    let mut stmt = conn.prepare(&format!(
        "SELECT t.id FROM {} t WHERE t.name IS NULL AND {} ORDER BY t.id",
        ns.table(),
        filter.sql(&ident_expr)
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids.into_iter().map(|id| Ident::new(ns, id)).collect())
}

pub fn update_record(
    conn: &Connection,
    ident: &Ident,
    name: &str,
    meta: &RecordMeta,
) -> Result<bool> {
    let changed = conn.execute(
        &format!(
            "UPDATE {} SET name = ?1, meta = ?2 WHERE id = ?3",
            ident.namespace().table()
        ),
        params![name, serde_json::to_string(meta)?, ident.id()],
    )?;
    Ok(changed > 0)
}

pub fn record_meta(conn: &Connection, ident: &Ident) -> Result<Option<RecordMeta>> {
    let raw = conn
        .query_row(
            &format!("SELECT meta FROM {} WHERE id = ?1", ident.namespace().table()),
            params![ident.id()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?;
    raw.map(parse_meta).transpose()
}

pub fn record_name(conn: &Connection, ident: &Ident) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            &format!("SELECT name FROM {} WHERE id = ?1", ident.namespace().table()),
            params![ident.id()],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten())
}

/// Every record across namespaces that points at canonical entity `entity_id`.
pub fn members_of(
    conn: &Connection,
    kind: EntityKind,
    entity_id: i64,
) -> Result<Vec<(Ident, RecordMeta)>> {
    let mut members = Vec::new();
    for ns in Namespace::for_entity(kind) {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, meta FROM {} WHERE {} = ?1 ORDER BY id",
            ns.table(),
            kind.id_column()
        ))?;
        let rows = stmt
            .query_map(params![entity_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (id, meta) in rows {
            members.push((Ident::new(ns, id), parse_meta(meta)?));
        }
    }
    Ok(members)
}

/// Canonical ids that at least one member record of `kind` points at.
pub fn assigned_entities(conn: &Connection, kind: EntityKind) -> Result<Vec<i64>> {
    let selects: Vec<String> = Namespace::for_entity(kind)
        .into_iter()
        .map(|ns| {
            format!(
                "SELECT {col} FROM {} WHERE {col} IS NOT NULL",
                ns.table(),
                col = kind.id_column()
            )
        })
        .collect();
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT {} FROM ({}) ORDER BY 1",
        kind.id_column(),
        selects.join(" UNION ")
    ))?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Idents named inside record metadata: credited artists and album track listings.
pub fn referenced_idents(conn: &Connection) -> Result<BTreeSet<Ident>> {
    let mut out = BTreeSet::new();
    for ns in Namespace::all() {
        let mut stmt = conn.prepare(&format!(
            "SELECT meta FROM {} WHERE meta IS NOT NULL",
            ns.table()
        ))?;
        let metas = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for raw in metas {
            let meta = parse_meta(Some(raw))?;
            out.extend(meta.artists);
            out.extend(meta.tracks.into_iter().map(|t| t.track));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CatalogStore;

    fn ident(s: &str) -> Ident {
        s.parse().unwrap()
    }

    #[test]
    fn stub_insert_is_idempotent() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                assert!(insert_stub(conn, &ident("yv/a"))?);
                assert!(!insert_stub(conn, &ident("yv/a"))?);
                assert!(record_exists(conn, &ident("yv/a"))?);
                assert!(!record_exists(conn, &ident("sa/a"))?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn canonical_id_is_never_reassigned() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let a = ident("sr/x");
                assert_eq!(canonical_id(conn, &a)?, None);
                insert_stub(conn, &a)?;
                assert_eq!(canonical_id(conn, &a)?, Some(None));

                let first = create_entity(conn, EntityKind::Artist)?;
                let second = create_entity(conn, EntityKind::Artist)?;
                assert!(assign_canonical_id(conn, &a, first)?);
                assert!(!assign_canonical_id(conn, &a, second)?);
                assert_eq!(canonical_id(conn, &a)?, Some(Some(first)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn meta_round_trips_and_members_are_collected() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let video = ident("yv/v1");
                let song = ident("vs/1");
                insert_stub(conn, &video)?;
                insert_stub(conn, &song)?;
                let meta = RecordMeta {
                    isrc: Some("JPX000000001".to_string()),
                    artists: vec![ident("yc/chan")],
                    ..Default::default()
                };
                update_record(conn, &video, "Song", &meta)?;
                assert_eq!(record_meta(conn, &video)?, Some(meta.clone()));
                assert_eq!(record_name(conn, &video)?, Some("Song".to_string()));

                let track = create_entity(conn, EntityKind::Track)?;
                assign_canonical_id(conn, &video, track)?;
                assign_canonical_id(conn, &song, track)?;
                let members = members_of(conn, EntityKind::Track, track)?;
                assert_eq!(members.len(), 2);
                assert_eq!(assigned_entities(conn, EntityKind::Track)?, vec![track]);
                assert_eq!(unassigned(conn, Namespace::YoutubeVideo)?, vec![]);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn referenced_idents_come_from_meta() {
        let store = CatalogStore::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                let album = ident("sb/al");
                insert_stub(conn, &album)?;
                let meta = RecordMeta {
                    artists: vec![ident("sr/ar")],
                    tracks: vec![AlbumTrackEntry {
                        disc: 1,
                        position: 1,
                        track: ident("sa/t1"),
                    }],
                    ..Default::default()
                };
                update_record(conn, &album, "Album", &meta)?;
                let refs: Vec<_> = referenced_idents(conn)?.into_iter().collect();
                assert_eq!(refs, vec![ident("sa/t1"), ident("sr/ar")]);
                Ok(())
            })
            .unwrap();
    }
}
