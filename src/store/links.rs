use super::ident::Ident;
use super::link::{Link, LinkKind};
use crate::backoff::SuppressionFilter;
use anyhow::Result;
use rusqlite::{params, Connection, Row};
use tracing::warn;

/// Appends links from `ident`. Already known `(ident, kind, data)` triples are
/// ignored; returns how many rows were new.
pub fn append_links(conn: &Connection, ident: &Ident, links: &[(LinkKind, String)]) -> Result<usize> {
    let mut stmt =
        conn.prepare_cached("INSERT OR IGNORE INTO link (ident, kind, data) VALUES (?1, ?2, ?3)")?;
    let mut inserted = 0;
    for (kind, data) in links {
        inserted += stmt.execute(params![ident.to_string(), kind.as_str(), data])?;
    }
    Ok(inserted)
}

fn read_link(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

// rows written by other tooling may carry idents or kinds we don't know; skip them
fn parse_links(rows: Vec<(i64, String, String, String)>) -> Vec<Link> {
    rows.into_iter()
        .filter_map(|(id, ident, kind, data)| {
            match (ident.parse::<Ident>(), kind.parse::<LinkKind>()) {
                (Ok(ident), Ok(kind)) => Some(Link {
                    id,
                    ident,
                    kind,
                    data,
                }),
                _ => {
                    warn!("Skipping unreadable link row {} ({} {})", id, ident, kind);
                    None
                }
            }
        })
        .collect()
}

/// Outgoing links of `ident`.
pub fn links_from(conn: &Connection, ident: &Ident) -> Result<Vec<Link>> {
    let mut stmt = conn
        .prepare_cached("SELECT id, ident, kind, data FROM link WHERE ident = ?1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![ident.to_string()], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parse_links(rows))
}

/// Origins of every link `(kind, data)`.
pub fn origins_of(conn: &Connection, kind: LinkKind, data: &str) -> Result<Vec<Ident>> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, ident, kind, data FROM link WHERE kind = ?1 AND data = ?2 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![kind.as_str(), data], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parse_links(rows).into_iter().map(|l| l.ident).collect())
}

/// Links still waiting for classification whose origin is not suppressed.
pub fn unknown_links(conn: &Connection, filter: &SuppressionFilter) -> Result<Vec<Link>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT l.id, l.ident, l.kind, l.data FROM link l WHERE l.kind = ?1 AND {} ORDER BY l.id",
        filter.sql("l.ident")
    ))?;
    let rows = stmt
        .query_map(params![LinkKind::Unknown.as_str()], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parse_links(rows))
}

/// Rewrites an `unknown` link as `(kind, data)`. If the classified link already
/// exists the unknown row is simply dropped.
pub fn reclassify(conn: &Connection, link: &Link, kind: LinkKind, data: &str) -> Result<bool> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO link (ident, kind, data) VALUES (?1, ?2, ?3)",
        params![link.ident.to_string(), kind.as_str(), data],
    )?;
    conn.execute("DELETE FROM link WHERE id = ?1", params![link.id])?;
    Ok(inserted > 0)
}

/// Links of `kind` whose page was never read and whose origin is not suppressed.
pub fn unexpanded_links(conn: &Connection, kind: LinkKind, filter: &SuppressionFilter) -> Result<Vec<Link>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT l.id, l.ident, l.kind, l.data FROM link l
         WHERE l.kind = ?1
           AND NOT EXISTS (SELECT 1 FROM link_expansion e WHERE e.link_id = l.id)
           AND {}
         ORDER BY l.id",
        filter.sql("l.ident")
    ))?;
    let rows = stmt
        .query_map(params![kind.as_str()], read_link)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(parse_links(rows))
}

/// Stores the URLs found behind `link` as `unknown` links of its origin and marks
/// the link expanded. Returns how many links were new.
pub fn record_expansion(conn: &Connection, link: &Link, urls: &[String]) -> Result<usize> {
    let derived: Vec<(LinkKind, String)> = urls
        .iter()
        .map(|url| (LinkKind::Unknown, url.clone()))
        .collect();
    let added = append_links(conn, &link.ident, &derived)?;
    conn.execute(
        "INSERT OR REPLACE INTO link_expansion (link_id, derived) VALUES (?1, ?2)",
        params![link.id, urls.len() as i64],
    )?;
    Ok(added)
}

/// Distinct idents addressed by links into catalogs we keep records for.
pub fn link_targets(conn: &Connection) -> Result<Vec<Ident>> {
    let kinds: Vec<String> = LinkKind::all()
        .iter()
        .filter(|k| k.target_namespace().is_some())
        .map(|k| format!("'{}'", k.as_str()))
        .collect();
    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT kind, data FROM link WHERE kind IN ({}) ORDER BY kind, data",
        kinds.join(", ")
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(kind, data)| kind.parse::<LinkKind>().ok()?.target_ident(&data))
        .collect())
}
