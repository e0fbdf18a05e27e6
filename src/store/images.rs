//! Images attached to records: cover and profile art, first known by URL and later
//! by content hash once downloaded.

use super::ident::Ident;
use crate::backoff::SuppressionFilter;
use anyhow::{bail, Result};
use rusqlite::{params, Connection};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    CoverArt,
    ProfileArt,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::CoverArt => "cover_art",
            ImageKind::ProfileArt => "profile_art",
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cover_art" => Ok(ImageKind::CoverArt),
            "profile_art" => Ok(ImageKind::ProfileArt),
            other => bail!("unknown image kind '{}'", other),
        }
    }
}

/// An image as a fetcher reports it. Dimensions are optional, many upstream APIs
/// only give a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub kind: ImageKind,
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl ImageRef {
    pub fn url(kind: ImageKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            width: None,
            height: None,
        }
    }
}

/// An image row that still has to be downloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingImage {
    pub id: i64,
    pub ident: Ident,
    pub url: String,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// A stored image of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub kind: ImageKind,
    pub url: String,
    pub hash: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Appends image URLs to `ident`. A URL already known for the record is ignored;
/// returns how many rows were new.
pub fn append_images(conn: &Connection, ident: &Ident, images: &[ImageRef]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO image (ident, kind, url, width, height) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    let mut inserted = 0;
    for image in images {
        inserted += stmt.execute(params![
            ident.to_string(),
            image.kind.as_str(),
            image.url,
            image.width,
            image.height
        ])?;
    }
    Ok(inserted)
}

/// Images without a hash whose record is not suppressed.
pub fn pending_images(conn: &Connection, filter: &SuppressionFilter) -> Result<Vec<PendingImage>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT i.id, i.ident, i.url, i.width, i.height FROM image i
         WHERE i.hash IS NULL AND {} ORDER BY i.id",
        filter.sql("i.ident")
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, ident, url, width, height)| match ident.parse() {
            Ok(ident) => Some(PendingImage {
                id,
                ident,
                url,
                width,
                height,
            }),
            Err(_) => {
                warn!("Skipping image {} with unreadable ident {}", id, ident);
                None
            }
        })
        .collect())
}

pub fn set_image_hash(conn: &Connection, id: i64, hash: &str, width: i64, height: i64) -> Result<()> {
    conn.execute(
        "UPDATE image SET hash = ?2, width = ?3, height = ?4 WHERE id = ?1",
        params![id, hash, width, height],
    )?;
    Ok(())
}

pub fn delete_image(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("DELETE FROM image WHERE id = ?1", params![id])?;
    Ok(())
}

pub fn images_of(conn: &Connection, ident: &Ident) -> Result<Vec<StoredImage>> {
    let mut stmt = conn.prepare_cached(
        "SELECT kind, url, hash, width, height FROM image WHERE ident = ?1 ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![ident.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter()
        .map(|(kind, url, hash, width, height)| {
            Ok(StoredImage {
                kind: kind.parse()?,
                url,
                hash,
                width,
                height,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::{BackoffLedger, BackoffPolicy, ManualClock};
    use crate::store::CatalogStore;
    use std::sync::Arc;

    fn ident(s: &str) -> Ident {
        s.parse().unwrap()
    }

    #[test]
    fn urls_are_appended_once_and_resolved_in_place() {
        let store = CatalogStore::open_in_memory().unwrap();
        let ledger = BackoffLedger::new(&store, Arc::new(ManualClock::new(0)));
        let cover = ImageRef::url(ImageKind::CoverArt, "https://img.example/a.jpg");

        store
            .with_conn(|conn| {
                assert_eq!(append_images(conn, &ident("sa/x"), &[cover.clone()])?, 1);
                assert_eq!(append_images(conn, &ident("sa/x"), &[cover.clone()])?, 0);
                // the same URL on another record is its own row
                assert_eq!(append_images(conn, &ident("sb/y"), &[cover.clone()])?, 1);
                Ok(())
            })
            .unwrap();

        let pending = store
            .with_conn(|conn| pending_images(conn, &ledger.filter("images")))
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].width, None);

        store
            .with_conn(|conn| {
                set_image_hash(conn, pending[0].id, "ab12", 640, 480)?;
                delete_image(conn, pending[1].id)?;
                let stored = images_of(conn, &ident("sa/x"))?;
                assert_eq!(stored.len(), 1);
                assert_eq!(stored[0].hash.as_deref(), Some("ab12"));
                assert_eq!((stored[0].width, stored[0].height), (Some(640), Some(480)));
                assert!(images_of(conn, &ident("sb/y"))?.is_empty());
                Ok(())
            })
            .unwrap();
        assert!(store
            .with_conn(|conn| pending_images(conn, &ledger.filter("images")))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn suppressed_records_are_not_pending() {
        let store = CatalogStore::open_in_memory().unwrap();
        let ledger = BackoffLedger::new(&store, Arc::new(ManualClock::new(0)));
        store
            .with_conn(|conn| {
                append_images(
                    conn,
                    &ident("vr/1"),
                    &[ImageRef::url(ImageKind::ProfileArt, "https://img.example/p.png")],
                )
            })
            .unwrap();
        ledger.record("vr/1", "images", BackoffPolicy::Forever).unwrap();
        assert!(store
            .with_conn(|conn| pending_images(conn, &ledger.filter("images")))
            .unwrap()
            .is_empty());
    }
}
