use super::schema::CATALOG_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// SQLite-backed catalog: per-source records, canonical entities, links, locale
/// text, backoff records and media sources all live in one database file.
///
/// The connection is shared with the [`crate::backoff::BackoffLedger`] so that
/// candidate queries can filter on backoff rows directly. The mutex is held only for
/// the duration of a synchronous call, never across an `.await`.
#[derive(Clone)]
pub struct CatalogStore {
    conn: Arc<Mutex<Connection>>,
}

impl CatalogStore {
    /// Opens an existing catalog database or creates a new one with the current schema.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open(&db_path)
                .with_context(|| format!("Failed to open catalog db {:?}", db_path.as_ref()))?
        } else {
            let conn = Connection::open(&db_path)?;
            CATALOG_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new catalog database at {:?}", db_path.as_ref());
            conn
        };
        Self::from_connection(conn)
    }

    /// Fresh in-memory catalog, mostly useful for tests and dry runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        CATALOG_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        // WAL reports the new mode back as a row, so this can't go through execute()
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        conn.execute("PRAGMA synchronous = NORMAL;", [])?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Catalog database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;
        if version >= CATALOG_VERSIONED_SCHEMAS.len() {
            bail!(
                "Catalog database version {} is too new (max supported: {})",
                version,
                CATALOG_VERSIONED_SCHEMAS.len() - 1
            );
        }

        CATALOG_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;
        Self::migrate_if_needed(&conn, version)?;

        Ok(CatalogStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, version: usize) -> Result<()> {
        for schema in CATALOG_VERSIONED_SCHEMAS.iter().skip(version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running catalog migration to version {}", schema.version);
                migration_fn(conn)?;
            }
            conn.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + schema.version),
                [],
            )?;
        }
        Ok(())
    }

    pub(crate) fn shared_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // open transactions roll back on drop, so a poisoned lock holds no partial write
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `f` against the connection without a transaction.
    pub fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn)
    }

    /// Runs `f` inside one transaction. The transaction commits only if `f` returns
    /// `Ok`; any error rolls every statement back.
    pub fn with_transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_then_reopens_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.db");

        {
            let store = CatalogStore::open(&path).unwrap();
            store
                .with_conn(|conn| {
                    conn.execute("INSERT INTO youtube_video (id) VALUES ('a')", [])?;
                    Ok(())
                })
                .unwrap();
        }

        let store = CatalogStore::open(&path).unwrap();
        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT count(*) FROM youtube_video", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rejects_foreign_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("CREATE TABLE x (id INTEGER)", []).unwrap();
        }
        assert!(CatalogStore::open(&path).is_err());
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = CatalogStore::open_in_memory().unwrap();
        let result: Result<(), anyhow::Error> = store.with_transaction(|tx| {
            tx.execute("INSERT INTO artist DEFAULT VALUES", [])?;
            bail!("boom")
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| Ok(conn.query_row("SELECT count(*) FROM artist", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
