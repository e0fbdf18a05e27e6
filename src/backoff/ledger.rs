use super::clock::Clock;
use super::policy::BackoffPolicy;
use crate::metrics;
use crate::store::CatalogStore;
use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Fixed-width ledger key for a task name: the first eight bytes of its SHA-256.
pub fn task_key(task: &str) -> i64 {
    let digest = Sha256::digest(task.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

/// SQL predicate selecting rows that are *not* suppressed for one task at one instant.
///
/// Built from the same rule as [`BackoffLedger::suppressed`], so a candidate query
/// filtered through it never yields a suppressed row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuppressionFilter {
    task_key: i64,
    now: i64,
}

impl SuppressionFilter {
    pub fn new(task: &str, now: i64) -> Self {
        Self {
            task_key: task_key(task),
            now,
        }
    }

    /// `ident_expr` is the SQL expression producing the row's ident string.
    pub fn sql(&self, ident_expr: &str) -> String {
        // both values are integers we computed, never user input
        format!(
            "NOT EXISTS (SELECT 1 FROM backoff b WHERE b.ident = {} AND b.task = {} AND (b.expire IS NULL OR b.expire > {}))",
            ident_expr, self.task_key, self.now
        )
    }
}

/// Per-(ident, task) suppression records.
///
/// Shares the catalog connection so suppression composes with candidate queries.
#[derive(Clone)]
pub struct BackoffLedger {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<dyn Clock>,
}

impl BackoffLedger {
    pub fn new(store: &CatalogStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            conn: store.shared_connection(),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn filter(&self, task: &str) -> SuppressionFilter {
        SuppressionFilter::new(task, self.clock.now_ms())
    }

    pub fn suppressed(&self, ident: &str, task: &str) -> Result<bool> {
        let conn = self.lock();
        let expire: Option<Option<i64>> = conn
            .query_row(
                "SELECT expire FROM backoff WHERE ident = ?1 AND task = ?2",
                params![ident, task_key(task)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(match expire {
            None => false,
            Some(None) => true,
            Some(Some(expire)) => expire > self.clock.now_ms(),
        })
    }

    pub fn record(&self, ident: &str, task: &str, policy: BackoffPolicy) -> Result<()> {
        let key = task_key(task);
        let now = self.clock.now_ms();
        let conn = self.lock();

        let previous: Option<(i64, Option<i64>)> = conn
            .query_row(
                "SELECT issued, expire FROM backoff WHERE ident = ?1 AND task = ?2",
                params![ident, key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some(row) = policy.next_record(previous, now) else {
            debug!("Keeping forever backoff for {} on {}", ident, task);
            return Ok(());
        };

        conn.execute(
            "INSERT INTO backoff (ident, task, issued, expire) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(ident, task) DO UPDATE SET issued = excluded.issued, expire = excluded.expire",
            params![ident, key, row.issued, row.expire],
        )?;
        metrics::record_backoff(policy.label());
        debug!(
            "Backoff {} for {} on {} until {:?}",
            policy.label(),
            ident,
            task,
            row.expire
        );
        Ok(())
    }

    /// Out-of-band reset of one `(ident, task)` pair.
    pub fn clear(&self, ident: &str, task: &str) -> Result<bool> {
        let changed = self.lock().execute(
            "DELETE FROM backoff WHERE ident = ?1 AND task = ?2",
            params![ident, task_key(task)],
        )?;
        Ok(changed > 0)
    }

    /// Out-of-band reset of every backoff recorded for `ident`.
    pub fn clear_all(&self, ident: &str) -> Result<usize> {
        Ok(self
            .lock()
            .execute("DELETE FROM backoff WHERE ident = ?1", params![ident])?)
    }
}
