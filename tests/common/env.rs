//! Test environment lifecycle
//!
//! Each test gets an isolated catalog database and media store inside its own
//! temporary directory. The scheduler spawned from an environment is shut down when
//! the environment is dropped.

use super::constants::CLOCK_START_MS;
use catalog_pipeline::backoff::{BackoffLedger, ManualClock};
use catalog_pipeline::media::MediaStore;
use catalog_pipeline::pipeline::{create_pipeline, PipelineHandle, TaskContext, TaskNode};
use catalog_pipeline::store::links::append_links;
use catalog_pipeline::store::records::{canonical_id, entity_count, insert_stub, record_exists};
use catalog_pipeline::store::{CatalogStore, EntityKind, Ident, LinkKind};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct TestEnv {
    pub store: CatalogStore,
    pub ledger: BackoffLedger,
    pub clock: Arc<ManualClock>,
    pub media: MediaStore,
    shutdown: CancellationToken,
    // Keep temp dir alive for the duration of the test
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = CatalogStore::open(temp_dir.path().join("catalog.db"))
            .expect("Failed to open catalog database");
        let clock = Arc::new(ManualClock::new(CLOCK_START_MS));
        let ledger = BackoffLedger::new(&store, clock.clone());
        let media = MediaStore::new(temp_dir.path().join("media"));

        Self {
            store,
            ledger,
            clock,
            media,
            shutdown: CancellationToken::new(),
            _temp_dir: temp_dir,
        }
    }

    pub fn context(&self) -> TaskContext {
        TaskContext::new(self.store.clone(), self.ledger.clone())
            .with_concurrency(3)
            .with_cancellation_token(self.shutdown.clone())
    }

    /// Spawns a scheduler over `tasks` and returns its handle.
    pub fn spawn(&self, tasks: TaskNode) -> PipelineHandle {
        let (mut scheduler, handle) = create_pipeline(tasks, self.shutdown.clone(), self.context());
        tokio::spawn(async move { scheduler.run().await });
        handle
    }

    pub fn seed(&self, ident: &str) {
        let ident = parse(ident);
        self.store
            .with_conn(|conn| insert_stub(conn, &ident))
            .expect("Failed to insert stub");
    }

    pub fn link(&self, from: &str, kind: LinkKind, data: &str) {
        let from = parse(from);
        self.store
            .with_conn(|conn| append_links(conn, &from, &[(kind, data.to_string())]))
            .expect("Failed to append link");
    }

    /// `None` if the record does not exist, `Some(None)` if it has no canonical id.
    pub fn canonical(&self, ident: &str) -> Option<Option<i64>> {
        let ident = parse(ident);
        self.store
            .with_conn(|conn| canonical_id(conn, &ident))
            .expect("Failed to read canonical id")
    }

    pub fn exists(&self, ident: &str) -> bool {
        let ident = parse(ident);
        self.store
            .with_conn(|conn| record_exists(conn, &ident))
            .expect("Failed to check record")
    }

    pub fn entities(&self, kind: EntityKind) -> i64 {
        self.store
            .with_conn(|conn| entity_count(conn, kind))
            .expect("Failed to count entities")
    }

    pub fn suppressed(&self, ident: &str, task: &str) -> bool {
        self.ledger
            .suppressed(ident, task)
            .expect("Failed to query backoff")
    }
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

pub fn parse(ident: &str) -> Ident {
    ident.parse().expect("Invalid test ident")
}
