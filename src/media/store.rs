use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::debug;

const SCRATCH_DIR: &str = ".incoming";

/// Content-addressed byte store. Files live at `<root>/<first two hex chars>/<sha256>`.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the root directory.
    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(self.root.join(SCRATCH_DIR)).await
    }

    pub fn path_of(&self, hash: &str) -> PathBuf {
        let shard = hash.get(..2).unwrap_or(hash);
        self.root.join(shard).join(hash)
    }

    pub async fn contains(&self, hash: &str) -> bool {
        fs::try_exists(self.path_of(hash)).await.unwrap_or(false)
    }

    /// Temporary directory on the same filesystem as the store, so imports are a
    /// rename. Removed when dropped.
    pub fn scratch_dir(&self) -> io::Result<TempDir> {
        let parent = self.root.join(SCRATCH_DIR);
        std::fs::create_dir_all(&parent)?;
        tempfile::Builder::new().prefix("dl-").tempdir_in(parent)
    }

    /// Moves `file` into the store and returns its content hash. Importing bytes that
    /// are already stored just drops the new copy.
    pub async fn import(&self, file: &Path) -> io::Result<String> {
        let bytes = fs::read(file).await?;
        let hash = format!("{:x}", Sha256::digest(&bytes));
        let dest = self.path_of(&hash);

        if fs::try_exists(&dest).await? {
            debug!("Media {} already stored", hash);
            fs::remove_file(file).await?;
            return Ok(hash);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::rename(file, &dest).await.is_err() {
            // cross-device: fall back to a copy
            fs::write(&dest, &bytes).await?;
            let _ = fs::remove_file(file).await;
        }
        Ok(hash)
    }
}
