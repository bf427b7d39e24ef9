use async_trait::async_trait;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::SnapshotStore;
use crate::Result;

/// One file per key under a state directory
///
/// Writes go to a uniquely named temp file in the same directory and are
/// renamed over the target.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Use `dir` as the state directory, creating it if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::info!("Snapshot files under {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| match c {
                ':' | '/' | '\\' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.tmp", Uuid::new_v4()));

        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        tracing::debug!(key, bytes = bytes.len(), "Snapshot written");
        Ok(())
    }
}
