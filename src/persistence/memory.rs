use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::SnapshotStore;
use crate::Result;

/// In-process snapshot store for backtests and tests
#[derive(Clone, Default)]
pub struct MemorySnapshotStore {
    data: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self
            .data
            .read()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(data.get(key).cloned())
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut data = self
            .data
            .write()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        data.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
