use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{timeout, Duration};

use super::SnapshotStore;
use crate::error::BotError;
use crate::Result;

/// Redis-backed snapshots: one string value per key under a namespace
#[derive(Clone)]
pub struct RedisSnapshotStore {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisSnapshotStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    /// * `namespace` - Prefix for every key (e.g., "trendbot")
    pub async fn new(redis_url: &str, namespace: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        // Add 5 second timeout to connection attempt
        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| {
                BotError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "Redis connection timeout after 5 seconds",
                ))
            })??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        Ok(value)
    }

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.full_key(key), bytes).await?;
        tracing::debug!(key, bytes = bytes.len(), "Snapshot written to Redis");
        Ok(())
    }
}
