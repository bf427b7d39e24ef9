// Durable snapshots: the open position and the per-pair candle series
pub mod file;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BotError;
use crate::models::{Pair, Resolution};
use crate::Result;

pub use self::file::FileSnapshotStore;
pub use self::memory::MemorySnapshotStore;
pub use self::redis_store::RedisSnapshotStore;

/// Key of the single position snapshot
pub const POSITION_KEY: &str = "position";

/// Key of a pair's candle snapshot, e.g. `candles:ETC_USDT.hour`
pub fn candles_key(pair: &Pair, resolution: Resolution) -> String {
    format!("candles:{}.{}", pair, resolution.name())
}

/// Opaque blob storage keyed by name
///
/// `save` replaces the whole value atomically: a reader sees either the
/// previous blob or the new one, never a mix.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn save(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Serialize `value` as JSON and store it under `key`
pub async fn save_json<T: Serialize + Sync>(
    store: &dyn SnapshotStore,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    store.save(key, &bytes).await
}

/// Load and decode the JSON blob under `key`
///
/// A missing key is `Ok(None)`; a blob that does not decode is
/// `PersistedStateCorrupt`, never silently treated as missing.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn SnapshotStore,
    key: &str,
) -> Result<Option<T>> {
    let Some(bytes) = store.load(key).await? else {
        return Ok(None);
    };

    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| BotError::PersistedStateCorrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
}
