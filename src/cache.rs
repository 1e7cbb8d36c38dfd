//! Channel cache: a single "latest" playlist slot on disk.
//!
//! Writers always overwrite the slot. Expiry is enforced on read, so a stale
//! slot stays on disk (and is still reported by [`ChannelCache::info`]) until
//! the next save or clear.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channels::Channel;
use crate::store::{now_epoch_millis, read_json, remove_file, write_json};

pub const CACHE_FILE: &str = "channel-cache.json";
pub const CACHE_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistSource {
    File,
    Url,
}

impl fmt::Display for PlaylistSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistSource::File => write!(f, "file"),
            PlaylistSource::Url => write!(f, "url"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedPlaylist {
    pub channels: Vec<Channel>,
    /// Epoch milliseconds.
    pub timestamp: u64,
    pub source: PlaylistSource,
    pub source_identifier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheInfo {
    pub timestamp: u64,
    pub source: PlaylistSource,
    pub source_identifier: String,
}

pub struct ChannelCache {
    path: PathBuf,
    expiry: Duration,
    lock: Mutex<()>,
}

impl ChannelCache {
    pub fn new(data_dir: impl Into<PathBuf>, expiry: Duration) -> Self {
        Self {
            path: data_dir.into().join(CACHE_FILE),
            expiry,
            lock: Mutex::new(()),
        }
    }

    /// Store `channels` as the latest playlist. An empty list is ignored.
    pub async fn save(
        &self,
        channels: &[Channel],
        source: PlaylistSource,
        source_identifier: &str,
    ) -> anyhow::Result<()> {
        if channels.is_empty() {
            return Ok(());
        }
        let slot = CachedPlaylist {
            channels: channels.to_vec(),
            timestamp: now_epoch_millis(),
            source,
            source_identifier: source_identifier.to_string(),
        };
        self.store(&slot).await?;
        info!(
            "Cached {} channels (source={} id=\"{}\")",
            slot.channels.len(),
            source,
            source_identifier
        );
        Ok(())
    }

    async fn store(&self, slot: &CachedPlaylist) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        write_json(&self.path, slot).await
    }

    async fn read_slot(&self) -> Option<CachedPlaylist> {
        let _guard = self.lock.lock().await;
        match read_json(&self.path).await {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Ignoring unreadable channel cache: {:#}", e);
                None
            }
        }
    }

    /// The latest playlist, unless it is missing, unreadable or expired.
    pub async fn load(&self) -> Option<CachedPlaylist> {
        self.load_at(now_epoch_millis()).await
    }

    async fn load_at(&self, now: u64) -> Option<CachedPlaylist> {
        let slot = self.read_slot().await?;
        let age = now.saturating_sub(slot.timestamp);
        if u128::from(age) > self.expiry.as_millis() {
            info!("Channel cache expired (age={}s)", age / 1000);
            return None;
        }
        Some(slot)
    }

    /// Slot metadata without the channels. Does not check expiry.
    pub async fn info(&self) -> Option<CacheInfo> {
        self.read_slot().await.map(|slot| CacheInfo {
            timestamp: slot.timestamp,
            source: slot.source,
            source_identifier: slot.source_identifier,
        })
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        remove_file(&self.path).await
    }
}
