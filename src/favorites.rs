//! Favorite channels, keyed by [`channel_id`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::channels::{channel_id, Channel};
use crate::store::{now_epoch_millis, read_json, remove_file, write_json};

pub const FAVORITES_FILE: &str = "favorites.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: String,
    pub channel: Channel,
    pub timestamp: u64,
}

/// Records are kept in insertion order, so the file lists oldest first.
pub struct FavoritesStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FavoritesStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(FAVORITES_FILE),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Vec<FavoriteRecord> {
        match read_json(&self.path).await {
            Ok(records) => records.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable favorites: {:#}", e);
                Vec::new()
            }
        }
    }

    pub async fn records(&self) -> Vec<FavoriteRecord> {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn list(&self) -> Vec<Channel> {
        self.records()
            .await
            .into_iter()
            .map(|record| record.channel)
            .collect()
    }

    pub async fn is_favorite(&self, channel: &Channel) -> bool {
        let id = channel_id(channel);
        self.records().await.iter().any(|record| record.id == id)
    }

    /// Returns `false` when the channel was already a favorite.
    pub async fn add(&self, channel: &Channel) -> anyhow::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await;
        let id = channel_id(channel);
        if records.iter().any(|record| record.id == id) {
            return Ok(false);
        }
        records.push(FavoriteRecord {
            id: id.clone(),
            channel: channel.clone(),
            timestamp: now_epoch_millis(),
        });
        write_json(&self.path, &records).await?;
        info!("Added favorite: id={} title=\"{}\"", id, channel.title);
        Ok(true)
    }

    pub async fn remove(&self, channel: &Channel) -> anyhow::Result<bool> {
        self.remove_id(&channel_id(channel)).await
    }

    /// Returns `false` when no favorite had this id.
    pub async fn remove_id(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await;
        let before = records.len();
        records.retain(|record| record.id != id);
        if records.len() == before {
            return Ok(false);
        }
        write_json(&self.path, &records).await?;
        info!("Removed favorite: id={}", id);
        Ok(true)
    }

    /// Flip the favorite state and return the new one.
    pub async fn toggle(&self, channel: &Channel) -> anyhow::Result<bool> {
        let _guard = self.lock.lock().await;
        let mut records = self.read().await;
        let id = channel_id(channel);
        let before = records.len();
        records.retain(|record| record.id != id);
        let favorite = records.len() == before;
        if favorite {
            records.push(FavoriteRecord {
                id: id.clone(),
                channel: channel.clone(),
                timestamp: now_epoch_millis(),
            });
        }
        write_json(&self.path, &records).await?;
        info!("Toggled favorite: id={} favorite={}", id, favorite);
        Ok(favorite)
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        remove_file(&self.path).await
    }
}
