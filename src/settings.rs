//! User settings: last playlist url, filters and url history.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::store::{read_json, remove_file, write_json};

pub const SETTINGS_FILE: &str = "settings.json";
pub const MAX_URL_HISTORY: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub m3u_url: String,
    pub search_term: String,
    pub selected_group: String,
    pub last_used_urls: Vec<String>,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub m3u_url: Option<String>,
    pub search_term: Option<String>,
    pub selected_group: Option<String>,
    pub last_used_urls: Option<Vec<String>>,
}

impl AppSettings {
    pub fn apply(&mut self, patch: SettingsPatch) {
        if let Some(url) = patch.m3u_url {
            self.m3u_url = url;
        }
        if let Some(term) = patch.search_term {
            self.search_term = term;
        }
        if let Some(group) = patch.selected_group {
            self.selected_group = group;
        }
        if let Some(mut urls) = patch.last_used_urls {
            urls.truncate(MAX_URL_HISTORY);
            self.last_used_urls = urls;
        }
    }

    /// Move `url` to the front of the history, keeping at most ten entries.
    pub fn remember_url(&mut self, url: &str) {
        self.last_used_urls.retain(|existing| existing != url);
        self.last_used_urls.insert(0, url.to_string());
        self.last_used_urls.truncate(MAX_URL_HISTORY);
    }
}

pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: data_dir.into().join(SETTINGS_FILE),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> AppSettings {
        match read_json(&self.path).await {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring unreadable settings: {:#}", e);
                AppSettings::default()
            }
        }
    }

    pub async fn get(&self) -> AppSettings {
        let _guard = self.lock.lock().await;
        self.read().await
    }

    pub async fn update(&self, patch: SettingsPatch) -> anyhow::Result<AppSettings> {
        let _guard = self.lock.lock().await;
        let mut settings = self.read().await;
        settings.apply(patch);
        write_json(&self.path, &settings).await?;
        Ok(settings)
    }

    pub async fn add_url_to_history(&self, url: &str) -> anyhow::Result<AppSettings> {
        let _guard = self.lock.lock().await;
        let mut settings = self.read().await;
        settings.remember_url(url);
        write_json(&self.path, &settings).await?;
        Ok(settings)
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        remove_file(&self.path).await
    }
}
