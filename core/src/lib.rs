use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub mod cache;
pub mod daemon;
pub mod engine;
pub mod entry;
pub mod platform;
pub mod snapshot;
pub mod store;

#[cfg(test)]
mod testing;

pub use cache::{ImageCacheSettings, ImageStore};
pub use daemon::Command;
pub use engine::{EngineSettings, HistoryEngine, HistoryEvent};
pub use entry::{ClipboardEntry, EntryKind};
pub use platform::{ClipboardBackend, KeystrokePaste, PasteSimulator, Revision, SystemClipboard};
pub use store::HistoryStore;

const APP_NAME: &str = "clipstack";
const HISTORY_FILE: &str = "history.json";
const SOCKET_NAME: &str = "clipstack.sock";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub max_unpinned: usize,
    pub poll_interval_ms: u64,
    pub save_debounce_ms: u64,
    pub jpeg_quality: u8,
    pub image_cache_count: usize,
    pub image_cache_bytes: usize,
    pub thumbnail_cache_count: usize,
    pub thumbnail_cache_bytes: usize,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("Clipboard");

        Self {
            data_dir,
            max_unpinned: 30,
            poll_interval_ms: 1000,
            save_debounce_ms: 500,
            jpeg_quality: 80,
            image_cache_count: 5,
            image_cache_bytes: 20 * 1024 * 1024, // 20MB
            thumbnail_cache_count: 30,
            thumbnail_cache_bytes: 5 * 1024 * 1024, // 5MB
            thumbnail_width: 100,
            thumbnail_height: 80,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = dirs::config_dir()
            .unwrap_or_default()
            .join(APP_NAME)
            .join("config.toml");

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {}", config_path.display()))
        } else {
            let config = Self::default();
            if let Some(parent) = config_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&config_path, toml::to_string_pretty(&config)?)?;
            Ok(config)
        }
    }

    pub fn history_path(&self) -> PathBuf {
        self.data_dir.join(HISTORY_FILE)
    }

    pub fn socket_path(&self) -> PathBuf {
        std::env::temp_dir().join(SOCKET_NAME)
    }
}
