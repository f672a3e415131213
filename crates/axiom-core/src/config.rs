//! Session sync configuration

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use axiom_sessions_sync::{
    SyncSettings, DEFAULT_FREE_NODES_HIGH_WATERMARK, DEFAULT_FREE_NODES_LOW_WATERMARK,
    DEFAULT_MAX_SYNC_NAVIGATION_COUNT, DEFAULT_STALE_SESSION_THRESHOLD_DAYS,
};

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file holding sync prefs
    pub database_path: PathBuf,
    /// Profile whose tabs are synced
    pub profile_id: String,
    /// Foreign sessions idle for longer are garbage collected
    pub stale_session_threshold_days: i64,
    /// Navigations synced on each side of a tab's current entry
    pub max_sync_navigation_count: usize,
    pub free_nodes_high_watermark: usize,
    pub free_nodes_low_watermark: usize,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            database_path: data_dir.join("axiom.db"),
            profile_id: "Default".to_string(),
            stale_session_threshold_days: DEFAULT_STALE_SESSION_THRESHOLD_DAYS,
            max_sync_navigation_count: DEFAULT_MAX_SYNC_NAVIGATION_COUNT,
            free_nodes_high_watermark: DEFAULT_FREE_NODES_HIGH_WATERMARK,
            free_nodes_low_watermark: DEFAULT_FREE_NODES_LOW_WATERMARK,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("AXIOM"))
            .unwrap_or_else(|| PathBuf::from(".axiom"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.profile_id.is_empty() {
            return Err(CoreError::Config("profile_id must not be empty".to_string()));
        }
        if self.stale_session_threshold_days <= 0 {
            return Err(CoreError::Config(
                "stale_session_threshold_days must be positive".to_string(),
            ));
        }
        if self.free_nodes_low_watermark > self.free_nodes_high_watermark {
            return Err(CoreError::Config(format!(
                "free node low watermark {} exceeds high watermark {}",
                self.free_nodes_low_watermark, self.free_nodes_high_watermark
            )));
        }
        Ok(())
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            profile_id: self.profile_id.clone(),
            max_sync_navigation_count: self.max_sync_navigation_count,
            stale_session_threshold: Duration::days(self.stale_session_threshold_days),
            free_nodes_high_watermark: self.free_nodes_high_watermark,
            free_nodes_low_watermark: self.free_nodes_low_watermark,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}
