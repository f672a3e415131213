//! Tab data structure
//!
//! A tab owns its back/forward history. Navigating from the middle of the
//! history drops the forward entries, the way a browser does.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TabError;
use crate::navigation::TabNavigation;
use crate::{Result, TabId, TabNodeId, WindowId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    /// Window this tab belongs to
    pub window_id: WindowId,
    /// Profile that owns the tab
    pub profile_id: String,
    /// Incognito tabs are never synced
    pub off_the_record: bool,
    pub pinned: bool,
    pub extension_app_id: Option<String>,
    /// Committed history, oldest first
    pub navigations: Vec<TabNavigation>,
    /// Index of the current entry in `navigations`
    pub current_index: usize,
    /// Sync node last assigned to this tab, kept across restarts so the
    /// node can be reclaimed instead of reallocated
    pub sync_id: Option<TabNodeId>,
    /// Set while the tab is closing
    pub being_destroyed: bool,
    /// When the tab was created
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Tab {
    pub fn new(id: TabId, window_id: WindowId, profile_id: impl Into<String>) -> Self {
        let now = Utc::now();

        Self {
            id,
            window_id,
            profile_id: profile_id.into(),
            off_the_record: false,
            pinned: false,
            extension_app_id: None,
            navigations: Vec::new(),
            current_index: 0,
            sync_id: None,
            being_destroyed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Commit a navigation to `url`
    pub fn navigate(&mut self, url: String, title: String) -> Result<()> {
        if url.is_empty() {
            return Err(TabError::InvalidUrl("URL cannot be empty".to_string()));
        }

        if !self.navigations.is_empty() {
            self.navigations.truncate(self.current_index + 1);
        }
        self.navigations.push(TabNavigation::new(url, title));
        self.current_index = self.navigations.len() - 1;
        self.updated_at = Utc::now();

        tracing::debug!(
            tab_id = self.id,
            entries = self.navigations.len(),
            "Tab navigated"
        );

        Ok(())
    }

    pub fn go_back(&mut self) -> bool {
        if self.current_index == 0 || self.navigations.is_empty() {
            return false;
        }
        self.current_index -= 1;
        self.updated_at = Utc::now();
        true
    }

    pub fn go_forward(&mut self) -> bool {
        if self.current_index + 1 >= self.navigations.len() {
            return false;
        }
        self.current_index += 1;
        self.updated_at = Utc::now();
        true
    }

    pub fn current_navigation(&self) -> Option<&TabNavigation> {
        self.navigations.get(self.current_index)
    }

    /// Update the title of the current entry
    pub fn set_title(&mut self, title: String) {
        if let Some(nav) = self.navigations.get_mut(self.current_index) {
            nav.title = title;
            self.updated_at = Utc::now();
        }
    }

    /// Update the favicon of the current entry
    pub fn set_favicon(&mut self, favicon_url: Option<String>) {
        if let Some(nav) = self.navigations.get_mut(self.current_index) {
            nav.favicon_url = favicon_url;
            self.updated_at = Utc::now();
        }
    }

    pub fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
        self.updated_at = Utc::now();
    }
}
