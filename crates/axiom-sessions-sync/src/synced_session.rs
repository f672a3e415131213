//! In-memory session model
//!
//! Sessions own their windows and tabs by value. Windows refer to tabs by
//! id only, so there are no shared handles between the three.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use axiom_tabs::{TabId, TabNavigation, TabNodeId, WindowId};

use crate::specifics::{
    BrowserType, DeviceType, SessionHeader, SessionTabSpecifics, SessionWindowSpecifics,
};

/// One device's open windows and tabs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedSession {
    /// Machine tag of the device
    pub session_tag: String,
    /// User-visible device name
    pub session_name: String,
    pub device_type: DeviceType,
    /// Last time any record of this session changed
    pub modified_time: DateTime<Utc>,
    pub windows: BTreeMap<WindowId, SessionWindow>,
    /// Every tab known for this session, including ones no window lists yet
    pub tabs: HashMap<TabId, SessionTab>,
}

impl SyncedSession {
    pub fn new(session_tag: impl Into<String>) -> Self {
        Self {
            session_tag: session_tag.into(),
            session_name: String::new(),
            device_type: DeviceType::Other,
            modified_time: DateTime::<Utc>::UNIX_EPOCH,
            windows: BTreeMap::new(),
            tabs: HashMap::new(),
        }
    }

    /// Tabs of `window_id` in on-screen order
    pub fn window_tabs(&self, window_id: WindowId) -> Vec<&SessionTab> {
        self.windows
            .get(&window_id)
            .map(|window| {
                window
                    .tabs
                    .iter()
                    .filter_map(|tab_id| self.tabs.get(tab_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<&SessionTab> {
        self.tabs.get(&tab_id)
    }

    /// Number of tabs listed by some window
    pub fn mapped_tab_count(&self) -> usize {
        self.windows.values().map(|window| window.tabs.len()).sum()
    }

    /// True if some window lists a tab with a navigation worth showing
    pub fn has_syncable_tabs(&self) -> bool {
        self.windows.values().any(|window| {
            window
                .tabs
                .iter()
                .filter_map(|tab_id| self.tabs.get(tab_id))
                .any(SessionTab::has_navigations)
        })
    }

    pub fn to_session_header(&self) -> SessionHeader {
        SessionHeader {
            windows: self
                .windows
                .values()
                .map(SessionWindow::to_specifics)
                .collect(),
            client_name: Some(self.session_name.clone()),
            device_type: Some(self.device_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub window_id: WindowId,
    pub selected_tab_index: Option<usize>,
    pub window_type: BrowserType,
    pub timestamp: DateTime<Utc>,
    /// Tab ids in on-screen order
    pub tabs: Vec<TabId>,
}

impl SessionWindow {
    pub fn new(window_id: WindowId) -> Self {
        Self {
            window_id,
            selected_tab_index: None,
            window_type: BrowserType::Tabbed,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            tabs: Vec::new(),
        }
    }

    pub fn to_specifics(&self) -> SessionWindowSpecifics {
        SessionWindowSpecifics {
            window_id: self.window_id,
            selected_tab_index: self.selected_tab_index,
            browser_type: self.window_type,
            tabs: self.tabs.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionTab {
    pub tab_id: TabId,
    pub window_id: WindowId,
    /// Replicated node holding this tab; `None` until the tab's own record
    /// has been seen
    pub tab_node_id: Option<TabNodeId>,
    pub tab_visual_index: usize,
    pub current_navigation_index: usize,
    pub pinned: bool,
    pub extension_app_id: Option<String>,
    pub navigations: Vec<TabNavigation>,
    pub timestamp: DateTime<Utc>,
}

impl SessionTab {
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            window_id: 0,
            tab_node_id: None,
            tab_visual_index: 0,
            current_navigation_index: 0,
            pinned: false,
            extension_app_id: None,
            navigations: Vec::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Overwrite with the contents of a tab record
    pub fn set_from_specifics(&mut self, specifics: &SessionTabSpecifics, mtime: DateTime<Utc>) {
        if let Some(tab_id) = specifics.tab_id {
            self.tab_id = tab_id;
        }
        self.window_id = specifics.window_id;
        self.tab_visual_index = specifics.tab_visual_index;
        self.current_navigation_index = specifics.current_navigation_index;
        self.pinned = specifics.pinned;
        self.extension_app_id = specifics.extension_app_id.clone();
        self.navigations = specifics.navigations.clone();
        self.timestamp = mtime;
    }

    pub fn to_specifics(&self) -> SessionTabSpecifics {
        SessionTabSpecifics {
            tab_id: Some(self.tab_id),
            window_id: self.window_id,
            tab_visual_index: self.tab_visual_index,
            current_navigation_index: self.current_navigation_index,
            pinned: self.pinned,
            extension_app_id: self.extension_app_id.clone(),
            navigations: self.navigations.clone(),
        }
    }

    pub fn has_navigations(&self) -> bool {
        !self.navigations.is_empty()
    }

    pub fn current_navigation(&self) -> Option<&TabNavigation> {
        self.navigations
            .get(self.current_navigation_index)
            .or_else(|| self.navigations.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_tabs_in_order() {
        let mut session = SyncedSession::new("device-A");
        let mut window = SessionWindow::new(1);
        window.tabs = vec![11, 10];
        session.windows.insert(1, window);
        session.tabs.insert(10, SessionTab::new(10));
        session.tabs.insert(11, SessionTab::new(11));

        let ids: Vec<TabId> = session.window_tabs(1).iter().map(|t| t.tab_id).collect();
        assert_eq!(ids, vec![11, 10]);
        assert!(session.window_tabs(2).is_empty());
        assert_eq!(session.mapped_tab_count(), 2);
    }

    #[test]
    fn test_syncable_tabs_need_navigations() {
        let mut session = SyncedSession::new("device-A");
        let mut window = SessionWindow::new(1);
        window.tabs = vec![10];
        session.windows.insert(1, window);
        session.tabs.insert(10, SessionTab::new(10));
        assert!(!session.has_syncable_tabs());

        let tab = session.tabs.get_mut(&10).unwrap();
        tab.navigations
            .push(TabNavigation::new("https://example.com", "Example"));
        assert!(session.has_syncable_tabs());
    }

    #[test]
    fn test_set_from_specifics_stamps_time() {
        let mtime = Utc::now();
        let specifics = SessionTabSpecifics {
            tab_id: Some(10),
            window_id: 1,
            pinned: true,
            navigations: vec![TabNavigation::new("https://example.com", "Example")],
            ..Default::default()
        };

        let mut tab = SessionTab::new(10);
        tab.set_from_specifics(&specifics, mtime);
        assert_eq!(tab.window_id, 1);
        assert!(tab.pinned);
        assert_eq!(tab.timestamp, mtime);
        assert_eq!(tab.to_specifics(), specifics);
    }
}
