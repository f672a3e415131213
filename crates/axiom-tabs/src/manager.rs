//! Tab Manager
//!
//! In-memory window and tab model for one profile.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::delegate::{LocalSessionSource, SyncedTabDelegate, SyncedWindowDelegate};
use crate::error::TabError;
use crate::tab::Tab;
use crate::window::{Window, WindowType};
use crate::{Result, TabId, TabNodeId, WindowId};

pub struct TabManager {
    profile_id: String,
    windows: Arc<RwLock<BTreeMap<WindowId, Window>>>,
    tabs: Arc<RwLock<BTreeMap<TabId, Tab>>>,
    /// Window and tab ids share one id space, like browser session ids
    next_id: Arc<AtomicI32>,
}

impl TabManager {
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            windows: Arc::new(RwLock::new(BTreeMap::new())),
            tabs: Arc::new(RwLock::new(BTreeMap::new())),
            next_id: Arc::new(AtomicI32::new(1)),
        }
    }

    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    fn allocate_id(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Open a new window for this profile
    pub fn open_window(&self, window_type: WindowType) -> WindowId {
        self.open_window_with(window_type, false)
    }

    pub fn open_incognito_window(&self) -> WindowId {
        self.open_window_with(WindowType::Tabbed, true)
    }

    fn open_window_with(&self, window_type: WindowType, off_the_record: bool) -> WindowId {
        let id = self.allocate_id();
        let mut window = Window::new(id, window_type, self.profile_id.clone());
        window.off_the_record = off_the_record;
        self.windows.write().insert(id, window);

        tracing::info!(window_id = id, window_type = ?window_type, "Opened window");

        id
    }

    /// Close a window along with all of its tabs
    pub fn close_window(&self, window_id: WindowId) -> Result<()> {
        let window = self
            .windows
            .write()
            .remove(&window_id)
            .ok_or(TabError::WindowNotFound(window_id))?;

        let mut tabs = self.tabs.write();
        for tab_id in &window.tab_order {
            tabs.remove(tab_id);
        }

        tracing::info!(window_id, tab_count = window.tab_count(), "Closed window");

        Ok(())
    }

    /// Create a tab at the end of `window_id` and navigate it to `url`
    pub fn create_tab(&self, window_id: WindowId, url: String) -> Result<Tab> {
        let mut windows = self.windows.write();
        let window = windows
            .get_mut(&window_id)
            .ok_or(TabError::WindowNotFound(window_id))?;

        let mut tab = Tab::new(self.allocate_id(), window_id, self.profile_id.clone());
        tab.off_the_record = window.off_the_record;
        tab.navigate(url, String::new())?;

        window.add_tab(tab.id);
        self.tabs.write().insert(tab.id, tab.clone());

        tracing::info!(tab_id = tab.id, window_id, "Created new tab");

        Ok(tab)
    }

    /// Create a tab that has not committed any navigation yet
    pub fn create_blank_tab(&self, window_id: WindowId) -> Result<Tab> {
        let mut windows = self.windows.write();
        let window = windows
            .get_mut(&window_id)
            .ok_or(TabError::WindowNotFound(window_id))?;

        let mut tab = Tab::new(self.allocate_id(), window_id, self.profile_id.clone());
        tab.off_the_record = window.off_the_record;

        window.add_tab(tab.id);
        self.tabs.write().insert(tab.id, tab.clone());

        Ok(tab)
    }

    /// Get a tab by ID
    pub fn get_tab(&self, tab_id: TabId) -> Result<Tab> {
        self.tabs
            .read()
            .get(&tab_id)
            .cloned()
            .ok_or(TabError::NotFound(tab_id))
    }

    fn update_tab<F>(&self, tab_id: TabId, f: F) -> Result<Tab>
    where
        F: FnOnce(&mut Tab) -> Result<()>,
    {
        let mut tabs = self.tabs.write();
        let tab = tabs.get_mut(&tab_id).ok_or(TabError::NotFound(tab_id))?;
        f(tab)?;
        Ok(tab.clone())
    }

    /// Navigate a tab to a new URL
    pub fn navigate_tab(&self, tab_id: TabId, url: String, title: String) -> Result<Tab> {
        self.update_tab(tab_id, |tab| tab.navigate(url, title))
    }

    pub fn go_back(&self, tab_id: TabId) -> Result<Tab> {
        self.update_tab(tab_id, |tab| {
            tab.go_back();
            Ok(())
        })
    }

    /// Update tab title
    pub fn set_tab_title(&self, tab_id: TabId, title: String) -> Result<Tab> {
        self.update_tab(tab_id, |tab| {
            tab.set_title(title);
            Ok(())
        })
    }

    /// Update tab favicon
    pub fn set_tab_favicon(&self, tab_id: TabId, favicon_url: Option<String>) -> Result<Tab> {
        self.update_tab(tab_id, |tab| {
            tab.set_favicon(favicon_url);
            Ok(())
        })
    }

    pub fn set_tab_pinned(&self, tab_id: TabId, pinned: bool) -> Result<Tab> {
        self.update_tab(tab_id, |tab| {
            tab.set_pinned(pinned);
            Ok(())
        })
    }

    /// Mark a tab as closing and return its final state
    ///
    /// The returned tab is what sync must see to release the tab's node;
    /// call `close_tab` afterwards to drop it from the model.
    pub fn begin_close_tab(&self, tab_id: TabId) -> Result<Tab> {
        self.update_tab(tab_id, |tab| {
            tab.being_destroyed = true;
            Ok(())
        })
    }

    /// Close a tab (remove from its window)
    pub fn close_tab(&self, tab_id: TabId) -> Result<()> {
        let tab = self
            .tabs
            .write()
            .remove(&tab_id)
            .ok_or(TabError::NotFound(tab_id))?;

        if let Some(window) = self.windows.write().get_mut(&tab.window_id) {
            window.remove_tab(tab_id);
        }

        tracing::info!(tab_id, "Closed tab");

        Ok(())
    }

    /// Reorder a tab within its window
    pub fn move_tab(&self, tab_id: TabId, new_index: usize) -> Result<()> {
        let window_id = self.get_tab(tab_id)?.window_id;
        let mut windows = self.windows.write();
        let window = windows
            .get_mut(&window_id)
            .ok_or(TabError::WindowNotFound(window_id))?;
        window.move_tab(tab_id, new_index);
        Ok(())
    }

    /// Get a window's tabs in on-screen order
    pub fn window_tabs(&self, window_id: WindowId) -> Result<Vec<Tab>> {
        let windows = self.windows.read();
        let window = windows
            .get(&window_id)
            .ok_or(TabError::WindowNotFound(window_id))?;
        let tabs = self.tabs.read();

        Ok(window
            .tab_order
            .iter()
            .filter_map(|id| tabs.get(id).cloned())
            .collect())
    }

    /// Ids of every open tab across all windows
    pub fn tab_ids(&self) -> Vec<TabId> {
        self.tabs.read().keys().copied().collect()
    }

    /// Snapshot of one window with its tabs
    pub fn snapshot(&self, window_id: WindowId) -> Option<WindowSnapshot> {
        let window = self.windows.read().get(&window_id).cloned()?;
        let tabs = self.tabs.read();
        let tabs = window
            .tab_order
            .iter()
            .filter_map(|id| tabs.get(id).cloned())
            .collect();

        Some(WindowSnapshot { window, tabs })
    }
}

impl Clone for TabManager {
    fn clone(&self) -> Self {
        Self {
            profile_id: self.profile_id.clone(),
            windows: Arc::clone(&self.windows),
            tabs: Arc::clone(&self.tabs),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl LocalSessionSource for TabManager {
    fn synced_windows(&self) -> Vec<Box<dyn SyncedWindowDelegate>> {
        let ids: Vec<WindowId> = self.windows.read().keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.snapshot(id))
            .map(|snapshot| Box::new(snapshot) as Box<dyn SyncedWindowDelegate>)
            .collect()
    }

    fn set_sync_id(&self, tab_id: TabId, tab_node_id: TabNodeId) {
        if let Some(tab) = self.tabs.write().get_mut(&tab_id) {
            tab.sync_id = Some(tab_node_id);
        }
    }

    fn synced_window(&self, window_id: WindowId) -> Option<Box<dyn SyncedWindowDelegate>> {
        self.snapshot(window_id)
            .map(|snapshot| Box::new(snapshot) as Box<dyn SyncedWindowDelegate>)
    }
}

/// Point-in-time copy of a window and its tabs
#[derive(Debug, Clone)]
pub struct WindowSnapshot {
    pub window: Window,
    /// Tabs in on-screen order
    pub tabs: Vec<Tab>,
}

impl SyncedWindowDelegate for WindowSnapshot {
    fn window_id(&self) -> WindowId {
        self.window.id
    }

    fn window_type(&self) -> WindowType {
        self.window.window_type
    }

    fn is_off_the_record(&self) -> bool {
        self.window.off_the_record
    }

    fn has_window(&self) -> bool {
        true
    }

    fn tab_count(&self) -> usize {
        self.tabs.len()
    }

    fn tab_id_at(&self, index: usize) -> Option<TabId> {
        self.tabs.get(index).map(|tab| tab.id)
    }

    fn tab_at(&self, index: usize) -> Option<&dyn SyncedTabDelegate> {
        self.tabs
            .get(index)
            .map(|tab| tab as &dyn SyncedTabDelegate)
    }

    fn selected_tab_index(&self) -> Option<usize> {
        self.window.selected_tab_index
    }
}
