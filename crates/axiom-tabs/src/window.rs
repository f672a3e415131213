//! Browser window data structure

use serde::{Deserialize, Serialize};

use crate::{TabId, WindowId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowType {
    /// Normal window with a tab strip
    Tabbed,
    Popup,
    /// Hosted app window, never synced
    App,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub id: WindowId,
    pub window_type: WindowType,
    pub profile_id: String,
    pub off_the_record: bool,
    /// Tab ids in on-screen order
    pub tab_order: Vec<TabId>,
    pub selected_tab_index: Option<usize>,
}

impl Window {
    pub fn new(id: WindowId, window_type: WindowType, profile_id: impl Into<String>) -> Self {
        Self {
            id,
            window_type,
            profile_id: profile_id.into(),
            off_the_record: false,
            tab_order: Vec::new(),
            selected_tab_index: None,
        }
    }

    /// Add a tab ID to the end of the order list
    pub fn add_tab(&mut self, tab_id: TabId) {
        if !self.tab_order.contains(&tab_id) {
            self.tab_order.push(tab_id);
            self.selected_tab_index = Some(self.tab_order.len() - 1);
        }
    }

    /// Remove a tab ID from the order list
    pub fn remove_tab(&mut self, tab_id: TabId) {
        self.tab_order.retain(|id| *id != tab_id);
        self.selected_tab_index = match self.selected_tab_index {
            _ if self.tab_order.is_empty() => None,
            Some(index) => Some(index.min(self.tab_order.len() - 1)),
            None => None,
        };
    }

    /// Move a tab to a new position
    pub fn move_tab(&mut self, tab_id: TabId, new_index: usize) {
        if let Some(current_index) = self.tab_order.iter().position(|id| *id == tab_id) {
            let tab_id = self.tab_order.remove(current_index);
            let insert_index = new_index.min(self.tab_order.len());
            self.tab_order.insert(insert_index, tab_id);
        }
    }

    pub fn tab_count(&self) -> usize {
        self.tab_order.len()
    }
}
