//! Read-side capability interface consumed by session sync
//!
//! The sync engine never touches a browser model directly. It pulls what it
//! needs through these traits, which the host implements and injects.

use crate::navigation::TabNavigation;
use crate::tab::Tab;
use crate::window::WindowType;
use crate::{TabId, TabNodeId, WindowId};

pub trait SyncedTabDelegate {
    fn tab_id(&self) -> TabId;
    fn window_id(&self) -> WindowId;
    fn profile_id(&self) -> &str;
    fn is_off_the_record(&self) -> bool;
    fn is_being_destroyed(&self) -> bool;
    fn is_pinned(&self) -> bool;
    fn extension_app_id(&self) -> Option<&str>;

    /// Committed navigation stack, oldest first
    fn navigations(&self) -> &[TabNavigation];
    fn current_entry_index(&self) -> usize;

    /// Sync node the host remembers for this tab, if any
    fn sync_id(&self) -> Option<TabNodeId>;

    fn entry_count(&self) -> usize {
        self.navigations().len()
    }

    fn current_navigation(&self) -> Option<&TabNavigation> {
        self.navigations().get(self.current_entry_index())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_navigation().map(|nav| nav.url.as_str())
    }

    fn current_title(&self) -> Option<&str> {
        self.current_navigation().map(|nav| nav.title.as_str())
    }

    fn current_favicon_url(&self) -> Option<&str> {
        self.current_navigation()
            .and_then(|nav| nav.favicon_url.as_deref())
    }
}

pub trait SyncedWindowDelegate {
    fn window_id(&self) -> WindowId;
    fn window_type(&self) -> WindowType;
    fn is_off_the_record(&self) -> bool;

    /// False once the window is torn down but still being enumerated
    fn has_window(&self) -> bool;

    fn tab_count(&self) -> usize;
    fn tab_id_at(&self, index: usize) -> Option<TabId>;
    fn tab_at(&self, index: usize) -> Option<&dyn SyncedTabDelegate>;
    fn selected_tab_index(&self) -> Option<usize>;

    fn is_type_tabbed(&self) -> bool {
        self.window_type() == WindowType::Tabbed
    }

    fn is_type_popup(&self) -> bool {
        self.window_type() == WindowType::Popup
    }

    fn is_app(&self) -> bool {
        self.window_type() == WindowType::App
    }
}

/// The host's window list, as seen by session sync
pub trait LocalSessionSource: Send + Sync {
    /// Snapshot of every open window, in no particular order
    fn synced_windows(&self) -> Vec<Box<dyn SyncedWindowDelegate>>;

    /// Remember the sync node assigned to a tab
    fn set_sync_id(&self, tab_id: TabId, tab_node_id: TabNodeId);

    /// Snapshot of one window, `None` once it is closed
    fn synced_window(&self, window_id: WindowId) -> Option<Box<dyn SyncedWindowDelegate>> {
        self.synced_windows()
            .into_iter()
            .find(|window| window.window_id() == window_id)
    }
}

impl SyncedTabDelegate for Tab {
    fn tab_id(&self) -> TabId {
        self.id
    }

    fn window_id(&self) -> WindowId {
        self.window_id
    }

    fn profile_id(&self) -> &str {
        &self.profile_id
    }

    fn is_off_the_record(&self) -> bool {
        self.off_the_record
    }

    fn is_being_destroyed(&self) -> bool {
        self.being_destroyed
    }

    fn is_pinned(&self) -> bool {
        self.pinned
    }

    fn extension_app_id(&self) -> Option<&str> {
        self.extension_app_id.as_deref()
    }

    fn navigations(&self) -> &[TabNavigation] {
        &self.navigations
    }

    fn current_entry_index(&self) -> usize {
        self.current_index
    }

    fn sync_id(&self) -> Option<TabNodeId> {
        self.sync_id
    }
}
