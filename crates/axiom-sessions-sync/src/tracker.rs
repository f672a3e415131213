//! Synced session tracker
//!
//! Index of every known session, keyed by machine tag. Header ingestion runs
//! as reset → put windows/tabs → cleanup: reset marks everything in the
//! session unowned, each put re-owns what the header still lists, and
//! cleanup drops the rest. Re-applying the same facts therefore converges
//! on the same state.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};

use axiom_tabs::{TabId, TabNodeId, WindowId};

use crate::synced_session::{SessionTab, SessionWindow, SyncedSession};

#[derive(Debug, Clone)]
struct TrackedSession {
    session: SyncedSession,
    owned_windows: HashSet<WindowId>,
    owned_tabs: HashSet<TabId>,
    /// Tabs whose record arrived but no window lists yet
    unmapped_tabs: BTreeSet<TabId>,
    /// Every node seen in the store for this session, including nodes of
    /// tabs the header dropped and placeholders without a tab
    tab_node_ids: BTreeSet<TabNodeId>,
}

impl TrackedSession {
    fn new(session_tag: &str) -> Self {
        Self {
            session: SyncedSession::new(session_tag),
            owned_windows: HashSet::new(),
            owned_tabs: HashSet::new(),
            unmapped_tabs: BTreeSet::new(),
            tab_node_ids: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncedSessionTracker {
    local_session_tag: String,
    sessions: HashMap<String, TrackedSession>,
}

impl SyncedSessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_local_session_tag(&mut self, local_session_tag: impl Into<String>) {
        self.local_session_tag = local_session_tag.into();
    }

    pub fn local_session_tag(&self) -> &str {
        &self.local_session_tag
    }

    fn tracked_mut(&mut self, session_tag: &str) -> &mut TrackedSession {
        self.sessions
            .entry(session_tag.to_string())
            .or_insert_with(|| TrackedSession::new(session_tag))
    }

    /// Session for `session_tag`, created empty if unknown
    pub fn get_session(&mut self, session_tag: &str) -> &mut SyncedSession {
        &mut self.tracked_mut(session_tag).session
    }

    pub fn lookup_session(&self, session_tag: &str) -> Option<&SyncedSession> {
        self.sessions.get(session_tag).map(|tracked| &tracked.session)
    }

    pub fn lookup_local_session(&self) -> Option<&SyncedSession> {
        if self.local_session_tag.is_empty() {
            return None;
        }
        self.lookup_session(&self.local_session_tag)
    }

    /// Foreign sessions that have something to show, most recently
    /// modified first
    pub fn lookup_all_foreign_sessions(&self) -> Vec<&SyncedSession> {
        let mut sessions: Vec<&SyncedSession> = self
            .sessions
            .iter()
            .filter(|(tag, _)| **tag != self.local_session_tag)
            .map(|(_, tracked)| &tracked.session)
            .filter(|session| session.has_syncable_tabs())
            .collect();

        sessions.sort_by(|a, b| {
            b.modified_time
                .cmp(&a.modified_time)
                .then_with(|| a.session_tag.cmp(&b.session_tag))
        });
        sessions
    }

    /// Tags of foreign sessions, empty or not, last modified before `cutoff`
    pub fn foreign_sessions_modified_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut tags: Vec<String> = self
            .sessions
            .iter()
            .filter(|(tag, _)| **tag != self.local_session_tag)
            .filter(|(_, tracked)| tracked.session.modified_time < cutoff)
            .map(|(tag, _)| tag.clone())
            .collect();
        tags.sort();
        tags
    }

    /// Windows of a session ordered by window id
    pub fn lookup_session_windows(&self, session_tag: &str) -> Option<Vec<&SessionWindow>> {
        self.lookup_session(session_tag)
            .map(|session| session.windows.values().collect())
    }

    pub fn lookup_session_tab(&self, session_tag: &str, tab_id: TabId) -> Option<&SessionTab> {
        self.lookup_session(session_tag)
            .and_then(|session| session.tabs.get(&tab_id))
    }

    /// Every tab node id seen for a session, whether or not a tab still
    /// lives in it
    pub fn lookup_tab_node_ids(&self, session_tag: &str) -> BTreeSet<TabNodeId> {
        self.sessions
            .get(session_tag)
            .map(|tracked| tracked.tab_node_ids.clone())
            .unwrap_or_default()
    }

    /// Nodes of the tabs currently tracked in a session
    pub fn lookup_mapped_tab_node_ids(&self, session_tag: &str) -> BTreeSet<TabNodeId> {
        self.lookup_session(session_tag)
            .map(|session| {
                session
                    .tabs
                    .values()
                    .filter_map(|tab| tab.tab_node_id)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Tabs listed by a window whose own record never arrived
    pub fn lookup_missing_tabs(&self, session_tag: &str) -> Vec<TabId> {
        let Some(session) = self.lookup_session(session_tag) else {
            return Vec::new();
        };
        session
            .windows
            .values()
            .flat_map(|window| window.tabs.iter())
            .filter(|tab_id| {
                session
                    .tabs
                    .get(tab_id)
                    .map_or(true, |tab| tab.tab_node_id.is_none())
            })
            .copied()
            .collect()
    }

    /// Remove a session with all of its windows and tabs
    pub fn delete_session(&mut self, session_tag: &str) -> bool {
        let removed = self.sessions.remove(session_tag).is_some();
        if removed {
            tracing::debug!(session_tag = %session_tag, "Removed session from tracker");
        }
        removed
    }

    /// Mark every window and tab of the session unowned and empty the
    /// windows' tab lists, ahead of re-putting what is still current
    pub fn reset_session_tracking(&mut self, session_tag: &str) {
        let tracked = self.tracked_mut(session_tag);
        tracked.owned_windows.clear();
        tracked.owned_tabs.clear();
        for window in tracked.session.windows.values_mut() {
            window.tabs.clear();
        }
        tracked.unmapped_tabs = tracked.session.tabs.keys().copied().collect();
    }

    pub fn put_window_in_session(&mut self, session_tag: &str, window_id: WindowId) {
        let tracked = self.tracked_mut(session_tag);
        tracked
            .session
            .windows
            .entry(window_id)
            .or_insert_with(|| SessionWindow::new(window_id));
        tracked.owned_windows.insert(window_id);
    }

    /// Place `tab_id` at `tab_index` of `window_id`, creating a placeholder
    /// tab if its record has not arrived yet
    pub fn put_tab_in_window(
        &mut self,
        session_tag: &str,
        window_id: WindowId,
        tab_id: TabId,
        tab_index: usize,
    ) {
        let tracked = self.tracked_mut(session_tag);

        let tab = tracked
            .session
            .tabs
            .entry(tab_id)
            .or_insert_with(|| SessionTab::new(tab_id));
        tab.window_id = window_id;
        tab.tab_visual_index = tab_index;
        tracked.owned_tabs.insert(tab_id);
        tracked.unmapped_tabs.remove(&tab_id);

        for (id, window) in tracked.session.windows.iter_mut() {
            if *id != window_id {
                window.tabs.retain(|t| *t != tab_id);
            }
        }

        let window = tracked
            .session
            .windows
            .entry(window_id)
            .or_insert_with(|| SessionWindow::new(window_id));
        tracked.owned_windows.insert(window_id);

        window.tabs.retain(|t| *t != tab_id);
        let index = tab_index.min(window.tabs.len());
        window.tabs.insert(index, tab_id);
    }

    /// Tab for writing a tab record into, created unmapped if unknown
    pub fn get_tab(
        &mut self,
        session_tag: &str,
        tab_id: TabId,
        tab_node_id: TabNodeId,
    ) -> &mut SessionTab {
        let tracked = self.tracked_mut(session_tag);
        if !tracked.session.tabs.contains_key(&tab_id) {
            tracked.unmapped_tabs.insert(tab_id);
        }

        let tab = tracked
            .session
            .tabs
            .entry(tab_id)
            .or_insert_with(|| SessionTab::new(tab_id));
        if tab.tab_node_id.is_some_and(|existing| existing != tab_node_id) {
            tracing::warn!(
                session_tag = %session_tag,
                tab_id,
                old_tab_node_id = ?tab.tab_node_id,
                tab_node_id,
                "Tab moved to a different tab node"
            );
        }
        tab.tab_node_id = Some(tab_node_id);
        tracked.tab_node_ids.insert(tab_node_id);
        tab
    }

    /// Record a node that exists in the store without a tab in it
    pub fn put_tab_node(&mut self, session_tag: &str, tab_node_id: TabNodeId) {
        self.tracked_mut(session_tag).tab_node_ids.insert(tab_node_id);
    }

    /// Forget a node deleted from the store; the session is not created
    /// if unknown
    pub fn delete_tab_node(&mut self, session_tag: &str, tab_node_id: TabNodeId) -> bool {
        let Some(tracked) = self.sessions.get_mut(session_tag) else {
            return false;
        };
        let removed = tracked.tab_node_ids.remove(&tab_node_id);
        for tab in tracked.session.tabs.values_mut() {
            if tab.tab_node_id == Some(tab_node_id) {
                tab.tab_node_id = None;
            }
        }
        removed
    }

    /// Drop windows and tabs not re-owned since the last reset
    pub fn cleanup_session(&mut self, session_tag: &str) {
        let Some(tracked) = self.sessions.get_mut(session_tag) else {
            return;
        };

        let owned_windows = &tracked.owned_windows;
        tracked
            .session
            .windows
            .retain(|window_id, _| owned_windows.contains(window_id));

        let owned_tabs = &tracked.owned_tabs;
        let before = tracked.session.tabs.len();
        tracked
            .session
            .tabs
            .retain(|tab_id, _| owned_tabs.contains(tab_id));
        tracked.unmapped_tabs.clear();

        let dropped = before - tracked.session.tabs.len();
        if dropped > 0 {
            tracing::debug!(session_tag = %session_tag, dropped, "Cleaned up unused tabs");
        }
    }

    pub fn unmapped_tab_ids(&self, session_tag: &str) -> Vec<TabId> {
        self.sessions
            .get(session_tag)
            .map(|tracked| tracked.unmapped_tabs.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn num_synced_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Tabs listed by some window of the session
    pub fn num_synced_tabs(&self, session_tag: &str) -> usize {
        self.lookup_session(session_tag)
            .map(SyncedSession::mapped_tab_count)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        self.sessions.clear();
        self.local_session_tag.clear();
    }
}
