//! Sessions Sync Manager
//!
//! Keeps this device's open windows and tabs consistent with the replicated
//! session store. Local state flows out as change records the caller hands
//! to the transport; remote records flow in through `process_sync_changes`
//! and land in the session tracker. The manager never talks to the
//! transport itself.
//!
//! Lifecycle: `Uninitialized → Merging → Active → Stopped`. Entry points are
//! not internally synchronized; callers serialize them.

use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use url::Url;

use axiom_tabs::{LocalSessionSource, SyncedTabDelegate, SyncedWindowDelegate, TabId, TabNodeId};

use crate::change::{
    parse_tab_node_tag, tab_node_tag, SyncChange, SyncChangeList, SyncChangeType, SyncData,
};
use crate::device_info::{build_machine_tag, DeviceInfoProvider};
use crate::error::SyncError;
use crate::favicon::FaviconCache;
use crate::prefs::SyncPrefs;
use crate::specifics::{
    BrowserType, SessionHeader, SessionSpecifics, SessionTabSpecifics, SessionWindowSpecifics,
};
use crate::synced_session::{SessionTab, SyncedSession};
use crate::tab_node_pool::{
    TabNodePool, DEFAULT_FREE_NODES_HIGH_WATERMARK, DEFAULT_FREE_NODES_LOW_WATERMARK,
};
use crate::tracker::SyncedSessionTracker;
use crate::Result;

/// Navigations kept on each side of the current entry
pub const DEFAULT_MAX_SYNC_NAVIGATION_COUNT: usize = 6;
pub const DEFAULT_STALE_SESSION_THRESHOLD_DAYS: i64 = 14;

const HISTORY_URL: &str = "axiom://history/";
const NON_SYNCED_SCHEMES: &[&str] = &["axiom", "about", "file"];

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Only tabs of this profile are synced
    pub profile_id: String,
    pub max_sync_navigation_count: usize,
    /// Foreign sessions untouched for longer are garbage collected
    pub stale_session_threshold: Duration,
    pub free_nodes_high_watermark: usize,
    pub free_nodes_low_watermark: usize,
}

impl SyncSettings {
    pub fn new(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            max_sync_navigation_count: DEFAULT_MAX_SYNC_NAVIGATION_COUNT,
            stale_session_threshold: Duration::days(DEFAULT_STALE_SESSION_THRESHOLD_DAYS),
            free_nodes_high_watermark: DEFAULT_FREE_NODES_HIGH_WATERMARK,
            free_nodes_low_watermark: DEFAULT_FREE_NODES_LOW_WATERMARK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Uninitialized,
    Merging,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTabsOption {
    /// Re-associate every tab so navigation history is current
    ReloadTabs,
    /// Only rebuild the window list from already associated tabs
    DontReloadTabs,
}

/// Result of the initial merge
#[derive(Debug)]
pub struct MergeOutcome {
    /// Records to publish so the store reflects local state
    pub changes: SyncChangeList,
    /// True if the store already held a header for this machine
    pub reused_local_header: bool,
    pub foreign_sessions: usize,
    /// Records dropped as unusable; the merge itself succeeded
    pub errors: Vec<SyncError>,
}

#[derive(Debug, Clone)]
struct TabLink {
    tab_node_id: TabNodeId,
    /// Page the tab showed when last associated
    url: Option<Url>,
}

pub struct SessionsSyncManager {
    settings: SyncSettings,
    state: SyncState,
    session_tracker: SyncedSessionTracker,
    local_tab_pool: TabNodePool,
    local_tab_map: HashMap<TabId, TabLink>,
    /// Local tabs whose node was deleted remotely; re-associated on the
    /// next window pass
    orphaned_local_tabs: HashSet<TabId>,
    local_source: Arc<dyn LocalSessionSource>,
    device_info: Arc<dyn DeviceInfoProvider>,
    sync_prefs: Arc<dyn SyncPrefs>,
    favicon_cache: Arc<dyn FaviconCache>,
    current_machine_tag: String,
    current_session_name: String,
    local_header_missing: bool,
}

impl SessionsSyncManager {
    pub fn new(
        settings: SyncSettings,
        local_source: Arc<dyn LocalSessionSource>,
        device_info: Arc<dyn DeviceInfoProvider>,
        sync_prefs: Arc<dyn SyncPrefs>,
        favicon_cache: Arc<dyn FaviconCache>,
    ) -> Self {
        let local_tab_pool = TabNodePool::new(
            settings.free_nodes_high_watermark,
            settings.free_nodes_low_watermark,
        );

        Self {
            settings,
            state: SyncState::Uninitialized,
            session_tracker: SyncedSessionTracker::new(),
            local_tab_pool,
            local_tab_map: HashMap::new(),
            orphaned_local_tabs: HashSet::new(),
            local_source,
            device_info,
            sync_prefs,
            favicon_cache,
            current_machine_tag: String::new(),
            current_session_name: String::new(),
            local_header_missing: false,
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn current_machine_tag(&self) -> &str {
        &self.current_machine_tag
    }

    pub fn current_session_name(&self) -> &str {
        &self.current_session_name
    }

    pub fn tracker(&self) -> &SyncedSessionTracker {
        &self.session_tracker
    }

    pub fn tab_node_pool(&self) -> &TabNodePool {
        &self.local_tab_pool
    }

    /// Node currently held by a local tab
    pub fn local_tab_node_id(&self, tab_id: TabId) -> Option<TabNodeId> {
        self.local_tab_map.get(&tab_id).map(|link| link.tab_node_id)
    }

    /// Build the tracker from the store's full snapshot and start syncing
    pub fn merge_data_and_start_syncing(
        &mut self,
        initial_sync_data: &[SyncData],
    ) -> Result<MergeOutcome> {
        if matches!(self.state, SyncState::Merging | SyncState::Active) {
            return Err(SyncError::AlreadySyncing);
        }

        tracing::info!(records = initial_sync_data.len(), "Starting session sync merge");

        self.reset_association_state();
        self.state = SyncState::Merging;

        match self.merge_from(initial_sync_data) {
            Ok(outcome) => {
                self.state = SyncState::Active;
                tracing::info!(
                    machine_tag = %self.current_machine_tag,
                    changes = outcome.changes.len(),
                    foreign_sessions = outcome.foreign_sessions,
                    dropped_records = outcome.errors.len(),
                    "Session sync merge complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!(error = %e, "Session sync merge failed");
                self.reset_association_state();
                self.state = SyncState::Uninitialized;
                Err(e)
            }
        }
    }

    fn reset_association_state(&mut self) {
        self.session_tracker.clear();
        self.local_tab_pool.clear();
        self.local_tab_map.clear();
        self.orphaned_local_tabs.clear();
        self.local_header_missing = false;
    }

    fn merge_from(&mut self, initial_sync_data: &[SyncData]) -> Result<MergeOutcome> {
        self.initialize_current_machine_tag()?;
        self.current_session_name = self.device_info.client_name();
        self.session_tracker
            .set_local_session_tag(self.current_machine_tag.clone());

        let mut changes = SyncChangeList::new();
        let mut errors = Vec::new();
        let reused_local_header =
            self.init_from_sync_model(initial_sync_data, &mut changes, &mut errors);

        let device_type = self.device_info.device_type();
        {
            let local = self.session_tracker.get_session(&self.current_machine_tag);
            local.session_name = self.current_session_name.clone();
            local.device_type = device_type;
        }

        if !reused_local_header {
            let header = SessionHeader {
                windows: Vec::new(),
                client_name: Some(self.current_session_name.clone()),
                device_type: Some(device_type),
            };
            let specifics = SessionSpecifics::new_header(&self.current_machine_tag, header);
            changes.push(SyncChange::add(SyncData::local(
                &self.current_machine_tag,
                &self.current_session_name,
                &specifics,
            )?));
        }

        self.associate_windows(ReloadTabsOption::ReloadTabs, &mut changes)?;

        Ok(MergeOutcome {
            changes,
            reused_local_header,
            foreign_sessions: self.session_tracker.num_synced_sessions().saturating_sub(1),
            errors,
        })
    }

    /// Restore the machine tag from prefs, or derive and persist a new one
    fn initialize_current_machine_tag(&mut self) -> Result<()> {
        let machine_tag = match self.sync_prefs.sessions_guid()? {
            Some(machine_tag) => {
                tracing::debug!(machine_tag = %machine_tag, "Restored machine tag");
                machine_tag
            }
            None => {
                let machine_tag = build_machine_tag(&self.device_info.cache_guid());
                self.sync_prefs.set_sessions_guid(&machine_tag)?;
                tracing::info!(machine_tag = %machine_tag, "Created machine tag");
                machine_tag
            }
        };

        self.local_tab_pool.set_machine_tag(&machine_tag);
        self.current_machine_tag = machine_tag;
        Ok(())
    }

    /// Sort the initial snapshot into foreign sessions, our own header and
    /// our own tab nodes. Returns true if a local header was found.
    fn init_from_sync_model(
        &mut self,
        initial_sync_data: &[SyncData],
        changes: &mut SyncChangeList,
        errors: &mut Vec<SyncError>,
    ) -> bool {
        let mut found_current_header = false;

        for data in initial_sync_data {
            let specifics = match data.session_specifics() {
                Ok(specifics) => specifics,
                Err(e) => {
                    tracing::warn!(tag = %data.tag, error = %e, "Dropping undecodable session record");
                    if matches!(parse_tab_node_tag(&data.tag), Some((machine_tag, _)) if machine_tag == self.current_machine_tag)
                    {
                        changes.push(SyncChange::delete(SyncData::local_delete(&data.tag)));
                    }
                    errors.push(e);
                    continue;
                }
            };

            if let Err(e) = specifics.validate() {
                tracing::warn!(tag = %data.tag, error = %e, "Dropping malformed session record");
                if specifics.tab_node_id.is_some() {
                    changes.push(SyncChange::delete(SyncData::local_delete(&data.tag)));
                }
                errors.push(e);
                continue;
            }

            if specifics.session_tag != self.current_machine_tag {
                let modified_time = data.modified_time.unwrap_or_else(Utc::now);
                if let Err(e) = self.update_tracker_with_foreign_session(&specifics, modified_time) {
                    errors.push(e);
                }
            } else if let Some(header) = &specifics.header {
                if found_current_header {
                    tracing::warn!(tag = %data.tag, "Found more than one local session header");
                    if data.tag != self.current_machine_tag {
                        changes.push(SyncChange::delete(SyncData::local_delete(&data.tag)));
                    }
                    continue;
                }
                found_current_header = true;
                if let Some(name) = header.client_name.as_ref().filter(|name| !name.is_empty()) {
                    self.current_session_name = name.clone();
                }
            } else if let Some(tab_node_id) = specifics.tab_node_id {
                let last_tab_id = specifics.tab.as_ref().and_then(|tab| tab.tab_id);
                self.local_tab_pool.add_tab_node(tab_node_id, last_tab_id);
            } else {
                tracing::warn!(tag = %data.tag, "Local session record has neither header nor tab");
                changes.push(SyncChange::delete(SyncData::local_delete(&data.tag)));
                errors.push(SyncError::malformed(&data.tag, "record has neither header nor tab"));
            }
        }

        found_current_header
    }

    /// Rebuild the local session's window list from the host and publish
    /// the header. With `ReloadTabs` every tab is re-associated first.
    ///
    /// Fails with `MissingHeader` once the local header has been deleted
    /// from the store; the caller must then re-run the merge.
    pub fn associate_windows(
        &mut self,
        option: ReloadTabsOption,
        changes: &mut SyncChangeList,
    ) -> Result<()> {
        if self.local_header_missing {
            return Err(SyncError::MissingHeader(self.current_machine_tag.clone()));
        }

        let local_tag = self.current_machine_tag.clone();
        let now = Utc::now();
        let device_type = self.device_info.device_type();
        {
            let local = self.session_tracker.get_session(&local_tag);
            local.session_name = self.current_session_name.clone();
            local.device_type = device_type;
            local.modified_time = now;
        }

        let mut header = SessionHeader {
            windows: Vec::new(),
            client_name: Some(self.current_session_name.clone()),
            device_type: Some(device_type),
        };

        self.session_tracker.reset_session_tracking(&local_tag);
        let mut seen_tabs = HashSet::new();

        let windows = self.local_source.synced_windows();
        for window in &windows {
            let window = window.as_ref();
            if !window.has_window() || window.tab_count() == 0 || !self.should_sync_window(window) {
                continue;
            }

            let mut window_specifics = SessionWindowSpecifics {
                window_id: window.window_id(),
                selected_tab_index: window.selected_tab_index(),
                browser_type: if window.is_type_popup() {
                    BrowserType::Popup
                } else {
                    BrowserType::Tabbed
                },
                tabs: Vec::new(),
            };

            for index in 0..window.tab_count() {
                let Some(tab) = window.tab_at(index) else {
                    continue;
                };
                let tab_id = tab.tab_id();

                if option == ReloadTabsOption::ReloadTabs || self.orphaned_local_tabs.contains(&tab_id) {
                    self.orphaned_local_tabs.remove(&tab_id);
                    match self.associate_tab(tab, changes) {
                        Ok(_) | Err(SyncError::IneligibleTab(_)) => {}
                        Err(e) => return Err(e),
                    }
                }

                if self.local_tab_map.contains_key(&tab_id) {
                    seen_tabs.insert(tab_id);
                    window_specifics.tabs.push(tab_id);
                }
            }

            if !window_specifics.tabs.is_empty() {
                self.session_tracker
                    .put_window_in_session(&local_tag, window_specifics.window_id);
                self.build_synced_session_from_specifics(&local_tag, &window_specifics, now);
                header.windows.push(window_specifics);
            }
        }

        self.release_unseen_local_tabs(&seen_tabs, changes);
        self.local_tab_pool.delete_unassociated_tab_nodes(changes);
        self.session_tracker.cleanup_session(&local_tag);

        tracing::debug!(
            windows = header.windows.len(),
            tabs = seen_tabs.len(),
            "Associated local windows"
        );

        let specifics = SessionSpecifics::new_header(&local_tag, header);
        changes.push(SyncChange::update(SyncData::local(
            &local_tag,
            &self.current_session_name,
            &specifics,
        )?));
        Ok(())
    }

    /// Free the nodes of linked tabs that are no longer open and eligible
    fn release_unseen_local_tabs(&mut self, seen_tabs: &HashSet<TabId>, changes: &mut SyncChangeList) {
        let stale: Vec<TabId> = self
            .local_tab_map
            .keys()
            .filter(|tab_id| !seen_tabs.contains(tab_id))
            .copied()
            .collect();

        for tab_id in stale {
            self.local_tab_map.remove(&tab_id);
            if let Some(tab_node_id) = self.local_tab_pool.free(tab_id, changes) {
                tracing::debug!(tab_id, tab_node_id, "Released node of closed tab");
            }
        }
    }

    /// Publish one local tab, allocating a node for it if it has none
    ///
    /// Closing tabs give their node back. Tabs that fail `should_sync_tab`
    /// return `IneligibleTab`, which callers treat as a skip.
    pub fn associate_tab(
        &mut self,
        tab: &dyn SyncedTabDelegate,
        changes: &mut SyncChangeList,
    ) -> Result<TabNodeId> {
        let tab_id = tab.tab_id();

        if tab.is_being_destroyed() || !self.should_sync_tab(tab) {
            if self.local_tab_map.remove(&tab_id).is_some() {
                if let Some(tab_node_id) = self.local_tab_pool.free(tab_id, changes) {
                    tracing::debug!(tab_id, tab_node_id, "Freed node of tab leaving sync");
                }
            }
            return Err(SyncError::IneligibleTab(tab_id));
        }

        let tab_node_id = match self.local_tab_map.get(&tab_id) {
            Some(link) => link.tab_node_id,
            None => {
                let tab_node_id = self.claim_tab_node(tab, changes)?;
                self.local_tab_map.insert(
                    tab_id,
                    TabLink {
                        tab_node_id,
                        url: None,
                    },
                );
                tab_node_id
            }
        };

        let tab_specifics = self.local_tab_to_specifics(tab);
        let specifics =
            SessionSpecifics::new_tab(&self.current_machine_tag, tab_node_id, tab_specifics.clone());
        changes.push(SyncChange::update(SyncData::local(
            tab_node_tag(&self.current_machine_tag, tab_node_id),
            tab.current_title().unwrap_or_default(),
            &specifics,
        )?));

        let now = Utc::now();
        self.session_tracker
            .get_tab(&self.current_machine_tag, tab_id, tab_node_id)
            .set_from_specifics(&tab_specifics, now);
        self.session_tracker
            .get_session(&self.current_machine_tag)
            .modified_time = now;

        let current_url = tab.current_url().and_then(|url| Url::parse(url).ok());
        if let Some(link) = self.local_tab_map.get_mut(&tab_id) {
            if link.url != current_url {
                if let Some(page_url) = &current_url {
                    let favicon_url = tab.current_favicon_url().and_then(|url| Url::parse(url).ok());
                    self.favicon_cache
                        .on_favicon_visited(page_url, favicon_url.as_ref(), now);
                }
                link.url = current_url;
            }
        }

        tracing::debug!(tab_id, tab_node_id, "Associated tab");
        Ok(tab_node_id)
    }

    /// Pick a node for a tab that has none linked yet
    ///
    /// An existing association wins: the node the host remembers for the
    /// tab, then an unclaimed node whose record last held this tab. If that
    /// node already belongs to another live tab, the newcomer gets a fresh
    /// node instead.
    fn claim_tab_node(
        &mut self,
        tab: &dyn SyncedTabDelegate,
        changes: &mut SyncChangeList,
    ) -> Result<TabNodeId> {
        let tab_id = tab.tab_id();

        if let Some(sync_id) = tab.sync_id() {
            if self.local_tab_pool.reassociate(sync_id, tab_id) {
                tracing::debug!(tab_id, tab_node_id = sync_id, "Reclaimed tab node");
                return Ok(sync_id);
            }
            if let Some(owner) = self.local_tab_pool.tab_for_node(sync_id) {
                tracing::warn!(
                    tab_id,
                    tab_node_id = sync_id,
                    owner_tab_id = owner,
                    "Tab node already owned by another tab, allocating a new one"
                );
            }
        }

        let tab_node_id = match self.local_tab_pool.unassociated_node_for_tab(tab_id) {
            Some(tab_node_id) if self.local_tab_pool.reassociate(tab_node_id, tab_id) => {
                tracing::debug!(tab_id, tab_node_id, "Reclaimed tab node by tab id");
                tab_node_id
            }
            _ => self.local_tab_pool.allocate(tab_id, changes)?,
        };

        if tab.sync_id() != Some(tab_node_id) {
            self.local_source.set_sync_id(tab_id, tab_node_id);
        }
        Ok(tab_node_id)
    }

    /// Serialize a local tab, keeping at most `max_sync_navigation_count`
    /// entries on each side of the current one
    fn local_tab_to_specifics(&self, tab: &dyn SyncedTabDelegate) -> SessionTabSpecifics {
        let max_count = self.settings.max_sync_navigation_count;
        let current = tab.current_entry_index();
        let entries = tab.navigations();
        let first = current.saturating_sub(max_count);
        let end = current.saturating_add(max_count + 1).min(entries.len());

        let mut navigations = Vec::new();
        let mut current_navigation_index = 0;
        for (index, navigation) in entries.iter().enumerate().take(end).skip(first) {
            if !navigation.has_valid_url() {
                continue;
            }
            if index <= current {
                current_navigation_index = navigations.len();
            }
            navigations.push(navigation.clone());
        }

        SessionTabSpecifics {
            tab_id: Some(tab.tab_id()),
            window_id: tab.window_id(),
            tab_visual_index: 0,
            current_navigation_index,
            pinned: tab.is_pinned(),
            extension_app_id: tab.extension_app_id().map(str::to_string),
            navigations,
        }
    }

    /// Only tabbed and popup windows of the synced profile are published
    pub fn should_sync_window(&self, window: &dyn SyncedWindowDelegate) -> bool {
        if window.is_app() || window.is_off_the_record() {
            return false;
        }
        window.is_type_tabbed() || window.is_type_popup()
    }

    pub fn should_sync_tab(&self, tab: &dyn SyncedTabDelegate) -> bool {
        if tab.profile_id() != self.settings.profile_id || tab.is_off_the_record() {
            return false;
        }
        match self.local_source.synced_window(tab.window_id()) {
            Some(window) if self.should_sync_window(window.as_ref()) => {}
            _ => return false,
        }
        if tab.entry_count() == 0 {
            return false;
        }
        tab.navigations()
            .iter()
            .any(|navigation| is_syncable_url(&navigation.url))
    }

    /// A local tab changed: navigated, retitled, pinned, closing
    pub fn on_local_tab_modified(&mut self, tab: &dyn SyncedTabDelegate) -> Result<SyncChangeList> {
        self.ensure_active()?;

        let mut changes = SyncChangeList::new();
        match self.associate_tab(tab, &mut changes) {
            Ok(_) => {}
            Err(SyncError::IneligibleTab(tab_id)) => {
                tracing::debug!(tab_id, "Skipping tab not eligible for sync");
            }
            Err(e) => return Err(e),
        }
        self.associate_windows(ReloadTabsOption::DontReloadTabs, &mut changes)?;
        Ok(changes)
    }

    /// A window opened, closed or had its tabs rearranged
    pub fn on_browser_opened(&mut self) -> Result<SyncChangeList> {
        self.ensure_active()?;

        let mut changes = SyncChangeList::new();
        self.associate_windows(ReloadTabsOption::DontReloadTabs, &mut changes)?;
        Ok(changes)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == SyncState::Active {
            Ok(())
        } else {
            Err(SyncError::NotSyncing)
        }
    }

    /// Tell the favicon cache about refreshed favicons of pages open in a
    /// local tab; other pages are ignored. Returns how many were forwarded.
    pub fn forward_relevant_favicon_updates_to_favicon_cache<'a, I>(
        &self,
        updated_page_urls: I,
    ) -> usize
    where
        I: IntoIterator<Item = &'a Url>,
    {
        let open: HashSet<&Url> = self
            .local_tab_map
            .values()
            .filter_map(|link| link.url.as_ref())
            .collect();

        let now = Utc::now();
        let mut forwarded = HashSet::new();
        for page_url in updated_page_urls {
            if open.contains(page_url) && forwarded.insert(page_url) {
                self.favicon_cache.on_page_favicon_updated(page_url, now);
            }
        }
        forwarded.len()
    }

    /// Apply remote changes. Every change is attempted; the first failure
    /// is returned after the rest have been applied.
    pub fn process_sync_changes(&mut self, change_list: &[SyncChange]) -> Result<()> {
        self.ensure_active()?;

        let mut first_error = None;
        for change in change_list {
            if let Err(e) = self.process_sync_change(change) {
                tracing::warn!(tag = %change.tag(), error = %e, "Dropping session change");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn process_sync_change(&mut self, change: &SyncChange) -> Result<()> {
        match change.change_type {
            SyncChangeType::Delete => {
                self.process_remote_delete(&change.data);
                Ok(())
            }
            SyncChangeType::Add | SyncChangeType::Update => {
                let specifics = change.data.session_specifics()?;
                if specifics.session_tag == self.current_machine_tag {
                    tracing::warn!(tag = %change.tag(), "Dropping modification to local session");
                    return Ok(());
                }
                let modified_time = change.data.modified_time.unwrap_or_else(Utc::now);
                self.update_tracker_with_foreign_session(&specifics, modified_time)
            }
        }
    }

    fn process_remote_delete(&mut self, data: &SyncData) {
        // Deletes usually arrive without a payload, so fall back to the tag
        let (session_tag, tab_node_id) = match data.session_specifics() {
            Ok(specifics) => (specifics.session_tag, specifics.tab_node_id),
            Err(_) => match parse_tab_node_tag(&data.tag) {
                Some((machine_tag, tab_node_id)) => (machine_tag.to_string(), Some(tab_node_id)),
                None => (data.tag.clone(), None),
            },
        };

        if session_tag != self.current_machine_tag {
            match tab_node_id {
                None => {
                    self.disassociate_foreign_session(&session_tag);
                }
                // The header update that drops the tab follows separately
                Some(tab_node_id) => {
                    if self.session_tracker.delete_tab_node(&session_tag, tab_node_id) {
                        tracing::debug!(session_tag = %session_tag, tab_node_id, "Foreign tab node deleted");
                    }
                }
            }
            return;
        }

        match tab_node_id {
            None => {
                tracing::warn!(machine_tag = %session_tag, "Local session header deleted remotely");
                self.local_header_missing = true;
            }
            Some(tab_node_id) => {
                tracing::warn!(tab_node_id, "Local tab node deleted remotely");
                self.session_tracker.delete_tab_node(&session_tag, tab_node_id);
                if let Some(tab_id) = self.local_tab_pool.forget(tab_node_id) {
                    self.local_tab_map.remove(&tab_id);
                    self.orphaned_local_tabs.insert(tab_id);
                }
            }
        }
    }

    /// Apply one foreign record to the tracker
    pub fn update_tracker_with_foreign_session(
        &mut self,
        specifics: &SessionSpecifics,
        modified_time: DateTime<Utc>,
    ) -> Result<()> {
        specifics.validate()?;
        let session_tag = specifics.session_tag.as_str();
        if session_tag == self.current_machine_tag {
            tracing::warn!("Ignoring foreign record carrying the local machine tag");
            return Ok(());
        }

        if let Some(header) = &specifics.header {
            populate_session_header_from_specifics(
                header,
                modified_time,
                self.session_tracker.get_session(session_tag),
            );

            self.session_tracker.reset_session_tracking(session_tag);
            for window in &header.windows {
                self.session_tracker
                    .put_window_in_session(session_tag, window.window_id);
                self.build_synced_session_from_specifics(session_tag, window, modified_time);
            }
            self.session_tracker.cleanup_session(session_tag);

            tracing::debug!(
                session_tag = %session_tag,
                windows = header.windows.len(),
                "Updated foreign session header"
            );
        } else if let (Some(tab), Some(tab_node_id)) = (&specifics.tab, specifics.tab_node_id) {
            let Some(tab_id) = tab.tab_id else {
                return Err(SyncError::malformed(session_tag, "tab without tab_id"));
            };
            self.session_tracker
                .get_tab(session_tag, tab_id, tab_node_id)
                .set_from_specifics(tab, modified_time);
            self.refresh_favicon_visit_times_from_foreign_tab(tab, modified_time);

            let session = self.session_tracker.get_session(session_tag);
            if session.modified_time < modified_time {
                session.modified_time = modified_time;
            }
            tracing::debug!(session_tag = %session_tag, tab_id, tab_node_id, "Updated foreign tab");
        } else if let Some(tab_node_id) = specifics.tab_node_id {
            // Nothing to show, but the node still has to be tombstoned with
            // its session
            self.session_tracker.put_tab_node(session_tag, tab_node_id);
            tracing::debug!(session_tag = %session_tag, tab_node_id, "Recorded empty foreign tab node");
        } else {
            return Err(SyncError::malformed(session_tag, "record has neither header nor tab"));
        }

        Ok(())
    }

    /// Lay out one window of a session from its header entry
    fn build_synced_session_from_specifics(
        &mut self,
        session_tag: &str,
        specifics: &SessionWindowSpecifics,
        modified_time: DateTime<Utc>,
    ) {
        {
            let session = self.session_tracker.get_session(session_tag);
            if let Some(window) = session.windows.get_mut(&specifics.window_id) {
                window.selected_tab_index = specifics.selected_tab_index;
                window.window_type = specifics.browser_type;
                window.timestamp = modified_time;
            }
        }

        for (index, tab_id) in specifics.tabs.iter().enumerate() {
            self.session_tracker
                .put_tab_in_window(session_tag, specifics.window_id, *tab_id, index);
        }
    }

    fn refresh_favicon_visit_times_from_foreign_tab(
        &self,
        tab: &SessionTabSpecifics,
        modified_time: DateTime<Utc>,
    ) {
        for navigation in &tab.navigations {
            let Some(favicon_url) = navigation.favicon_url.as_deref() else {
                continue;
            };
            match (Url::parse(&navigation.url), Url::parse(favicon_url)) {
                (Ok(page_url), Ok(favicon_url)) => {
                    self.favicon_cache
                        .on_received_sync_favicon(&page_url, &favicon_url, modified_time);
                }
                _ => tracing::debug!(url = %navigation.url, "Skipping unparsable favicon reference"),
            }
        }
    }

    /// Forget a foreign session locally without deleting it from the store
    pub fn disassociate_foreign_session(&mut self, session_tag: &str) -> bool {
        if session_tag == self.current_machine_tag {
            tracing::warn!("Refusing to disassociate the local session");
            return false;
        }
        let removed = self.session_tracker.delete_session(session_tag);
        if removed {
            tracing::info!(session_tag = %session_tag, "Disassociated foreign session");
        }
        removed
    }

    /// Delete a foreign session from the store and the tracker
    ///
    /// Appends a tombstone for every tab node the session owns, then the
    /// header delete. Tabs the header lists without a known node cannot be
    /// tombstoned; they are reported as `MissingTabs` after the rest of the
    /// session has been deleted.
    pub fn delete_foreign_session(
        &mut self,
        session_tag: &str,
        changes: &mut SyncChangeList,
    ) -> Result<()> {
        if session_tag == self.current_machine_tag {
            tracing::error!(session_tag = %session_tag, "Attempted to delete the local session");
            return Err(SyncError::LocalSessionDeletion(session_tag.to_string()));
        }
        if self.session_tracker.lookup_session(session_tag).is_none() {
            return Ok(());
        }

        let tab_node_ids = self.session_tracker.lookup_tab_node_ids(session_tag);
        let missing_tabs = self.session_tracker.lookup_missing_tabs(session_tag);

        for tab_node_id in &tab_node_ids {
            changes.push(tombstone_tab_node(session_tag, *tab_node_id));
        }
        changes.push(SyncChange::delete(SyncData::local_delete(session_tag)));
        self.disassociate_foreign_session(session_tag);

        tracing::info!(
            session_tag = %session_tag,
            tab_nodes = tab_node_ids.len(),
            "Deleted foreign session"
        );

        if missing_tabs.is_empty() {
            Ok(())
        } else {
            tracing::warn!(
                session_tag = %session_tag,
                missing = missing_tabs.len(),
                "Deleted session referenced tabs without nodes"
            );
            Err(SyncError::MissingTabs {
                session_tag: session_tag.to_string(),
                tab_ids: missing_tabs,
            })
        }
    }

    /// Tombstone for the node a tab record lives in; `None` for records
    /// without a node
    pub fn tombstone_tab(&self, specifics: &SessionSpecifics) -> Option<SyncChange> {
        let tab_node_id = specifics.tab_node_id?;
        let session_tag = if specifics.session_tag.is_empty() {
            &self.current_machine_tag
        } else {
            &specifics.session_tag
        };
        Some(tombstone_tab_node(session_tag, tab_node_id))
    }

    /// Delete every foreign session not modified within the stale threshold
    pub fn do_garbage_collection(&mut self, now: DateTime<Utc>) -> Result<SyncChangeList> {
        self.ensure_active()?;

        let cutoff = now - self.settings.stale_session_threshold;
        let stale = self.session_tracker.foreign_sessions_modified_before(cutoff);
        let mut changes = SyncChangeList::new();

        for session_tag in &stale {
            match self.delete_foreign_session(session_tag, &mut changes) {
                Ok(()) | Err(SyncError::MissingTabs { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if !stale.is_empty() {
            tracing::info!(deleted = stale.len(), "Garbage collected stale foreign sessions");
        }
        Ok(changes)
    }

    /// Every local record as it should exist in the store
    pub fn get_all_sync_data(&self) -> Result<Vec<SyncData>> {
        let Some(session) = self.session_tracker.lookup_local_session() else {
            return Ok(Vec::new());
        };

        let mut header = session.to_session_header();
        header.client_name = Some(self.current_session_name.clone());
        let mut records = vec![SyncData::local(
            &self.current_machine_tag,
            &self.current_session_name,
            &SessionSpecifics::new_header(&self.current_machine_tag, header),
        )?];

        for window in session.windows.values() {
            for tab in window.tabs.iter().filter_map(|tab_id| session.tab(*tab_id)) {
                let Some(tab_node_id) = self.local_tab_node_id(tab.tab_id).or(tab.tab_node_id) else {
                    continue;
                };
                let title = tab
                    .current_navigation()
                    .map(|navigation| navigation.title.clone())
                    .unwrap_or_default();
                records.push(SyncData::local(
                    tab_node_tag(&self.current_machine_tag, tab_node_id),
                    title,
                    &SessionSpecifics::new_tab(&self.current_machine_tag, tab_node_id, tab.to_specifics()),
                )?);
            }
        }

        Ok(records)
    }

    /// Foreign sessions with something to show, most recent first
    pub fn get_all_foreign_sessions(&self) -> Vec<&SyncedSession> {
        self.session_tracker.lookup_all_foreign_sessions()
    }

    pub fn get_foreign_session(&self, session_tag: &str) -> Option<&SyncedSession> {
        if session_tag == self.current_machine_tag {
            return None;
        }
        self.session_tracker.lookup_session(session_tag)
    }

    pub fn get_foreign_tab(&self, session_tag: &str, tab_id: TabId) -> Option<&SessionTab> {
        self.get_foreign_session(session_tag)
            .and_then(|session| session.tab(tab_id))
    }

    pub fn synced_favicon_for_page_url(&self, page_url: &str) -> Option<Vec<u8>> {
        let page_url = Url::parse(page_url).ok()?;
        self.favicon_cache.synced_favicon_for_page_url(&page_url)
    }

    /// Stop publishing. Sessions already in the tracker stay readable.
    pub fn stop_syncing(&mut self) {
        if self.state == SyncState::Stopped {
            return;
        }
        self.local_tab_pool.clear();
        self.local_tab_map.clear();
        self.orphaned_local_tabs.clear();
        self.local_header_missing = false;
        self.state = SyncState::Stopped;

        tracing::info!(machine_tag = %self.current_machine_tag, "Stopped session sync");
    }
}

fn populate_session_header_from_specifics(
    header: &SessionHeader,
    modified_time: DateTime<Utc>,
    session: &mut SyncedSession,
) {
    if let Some(client_name) = &header.client_name {
        session.session_name = client_name.clone();
    }
    if let Some(device_type) = header.device_type {
        session.device_type = device_type;
    }
    if session.modified_time < modified_time {
        session.modified_time = modified_time;
    }
}

fn tombstone_tab_node(session_tag: &str, tab_node_id: TabNodeId) -> SyncChange {
    SyncChange::delete(SyncData::local_delete(tab_node_tag(session_tag, tab_node_id)))
}

/// True for pages worth showing on another device
pub fn is_syncable_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed.as_str() == HISTORY_URL || !NON_SYNCED_SCHEMES.contains(&parsed.scheme()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::SyncPrefs;
    use crate::test_support::*;
    use axiom_tabs::WindowType;
    use std::collections::BTreeSet;

    fn header_of(changes: &SyncChangeList) -> SessionHeader {
        changes
            .get(LOCAL_TAG)
            .unwrap()
            .data
            .session_specifics()
            .unwrap()
            .header
            .unwrap()
    }

    fn local_tab_node_ids(h: &Harness) -> BTreeSet<TabNodeId> {
        h.manager.tracker().lookup_mapped_tab_node_ids(LOCAL_TAG)
    }

    #[test]
    fn test_merge_empty_snapshot_creates_header() {
        let mut h = Harness::new();
        let outcome = h.merge(&[]);

        assert_eq!(h.manager.state(), SyncState::Active);
        assert_eq!(h.manager.current_machine_tag(), LOCAL_TAG);
        assert!(!outcome.reused_local_header);
        assert_eq!(outcome.changes.len(), 1);

        let change = &outcome.changes.as_slice()[0];
        assert_eq!(change.change_type, SyncChangeType::Add);
        assert_eq!(change.tag(), LOCAL_TAG);
        assert!(header_of(&outcome.changes).windows.is_empty());

        let local = h.manager.tracker().lookup_local_session().unwrap();
        assert!(local.windows.is_empty());
        assert_eq!(local.session_name, "Test Device");
        assert_eq!(h.manager.tracker().num_synced_sessions(), 1);
        assert_eq!(h.prefs.sessions_guid().unwrap().as_deref(), Some(LOCAL_TAG));
    }

    #[test]
    fn test_merge_restores_persisted_machine_tag() {
        let mut h = Harness::new();
        h.prefs.set_sessions_guid("session_syncprevious").unwrap();
        h.merge(&[]);
        assert_eq!(h.manager.current_machine_tag(), "session_syncprevious");
    }

    #[test]
    fn test_merge_twice_is_rejected() {
        let mut h = Harness::new();
        h.merge(&[]);
        assert!(matches!(
            h.manager.merge_data_and_start_syncing(&[]),
            Err(SyncError::AlreadySyncing)
        ));
    }

    #[test]
    fn test_merge_associates_eligible_tabs() {
        let mut h = Harness::new();
        let window = h.open_window();
        let a = h.open_tab(window, "https://a.com/");
        let b = h.open_tab(window, "https://b.com/");
        let blank = h.tabs.create_blank_tab(window).unwrap().id;
        let internal = h.open_tab(window, "axiom://settings/");

        let outcome = h.merge(&[]);

        let tags: Vec<&str> = outcome.changes.iter().map(|c| c.tag()).collect();
        assert_eq!(
            tags,
            vec![
                LOCAL_TAG,
                "session_synccache-guid 1",
                "session_synccache-guid 2"
            ]
        );
        assert!(outcome
            .changes
            .iter()
            .all(|c| c.change_type == SyncChangeType::Add));

        let header = header_of(&outcome.changes);
        assert_eq!(header.windows.len(), 1);
        assert_eq!(header.windows[0].tabs, vec![a, b]);

        // New nodes publish with their contents in the same record
        let record = outcome
            .changes
            .get("session_synccache-guid 1")
            .unwrap()
            .data
            .session_specifics()
            .unwrap();
        assert_eq!(record.tab.unwrap().navigations[0].url, "https://a.com/");

        assert_eq!(h.tabs.get_tab(a).unwrap().sync_id, Some(1));
        assert_eq!(h.tabs.get_tab(b).unwrap().sync_id, Some(2));
        assert_eq!(h.manager.local_tab_node_id(blank), None);
        assert_eq!(h.manager.local_tab_node_id(internal), None);
        assert_eq!(h.manager.tracker().num_synced_tabs(LOCAL_TAG), 2);
    }

    #[test]
    fn test_merge_reuses_local_header_and_tab_nodes() {
        let mut h = Harness::new();
        let window = h.open_window();
        let a = h.open_tab(window, "https://a.com/");

        let header = SessionHeader {
            client_name: Some("Old name".to_string()),
            ..Default::default()
        };
        let local_header =
            SyncData::remote(LOCAL_TAG, &SessionSpecifics::new_header(LOCAL_TAG, header), at(100))
                .unwrap();
        let local_tab = SyncData::remote(
            tab_node_tag(LOCAL_TAG, 5),
            &SessionSpecifics::new_tab(LOCAL_TAG, 5, tab_specifics(a, window, "https://a.com/")),
            at(100),
        )
        .unwrap();

        let outcome = h.merge(&[local_header, local_tab]);

        assert!(outcome.reused_local_header);
        assert_eq!(h.manager.current_session_name(), "Old name");
        assert_eq!(h.manager.local_tab_node_id(a), Some(5));
        assert_eq!(outcome.changes.len(), 2);
        assert_eq!(
            outcome.changes.get(LOCAL_TAG).unwrap().change_type,
            SyncChangeType::Update
        );
        assert_eq!(
            outcome
                .changes
                .get(&tab_node_tag(LOCAL_TAG, 5))
                .unwrap()
                .change_type,
            SyncChangeType::Update
        );
        assert_eq!(h.tabs.get_tab(a).unwrap().sync_id, Some(5));
    }

    #[test]
    fn test_unclaimed_local_nodes_are_freed_then_reused() {
        let mut h = Harness::new();
        let stale = SyncData::remote(
            tab_node_tag(LOCAL_TAG, 7),
            &SessionSpecifics::new_tab(LOCAL_TAG, 7, tab_specifics(999, 1, "https://old.com/")),
            at(100),
        )
        .unwrap();

        let outcome = h.merge(&[stale]);
        assert_eq!(h.manager.tab_node_pool().free_count(), 1);
        assert_eq!(h.manager.tab_node_pool().unassociated_count(), 0);
        assert!(outcome.changes.iter().all(|c| !c.is_delete()));

        let window = h.open_window();
        let tab = h.tabs.create_tab(window, "https://new.com/".to_string()).unwrap();
        let changes = h.manager.on_local_tab_modified(&tab).unwrap();

        assert_eq!(h.manager.local_tab_node_id(tab.id), Some(7));
        assert_eq!(
            changes
                .get(&tab_node_tag(LOCAL_TAG, 7))
                .unwrap()
                .change_type,
            SyncChangeType::Update
        );
        assert_eq!(header_of(&changes).windows[0].tabs, vec![tab.id]);
    }

    #[test]
    fn test_merge_tombstones_corrupt_records() {
        let mut h = Harness::new();

        let mut corrupt =
            SessionSpecifics::new_tab("device-X", 3, tab_specifics(1, 1, "https://x.com/"));
        if let Some(tab) = corrupt.tab.as_mut() {
            tab.tab_id = None;
        }
        let corrupt = SyncData::remote("device-X 3", &corrupt, at(10)).unwrap();
        let primary = SyncData::remote(
            LOCAL_TAG,
            &SessionSpecifics::new_header(LOCAL_TAG, SessionHeader::default()),
            at(10),
        )
        .unwrap();
        let duplicate = SyncData::remote(
            "old-client-tag",
            &SessionSpecifics::new_header(LOCAL_TAG, SessionHeader::default()),
            at(10),
        )
        .unwrap();
        let garbage = SyncData {
            tag: "junk".to_string(),
            title: String::new(),
            specifics: Some("not json".to_string()),
            modified_time: None,
        };

        let outcome = h.merge(&[corrupt, primary, duplicate, garbage]);

        assert!(outcome.reused_local_header);
        assert!(outcome.changes.get("device-X 3").unwrap().is_delete());
        assert!(outcome.changes.get("old-client-tag").unwrap().is_delete());
        assert!(outcome.changes.get("junk").is_none());
        assert_eq!(outcome.errors.len(), 2);
        assert!(outcome
            .errors
            .iter()
            .all(|e| matches!(e, SyncError::MalformedRecord { .. })));
        assert!(h.manager.get_foreign_session("device-X").is_none());
    }

    #[test]
    fn test_merge_ingests_foreign_sessions() {
        let mut h = Harness::new();
        let header = foreign_header("device-A", &[(1, &[10])], at(100));
        let mut tab = SessionSpecifics::new_tab("device-A", 3, tab_specifics(10, 1, "https://a.com/"));
        if let Some(tab) = tab.tab.as_mut() {
            tab.navigations[0].favicon_url = Some("https://a.com/favicon.ico".to_string());
        }
        let tab = SyncData::remote("device-A 3", &tab, at(200)).unwrap();

        let outcome = h.merge(&[header, tab]);
        assert_eq!(outcome.foreign_sessions, 1);

        let sessions = h.manager.get_all_foreign_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_tag, "device-A");
        assert_eq!(sessions[0].session_name, "device-A name");
        assert_eq!(sessions[0].modified_time, at(200));
        assert_eq!(
            h.manager.get_foreign_tab("device-A", 10).unwrap().tab_node_id,
            Some(3)
        );

        let received = h.favicons.received.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_str(), "https://a.com/");
        assert_eq!(received[0].1.as_str(), "https://a.com/favicon.ico");
        assert_eq!(received[0].2, at(200));
    }

    #[test]
    fn test_other_profile_and_incognito_tabs_are_not_synced() {
        let mut h = Harness::with_settings(SyncSettings::new("Other"));
        let window = h.open_window();
        h.open_tab(window, "https://a.com/");
        let outcome = h.merge(&[]);
        assert_eq!(outcome.changes.len(), 1);
        assert!(header_of(&outcome.changes).windows.is_empty());

        let mut h = Harness::new();
        let incognito = h.tabs.open_incognito_window();
        let private_tab = h.open_tab(incognito, "https://a.com/");
        let app = h.tabs.open_window(WindowType::App);
        let app_tab = h.open_tab(app, "https://app.com/");
        h.merge(&[]);
        assert_eq!(h.manager.local_tab_node_id(private_tab), None);
        assert_eq!(h.manager.local_tab_node_id(app_tab), None);

        let app_tab = h.tabs.get_tab(app_tab).unwrap();
        assert!(matches!(
            h.manager.associate_tab(&app_tab, &mut SyncChangeList::new()),
            Err(SyncError::IneligibleTab(_))
        ));
    }

    #[test]
    fn test_syncable_urls() {
        assert!(is_syncable_url("https://a.com/"));
        assert!(is_syncable_url("http://a.com/path?q=1"));
        assert!(is_syncable_url("axiom://history/"));
        assert!(!is_syncable_url("axiom://settings/"));
        assert!(!is_syncable_url("about:blank"));
        assert!(!is_syncable_url("file:///etc/hosts"));
        assert!(!is_syncable_url("not a url"));
    }

    #[test]
    fn test_history_page_keeps_tab_eligible() {
        let mut h = Harness::new();
        let window = h.open_window();
        let history = h.open_tab(window, "axiom://history/");
        h.merge(&[]);
        assert!(h.manager.local_tab_node_id(history).is_some());
    }

    #[test]
    fn test_navigation_history_is_windowed() {
        let mut h = Harness::new();
        let window = h.open_window();
        let tab_id = h.open_tab(window, "https://example.com/0");
        for i in 1..20 {
            h.tabs
                .navigate_tab(tab_id, format!("https://example.com/{}", i), String::new())
                .unwrap();
        }
        h.merge(&[]);

        let tab = h.manager.tracker().lookup_session_tab(LOCAL_TAG, tab_id).unwrap();
        assert_eq!(tab.navigations.len(), 7);
        assert_eq!(tab.navigations[0].url, "https://example.com/13");
        assert_eq!(tab.current_navigation_index, 6);

        for _ in 0..10 {
            h.tabs.go_back(tab_id).unwrap();
        }
        let tab = h.tabs.get_tab(tab_id).unwrap();
        h.manager.on_local_tab_modified(&tab).unwrap();

        let tab = h.manager.tracker().lookup_session_tab(LOCAL_TAG, tab_id).unwrap();
        assert_eq!(tab.navigations.len(), 13);
        assert_eq!(tab.navigations[0].url, "https://example.com/3");
        assert_eq!(tab.current_navigation().unwrap().url, "https://example.com/9");
    }

    #[test]
    fn test_owned_nodes_track_open_tabs() {
        let mut h = Harness::new();
        let window = h.open_window();
        let a = h.open_tab(window, "https://a.com/");
        let b = h.open_tab(window, "https://b.com/");
        let c = h.open_tab(window, "https://c.com/");
        h.merge(&[]);
        assert_eq!(local_tab_node_ids(&h), BTreeSet::from([1, 2, 3]));

        // Close b the way the browser does: mark it closing, report, drop it
        let closing = h.tabs.begin_close_tab(b).unwrap();
        let changes = h.manager.on_local_tab_modified(&closing).unwrap();
        h.tabs.close_tab(b).unwrap();
        assert_eq!(header_of(&changes).windows[0].tabs, vec![a, c]);
        assert_eq!(local_tab_node_ids(&h), BTreeSet::from([1, 3]));
        assert_eq!(h.manager.tab_node_pool().free_count(), 1);

        // The freed node is reused before a new one is introduced
        let d = h.tabs.create_tab(window, "https://d.com/".to_string()).unwrap();
        let changes = h.manager.on_local_tab_modified(&d).unwrap();
        assert_eq!(h.manager.local_tab_node_id(d.id), Some(2));
        assert!(changes
            .iter()
            .all(|change| change.change_type != SyncChangeType::Add));

        // A tab closed without a notification is released on the next pass
        h.tabs.close_tab(a).unwrap();
        h.manager.on_browser_opened().unwrap();
        assert_eq!(local_tab_node_ids(&h), BTreeSet::from([2, 3]));

        let open: BTreeSet<TabNodeId> = h.manager.tab_node_pool().associated_nodes().collect();
        assert_eq!(open, local_tab_node_ids(&h));
    }

    #[test]
    fn test_closing_window_releases_its_tabs() {
        let mut h = Harness::new();
        let first = h.open_window();
        let second = h.open_window();
        h.open_tab(first, "https://a.com/");
        h.open_tab(second, "https://b.com/");
        h.open_tab(second, "https://c.com/");
        h.merge(&[]);

        h.tabs.close_window(second).unwrap();
        let changes = h.manager.on_browser_opened().unwrap();

        assert_eq!(header_of(&changes).windows.len(), 1);
        assert_eq!(local_tab_node_ids(&h), BTreeSet::from([1]));
        assert_eq!(h.manager.tab_node_pool().free_count(), 2);
    }

    #[test]
    fn test_sync_id_collision_keeps_existing_owner() {
        let mut h = Harness::new();
        let window = h.open_window();
        let a = h.open_tab(window, "https://a.com/");
        h.merge(&[]);
        assert_eq!(h.manager.local_tab_node_id(a), Some(1));

        let b = h.open_tab(window, "https://b.com/");
        h.tabs.set_sync_id(b, 1);
        let tab = h.tabs.get_tab(b).unwrap();
        h.manager.on_local_tab_modified(&tab).unwrap();

        assert_eq!(h.manager.local_tab_node_id(a), Some(1));
        assert_eq!(h.manager.local_tab_node_id(b), Some(2));
        assert_eq!(h.tabs.get_tab(b).unwrap().sync_id, Some(2));
    }

    #[test]
    fn test_header_replaces_previous_header() {
        let mut h = Harness::new();
        h.merge(&[]);

        let first = vec![
            SyncChange::add(foreign_header("device-A", &[(1, &[10])], at(100))),
            SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(100))),
        ];
        h.manager.process_sync_changes(&first).unwrap();

        let second = vec![
            SyncChange::update(foreign_header("device-A", &[(1, &[10, 11])], at(200))),
            SyncChange::add(foreign_tab("device-A", 11, 4, "https://eleven.com/", at(200))),
        ];
        h.manager.process_sync_changes(&second).unwrap();

        let session = h.manager.get_foreign_session("device-A").unwrap();
        assert_eq!(session.windows.len(), 1);
        assert_eq!(session.windows[&1].tabs, vec![10, 11]);
        assert_eq!(
            h.manager.tracker().lookup_tab_node_ids("device-A"),
            BTreeSet::from([3, 4])
        );
    }

    #[test]
    fn test_reapplying_changes_is_idempotent() {
        let mut h = Harness::new();
        h.merge(&[]);

        let batch = vec![
            SyncChange::add(foreign_tab("device-A", 11, 4, "https://eleven.com/", at(90))),
            SyncChange::add(foreign_header("device-A", &[(1, &[10, 11]), (2, &[12])], at(100))),
            SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(100))),
        ];
        h.manager.process_sync_changes(&batch).unwrap();
        let once = h.manager.get_foreign_session("device-A").unwrap().clone();

        h.manager.process_sync_changes(&batch).unwrap();
        let twice = h.manager.get_foreign_session("device-A").unwrap().clone();

        assert_eq!(once, twice);
        assert_eq!(once.windows[&1].tabs, vec![10, 11]);
    }

    #[test]
    fn test_bad_record_does_not_stop_the_batch() {
        let mut h = Harness::new();
        h.merge(&[]);

        let bad = SyncData {
            tag: "device-B".to_string(),
            title: String::new(),
            specifics: None,
            modified_time: None,
        };
        let batch = vec![
            SyncChange::add(bad),
            SyncChange::add(foreign_header("device-A", &[(1, &[10])], at(100))),
            SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(100))),
        ];

        let result = h.manager.process_sync_changes(&batch);
        assert!(matches!(result, Err(SyncError::MalformedRecord { .. })));
        assert_eq!(h.manager.get_all_foreign_sessions().len(), 1);
    }

    #[test]
    fn test_remote_changes_to_local_session_are_ignored() {
        let mut h = Harness::new();
        h.merge(&[]);

        let hijack = foreign_header(LOCAL_TAG, &[(1, &[10])], at(100));
        h.manager
            .process_sync_changes(&[SyncChange::update(hijack)])
            .unwrap();

        let local = h.manager.tracker().lookup_local_session().unwrap();
        assert!(local.windows.is_empty());
    }

    #[test]
    fn test_remote_header_delete_drops_foreign_session() {
        let mut h = Harness::new();
        h.merge(&[
            foreign_header("device-A", &[(1, &[10])], at(100)),
            foreign_tab("device-A", 10, 3, "https://ten.com/", at(100)),
        ]);

        let delete = SyncChange::delete(SyncData::local_delete("device-A"));
        h.manager.process_sync_changes(&[delete]).unwrap();
        assert!(h.manager.get_foreign_session("device-A").is_none());
    }

    #[test]
    fn test_remote_local_header_delete_requires_reassociation() {
        let mut h = Harness::new();
        let window = h.open_window();
        let tab_id = h.open_tab(window, "https://a.com/");
        h.merge(&[]);

        let delete = SyncChange::delete(SyncData::local_delete(LOCAL_TAG));
        h.manager.process_sync_changes(&[delete]).unwrap();

        let tab = h.tabs.get_tab(tab_id).unwrap();
        assert!(matches!(
            h.manager.on_local_tab_modified(&tab),
            Err(SyncError::MissingHeader(_))
        ));

        // A fresh merge recovers
        h.manager.stop_syncing();
        let outcome = h.merge(&[]);
        assert_eq!(
            outcome.changes.get(LOCAL_TAG).unwrap().change_type,
            SyncChangeType::Add
        );
        assert!(h.manager.local_tab_node_id(tab_id).is_some());
    }

    #[test]
    fn test_remote_local_tab_node_delete_reallocates() {
        let mut h = Harness::new();
        let window = h.open_window();
        let tab_id = h.open_tab(window, "https://a.com/");
        h.merge(&[]);
        assert_eq!(h.manager.local_tab_node_id(tab_id), Some(1));

        let delete = SyncChange::delete(SyncData::local_delete(tab_node_tag(LOCAL_TAG, 1)));
        h.manager.process_sync_changes(&[delete]).unwrap();
        assert_eq!(h.manager.local_tab_node_id(tab_id), None);

        let changes = h.manager.on_browser_opened().unwrap();
        assert_eq!(h.manager.local_tab_node_id(tab_id), Some(2));
        assert_eq!(
            changes.get(&tab_node_tag(LOCAL_TAG, 2)).unwrap().change_type,
            SyncChangeType::Add
        );
        assert_eq!(header_of(&changes).windows[0].tabs, vec![tab_id]);
    }

    #[test]
    fn test_delete_foreign_session_tombstones_every_node() {
        let mut h = Harness::new();
        h.merge(&[
            foreign_header("device-A", &[(1, &[10, 11])], at(100)),
            foreign_tab("device-A", 10, 3, "https://ten.com/", at(100)),
            foreign_tab("device-A", 11, 4, "https://eleven.com/", at(100)),
            // Unmapped tab: still owns a node
            foreign_tab("device-A", 12, 5, "https://twelve.com/", at(100)),
        ]);

        let mut changes = SyncChangeList::new();
        h.manager.delete_foreign_session("device-A", &mut changes).unwrap();

        let tombstones: Vec<&str> = changes
            .iter()
            .filter(|c| c.is_delete() && c.data.is_tab_node())
            .map(|c| c.tag())
            .collect();
        assert_eq!(tombstones, vec!["device-A 3", "device-A 4", "device-A 5"]);
        assert_eq!(changes.as_slice().last().unwrap().tag(), "device-A");
        assert!(h.manager.get_foreign_session("device-A").is_none());
    }

    #[test]
    fn test_delete_foreign_session_reports_missing_tabs() {
        let mut h = Harness::new();
        h.merge(&[
            foreign_header("device-A", &[(1, &[10, 11])], at(100)),
            foreign_tab("device-A", 10, 3, "https://ten.com/", at(100)),
        ]);

        let mut changes = SyncChangeList::new();
        match h.manager.delete_foreign_session("device-A", &mut changes) {
            Err(SyncError::MissingTabs { session_tag, tab_ids }) => {
                assert_eq!(session_tag, "device-A");
                assert_eq!(tab_ids, vec![11]);
            }
            other => panic!("expected MissingTabs, got {:?}", other),
        }
        assert!(changes.get("device-A 3").unwrap().is_delete());
        assert!(h.manager.get_foreign_session("device-A").is_none());
    }

    fn foreign_placeholder(session_tag: &str, tab_node_id: TabNodeId) -> SyncData {
        SyncData::remote(
            tab_node_tag(session_tag, tab_node_id),
            &SessionSpecifics::new_tab_node(session_tag, tab_node_id),
            at(300),
        )
        .unwrap()
    }

    #[test]
    fn test_delete_foreign_session_tombstones_dropped_and_empty_nodes() {
        let mut h = Harness::new();
        h.merge(&[]);

        h.manager
            .process_sync_changes(&[
                SyncChange::add(foreign_header("device-A", &[(1, &[10])], at(100))),
                SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(100))),
                // Tab 10 closed; its node keeps the old record in the store
                SyncChange::update(foreign_header("device-A", &[(1, &[11])], at(200))),
                SyncChange::add(foreign_tab("device-A", 11, 4, "https://eleven.com/", at(200))),
                SyncChange::add(foreign_placeholder("device-A", 5)),
            ])
            .unwrap();
        assert!(h.manager.get_foreign_tab("device-A", 10).is_none());

        let mut changes = SyncChangeList::new();
        h.manager.delete_foreign_session("device-A", &mut changes).unwrap();

        let tags: Vec<&str> = changes.iter().map(|c| c.tag()).collect();
        assert_eq!(
            tags,
            vec!["device-A 3", "device-A 4", "device-A 5", "device-A"]
        );
        assert!(changes.iter().all(|c| c.is_delete()));
    }

    #[test]
    fn test_deleted_foreign_node_is_not_tombstoned_again() {
        let mut h = Harness::new();
        h.merge(&[
            foreign_header("device-A", &[(1, &[11])], at(100)),
            foreign_tab("device-A", 10, 3, "https://ten.com/", at(100)),
            foreign_tab("device-A", 11, 4, "https://eleven.com/", at(100)),
        ]);

        h.manager
            .process_sync_changes(&[SyncChange::delete(SyncData::local_delete(tab_node_tag(
                "device-A", 3,
            )))])
            .unwrap();
        assert_eq!(
            h.manager.tracker().lookup_tab_node_ids("device-A"),
            BTreeSet::from([4])
        );

        let mut changes = SyncChangeList::new();
        h.manager.delete_foreign_session("device-A", &mut changes).unwrap();
        assert!(changes.get("device-A 3").is_none());
        assert!(changes.get("device-A 4").unwrap().is_delete());
    }

    #[test]
    fn test_late_header_does_not_rewind_modified_time() {
        let mut h = Harness::new();
        h.merge(&[]);

        h.manager
            .process_sync_changes(&[
                SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(500))),
                SyncChange::add(foreign_header("device-A", &[(1, &[10])], at(100))),
            ])
            .unwrap();
        let reversed = h.manager.get_foreign_session("device-A").unwrap().modified_time;

        let mut h = Harness::new();
        h.merge(&[]);
        h.manager
            .process_sync_changes(&[
                SyncChange::add(foreign_header("device-A", &[(1, &[10])], at(100))),
                SyncChange::add(foreign_tab("device-A", 10, 3, "https://ten.com/", at(500))),
            ])
            .unwrap();
        let in_order = h.manager.get_foreign_session("device-A").unwrap().modified_time;

        assert_eq!(reversed, at(500));
        assert_eq!(in_order, at(500));

        // Still fresh for garbage collection relative to the newest record
        let changes = h.manager.do_garbage_collection(at(500) + Duration::days(13)).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_local_session_cannot_be_deleted() {
        let mut h = Harness::new();
        h.merge(&[]);

        let mut changes = SyncChangeList::new();
        assert!(matches!(
            h.manager.delete_foreign_session(LOCAL_TAG, &mut changes),
            Err(SyncError::LocalSessionDeletion(_))
        ));
        assert!(changes.is_empty());
        assert!(!h.manager.disassociate_foreign_session(LOCAL_TAG));
        assert!(h.manager.tracker().lookup_local_session().is_some());
    }

    #[test]
    fn test_tombstone_tab() {
        let mut h = Harness::new();
        h.merge(&[]);

        let tab = SessionSpecifics::new_tab("device-A", 4, tab_specifics(10, 1, "https://a.com/"));
        let tombstone = h.manager.tombstone_tab(&tab).unwrap();
        assert!(tombstone.is_delete());
        assert_eq!(tombstone.tag(), "device-A 4");

        let header = SessionSpecifics::new_header("device-A", SessionHeader::default());
        assert!(h.manager.tombstone_tab(&header).is_none());
    }

    #[test]
    fn test_favicon_updates_forwarded_only_for_open_pages() {
        let mut h = Harness::new();
        let window = h.open_window();
        h.open_tab(window, "http://a.com/");
        h.merge(&[]);

        let updated = [
            Url::parse("http://a.com").unwrap(),
            Url::parse("http://b.com").unwrap(),
        ];
        let forwarded = h
            .manager
            .forward_relevant_favicon_updates_to_favicon_cache(&updated);

        assert_eq!(forwarded, 1);
        let calls = h.favicons.updated.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].as_str(), "http://a.com/");
    }

    #[test]
    fn test_local_navigation_reports_favicon_visit() {
        let mut h = Harness::new();
        let window = h.open_window();
        let tab_id = h.open_tab(window, "https://a.com/");
        h.merge(&[]);
        assert_eq!(h.favicons.visited.lock().len(), 1);

        // Same page again: nothing new to report
        let tab = h.tabs.set_tab_title(tab_id, "A".to_string()).unwrap();
        h.manager.on_local_tab_modified(&tab).unwrap();
        assert_eq!(h.favicons.visited.lock().len(), 1);

        let tab = h
            .tabs
            .navigate_tab(tab_id, "https://b.com/".to_string(), "B".to_string())
            .unwrap();
        h.manager.on_local_tab_modified(&tab).unwrap();

        let visited = h.favicons.visited.lock();
        assert_eq!(visited.len(), 2);
        assert_eq!(visited[1].as_str(), "https://b.com/");
    }

    #[test]
    fn test_synced_favicon_lookup_delegates_to_cache() {
        let h = Harness::new();
        h.favicons
            .icons
            .lock()
            .insert("https://a.com/".to_string(), vec![1, 2, 3]);

        assert_eq!(
            h.manager.synced_favicon_for_page_url("https://a.com/"),
            Some(vec![1, 2, 3])
        );
        assert_eq!(h.manager.synced_favicon_for_page_url("https://b.com/"), None);
        assert_eq!(h.manager.synced_favicon_for_page_url("::"), None);
    }

    #[test]
    fn test_garbage_collection_deletes_stale_sessions() {
        let mut h = Harness::new();
        let now = at(100 * 86_400);
        let old = now - Duration::days(20);
        let recent = now - Duration::days(2);
        h.merge(&[
            foreign_header("stale", &[(1, &[10])], old),
            foreign_tab("stale", 10, 1, "https://old.com/", old),
            foreign_header("fresh", &[(1, &[10])], recent),
            foreign_tab("fresh", 10, 1, "https://new.com/", recent),
        ]);

        let changes = h.manager.do_garbage_collection(now).unwrap();

        assert!(changes.get("stale 1").unwrap().is_delete());
        assert!(changes.get("stale").unwrap().is_delete());
        assert!(changes.get("fresh").is_none());
        assert!(h.manager.get_foreign_session("stale").is_none());
        assert!(h.manager.get_foreign_session("fresh").is_some());
    }

    #[test]
    fn test_get_all_sync_data_rebuilds_local_records() {
        let mut h = Harness::new();
        let window = h.open_window();
        let a = h.open_tab(window, "https://a.com/");
        h.open_tab(window, "https://b.com/");
        h.merge(&[]);

        let records = h.manager.get_all_sync_data().unwrap();
        let tags: Vec<&str> = records.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(
            tags,
            vec![
                LOCAL_TAG,
                "session_synccache-guid 1",
                "session_synccache-guid 2"
            ]
        );

        let first = records[1].session_specifics().unwrap();
        assert_eq!(first.tab.unwrap().tab_id, Some(a));
        let header = records[0].session_specifics().unwrap().header.unwrap();
        assert_eq!(header.client_name.as_deref(), Some("Test Device"));
    }

    #[test]
    fn test_stop_keeps_foreign_sessions_readable() {
        let mut h = Harness::new();
        h.merge(&[
            foreign_header("device-A", &[(1, &[10])], at(100)),
            foreign_tab("device-A", 10, 3, "https://ten.com/", at(100)),
        ]);

        h.manager.stop_syncing();
        assert_eq!(h.manager.state(), SyncState::Stopped);
        assert_eq!(h.manager.get_all_foreign_sessions().len(), 1);
        assert!(matches!(
            h.manager.process_sync_changes(&[]),
            Err(SyncError::NotSyncing)
        ));
        assert!(matches!(
            h.manager.on_browser_opened(),
            Err(SyncError::NotSyncing)
        ));

        // Restarting rebuilds from the new snapshot only
        h.merge(&[]);
        assert!(h.manager.get_all_foreign_sessions().is_empty());
    }
}
