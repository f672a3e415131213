//! Fakes and fixtures shared by the unit tests

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

use axiom_storage::Database;
use axiom_tabs::{TabId, TabManager, TabNavigation, TabNodeId, WindowId, WindowType};

use crate::change::{tab_node_tag, SyncData};
use crate::device_info::LocalDeviceInfo;
use crate::favicon::FaviconCache;
use crate::manager::{MergeOutcome, SessionsSyncManager, SyncSettings};
use crate::specifics::{SessionHeader, SessionSpecifics, SessionTabSpecifics, SessionWindowSpecifics};

pub(crate) const PROFILE: &str = "Default";
pub(crate) const CACHE_GUID: &str = "cache-guid";
pub(crate) const LOCAL_TAG: &str = "session_synccache-guid";

/// `secs` seconds after the epoch
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(secs)
}

#[derive(Default)]
pub(crate) struct RecordingFaviconCache {
    pub visited: Mutex<Vec<Url>>,
    pub updated: Mutex<Vec<Url>>,
    pub received: Mutex<Vec<(Url, Url, DateTime<Utc>)>>,
    pub icons: Mutex<HashMap<String, Vec<u8>>>,
}

impl FaviconCache for RecordingFaviconCache {
    fn on_favicon_visited(&self, page_url: &Url, _: Option<&Url>, _: DateTime<Utc>) {
        self.visited.lock().push(page_url.clone());
    }

    fn on_page_favicon_updated(&self, page_url: &Url, _: DateTime<Utc>) {
        self.updated.lock().push(page_url.clone());
    }

    fn on_received_sync_favicon(&self, page_url: &Url, favicon_url: &Url, visit_time: DateTime<Utc>) {
        self.received
            .lock()
            .push((page_url.clone(), favicon_url.clone(), visit_time));
    }

    fn synced_favicon_for_page_url(&self, page_url: &Url) -> Option<Vec<u8>> {
        self.icons.lock().get(page_url.as_str()).cloned()
    }
}

/// A manager wired to an in-memory tab model, prefs and favicon cache
pub(crate) struct Harness {
    pub tabs: TabManager,
    pub prefs: Database,
    pub favicons: Arc<RecordingFaviconCache>,
    pub manager: SessionsSyncManager,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::new(PROFILE))
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let tabs = TabManager::new(PROFILE);
        let prefs = Database::open_in_memory().unwrap();
        let favicons = Arc::new(RecordingFaviconCache::default());
        let manager = SessionsSyncManager::new(
            settings,
            Arc::new(tabs.clone()),
            Arc::new(LocalDeviceInfo::new(CACHE_GUID, "Test Device")),
            Arc::new(prefs.clone()),
            favicons.clone(),
        );

        Self {
            tabs,
            prefs,
            favicons,
            manager,
        }
    }

    pub fn open_window(&self) -> WindowId {
        self.tabs.open_window(WindowType::Tabbed)
    }

    pub fn open_tab(&self, window_id: WindowId, url: &str) -> TabId {
        self.tabs.create_tab(window_id, url.to_string()).unwrap().id
    }

    pub fn merge(&mut self, initial: &[SyncData]) -> MergeOutcome {
        self.manager.merge_data_and_start_syncing(initial).unwrap()
    }
}

pub(crate) fn foreign_header(
    session_tag: &str,
    windows: &[(WindowId, &[TabId])],
    modified_time: DateTime<Utc>,
) -> SyncData {
    let header = SessionHeader {
        windows: windows
            .iter()
            .map(|(window_id, tabs)| SessionWindowSpecifics {
                window_id: *window_id,
                selected_tab_index: Some(0),
                browser_type: Default::default(),
                tabs: tabs.to_vec(),
            })
            .collect(),
        client_name: Some(format!("{} name", session_tag)),
        device_type: None,
    };
    SyncData::remote(
        session_tag,
        &SessionSpecifics::new_header(session_tag, header),
        modified_time,
    )
    .unwrap()
}

pub(crate) fn tab_specifics(tab_id: TabId, window_id: WindowId, url: &str) -> SessionTabSpecifics {
    let mut navigation = TabNavigation::new(url, "Title");
    navigation.timestamp = DateTime::<Utc>::UNIX_EPOCH;
    SessionTabSpecifics {
        tab_id: Some(tab_id),
        window_id,
        navigations: vec![navigation],
        ..Default::default()
    }
}

pub(crate) fn foreign_tab(
    session_tag: &str,
    tab_id: TabId,
    tab_node_id: TabNodeId,
    url: &str,
    modified_time: DateTime<Utc>,
) -> SyncData {
    SyncData::remote(
        tab_node_tag(session_tag, tab_node_id),
        &SessionSpecifics::new_tab(session_tag, tab_node_id, tab_specifics(tab_id, 1, url)),
        modified_time,
    )
    .unwrap()
}
