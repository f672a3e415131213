//! AXIOM Sessions Sync
//!
//! Reconciles this device's open windows and tabs with a replicated,
//! multi-device session store, and keeps an index of every other device's
//! open tabs. Transport, favicon storage and the browser model are
//! collaborators reached through traits.

mod change;
mod device_info;
mod error;
mod favicon;
mod manager;
mod prefs;
mod specifics;
mod synced_session;
mod tab_node_pool;
mod tracker;

#[cfg(test)]
mod test_support;

pub use change::{
    parse_tab_node_tag, tab_node_tag, SyncChange, SyncChangeList, SyncChangeProcessor,
    SyncChangeType, SyncData,
};
pub use device_info::{build_machine_tag, DeviceInfoProvider, LocalDeviceInfo};
pub use error::SyncError;
pub use favicon::{FaviconCache, NullFaviconCache};
pub use manager::{
    is_syncable_url, MergeOutcome, ReloadTabsOption, SessionsSyncManager, SyncSettings,
    SyncState, DEFAULT_MAX_SYNC_NAVIGATION_COUNT, DEFAULT_STALE_SESSION_THRESHOLD_DAYS,
};
pub use prefs::SyncPrefs;
pub use specifics::{
    BrowserType, DeviceType, SessionHeader, SessionSpecifics, SessionTabSpecifics,
    SessionWindowSpecifics,
};
pub use synced_session::{SessionTab, SessionWindow, SyncedSession};
pub use tab_node_pool::{
    TabNodePool, DEFAULT_FREE_NODES_HIGH_WATERMARK, DEFAULT_FREE_NODES_LOW_WATERMARK,
};
pub use tracker::SyncedSessionTracker;

pub type Result<T> = std::result::Result<T, SyncError>;
