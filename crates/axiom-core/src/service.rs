//! Session sync service
//!
//! Owns the sessions sync manager and the bound change processor behind one
//! mutex, so local tab events, remote batches and UI queries never
//! interleave. Changes produced by the manager are handed to the processor
//! before the lock is released.

use parking_lot::Mutex;
use std::sync::Arc;
use url::Url;

use axiom_sessions_sync::{
    DeviceInfoProvider, FaviconCache, MergeOutcome, SessionsSyncManager, SyncChange,
    SyncChangeList, SyncChangeProcessor, SyncError, SyncPrefs, SyncState, SyncedSession,
};
use axiom_storage::Database;
use axiom_tabs::{TabId, TabManager, WindowId};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

struct SyncInner {
    manager: SessionsSyncManager,
    processor: Option<Box<dyn SyncChangeProcessor>>,
}

impl SyncInner {
    fn publish(&mut self, changes: &SyncChangeList) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let processor = self.processor.as_mut().ok_or(CoreError::NotInitialized)?;
        let result = processor
            .process_sync_changes(changes)
            .map_err(processor_error);
        result.map_err(|e| self.fail(e))
    }

    /// Convert a sync error, stopping sync first if it cannot be recovered
    /// from by retrying the operation
    fn fail(&mut self, error: SyncError) -> CoreError {
        if error.is_fatal() {
            tracing::error!(error = %error, "Stopping session sync after fatal error");
            self.manager.stop_syncing();
            self.processor = None;
        }
        error.into()
    }

    /// Re-run the merge against everything the processor holds, after the
    /// local header went missing from the store
    fn rebuild_associations(&mut self) -> Result<()> {
        tracing::warn!("Local session header missing, rebuilding associations");

        let processor = self.processor.as_ref().ok_or(CoreError::NotInitialized)?;
        let sync_data = processor.get_all_sync_data().map_err(processor_error);
        let sync_data = sync_data.map_err(|e| self.fail(e))?;

        self.manager.stop_syncing();
        let outcome = self.manager.merge_data_and_start_syncing(&sync_data);
        let outcome = outcome.map_err(|e| self.fail(e))?;
        self.publish(&outcome.changes)?;

        tracing::info!(changes = outcome.changes.len(), "Rebuilt session associations");
        Ok(())
    }

    /// Run a local-side manager operation and publish what it produced,
    /// rebuilding once if the local header turns out to be missing
    fn apply_local<F>(&mut self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut SessionsSyncManager) -> std::result::Result<SyncChangeList, SyncError>,
    {
        let changes = match op(&mut self.manager) {
            Ok(changes) => changes,
            Err(SyncError::MissingHeader(_)) => {
                self.rebuild_associations()?;
                let retried = op(&mut self.manager);
                retried.map_err(|e| self.fail(e))?
            }
            Err(e) => return Err(self.fail(e)),
        };
        self.publish(&changes)
    }
}

/// Anything the transport reports is a processor failure
fn processor_error(error: SyncError) -> SyncError {
    match error {
        SyncError::Processor(_) => error,
        other => SyncError::Processor(other.to_string()),
    }
}

pub struct SessionSyncService {
    config: Config,
    db: Database,
    tabs: TabManager,
    inner: Arc<Mutex<SyncInner>>,
}

impl SessionSyncService {
    /// Open the prefs database from `config` and wire up a manager
    pub fn new(
        config: Config,
        tabs: TabManager,
        device_info: Arc<dyn DeviceInfoProvider>,
        favicon_cache: Arc<dyn FaviconCache>,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::open(&config.database_path)?;

        Ok(Self::with_database(config, db, tabs, device_info, favicon_cache))
    }

    pub fn with_database(
        config: Config,
        db: Database,
        tabs: TabManager,
        device_info: Arc<dyn DeviceInfoProvider>,
        favicon_cache: Arc<dyn FaviconCache>,
    ) -> Self {
        let manager = SessionsSyncManager::new(
            config.sync_settings(),
            Arc::new(tabs.clone()),
            device_info,
            Arc::new(db.clone()),
            favicon_cache,
        );

        Self {
            config,
            db,
            tabs,
            inner: Arc::new(Mutex::new(SyncInner {
                manager,
                processor: None,
            })),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tab_manager(&self) -> &TabManager {
        &self.tabs
    }

    pub fn state(&self) -> SyncState {
        self.inner.lock().manager.state()
    }

    pub fn machine_tag(&self) -> String {
        self.inner.lock().manager.current_machine_tag().to_string()
    }

    /// Merge with everything `processor` holds and start publishing to it
    pub fn start(&self, mut processor: Box<dyn SyncChangeProcessor>) -> Result<MergeOutcome> {
        let mut inner = self.inner.lock();
        if inner.processor.is_some() {
            return Err(SyncError::AlreadySyncing.into());
        }

        let initial_sync_data = processor.get_all_sync_data().map_err(processor_error)?;
        let outcome = inner
            .manager
            .merge_data_and_start_syncing(&initial_sync_data)?;
        if let Err(e) = processor.process_sync_changes(&outcome.changes) {
            inner.manager.stop_syncing();
            return Err(processor_error(e).into());
        }
        inner.processor = Some(processor);

        tracing::info!(
            machine_tag = %inner.manager.current_machine_tag(),
            "Session sync started"
        );
        Ok(outcome)
    }

    /// Stop publishing; foreign sessions stay queryable
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.manager.stop_syncing();
        inner.processor = None;
    }

    /// Stop and forget the persisted machine tag
    pub fn disable(&self) -> Result<()> {
        self.stop();
        SyncPrefs::clear(&self.db)?;
        tracing::info!("Session sync disabled");
        Ok(())
    }

    /// Report a change to one local tab
    pub fn on_local_tab_modified(&self, tab_id: TabId) -> Result<()> {
        let tab = self.tabs.get_tab(tab_id)?;
        self.inner
            .lock()
            .apply_local(|manager| manager.on_local_tab_modified(&tab))
    }

    /// Report that windows opened, closed or were rearranged
    pub fn on_browser_opened(&self) -> Result<()> {
        self.inner
            .lock()
            .apply_local(|manager| manager.on_browser_opened())
    }

    pub fn open_tab(&self, window_id: WindowId, url: &str) -> Result<TabId> {
        let tab = self.tabs.create_tab(window_id, url.to_string())?;
        self.on_local_tab_modified(tab.id)?;
        Ok(tab.id)
    }

    pub fn navigate_tab(&self, tab_id: TabId, url: &str, title: &str) -> Result<()> {
        self.tabs
            .navigate_tab(tab_id, url.to_string(), title.to_string())?;
        self.on_local_tab_modified(tab_id)
    }

    /// Close a tab, releasing its sync node first
    pub fn close_tab(&self, tab_id: TabId) -> Result<()> {
        let closing = self.tabs.begin_close_tab(tab_id)?;
        let result = self
            .inner
            .lock()
            .apply_local(|manager| manager.on_local_tab_modified(&closing));
        self.tabs.close_tab(tab_id)?;
        result
    }

    /// Apply a batch delivered by the transport
    pub fn process_remote_changes(&self, changes: &[SyncChange]) -> Result<()> {
        self.inner.lock().manager.process_sync_changes(changes)?;
        Ok(())
    }

    /// Foreign sessions with something to show, most recent first
    pub fn foreign_sessions(&self) -> Vec<SyncedSession> {
        self.inner
            .lock()
            .manager
            .get_all_foreign_sessions()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn foreign_session(&self, session_tag: &str) -> Option<SyncedSession> {
        self.inner
            .lock()
            .manager
            .get_foreign_session(session_tag)
            .cloned()
    }

    /// Delete a foreign session everywhere
    ///
    /// Tombstones are published even when the session referenced tabs
    /// without nodes; that condition is still returned as an error.
    pub fn delete_foreign_session(&self, session_tag: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut changes = SyncChangeList::new();
        let result = inner.manager.delete_foreign_session(session_tag, &mut changes);
        inner.publish(&changes)?;
        result?;
        Ok(())
    }

    /// Delete foreign sessions idle past the configured threshold
    pub fn collect_garbage(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        let before = inner.manager.get_all_foreign_sessions().len();
        let changes = inner.manager.do_garbage_collection(chrono::Utc::now())?;
        inner.publish(&changes)?;
        Ok(before.saturating_sub(inner.manager.get_all_foreign_sessions().len()))
    }

    /// Tell the favicon cache about refreshed favicons of open pages
    pub fn forward_favicon_updates(&self, page_urls: &[Url]) -> usize {
        self.inner
            .lock()
            .manager
            .forward_relevant_favicon_updates_to_favicon_cache(page_urls)
    }

    pub fn synced_favicon(&self, page_url: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .manager
            .synced_favicon_for_page_url(page_url)
    }
}

impl Clone for SessionSyncService {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            db: self.db.clone(),
            tabs: self.tabs.clone(),
            inner: Arc::clone(&self.inner),
        }
    }
}
