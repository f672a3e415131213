//! AXIOM Core
//!
//! Coordination layer for session sync. `SessionSyncService` is the single
//! serialized entry point through which the host, the sync transport and UI
//! queries reach the sessions sync manager.

mod config;
mod error;
mod service;

pub use config::Config;
pub use error::CoreError;
pub use service::SessionSyncService;

pub use axiom_sessions_sync::{
    DeviceInfoProvider, FaviconCache, LocalDeviceInfo, MergeOutcome, NullFaviconCache, SessionTab,
    SessionWindow, SyncChange, SyncChangeList, SyncChangeProcessor, SyncData, SyncError,
    SyncState, SyncedSession,
};
pub use axiom_storage::{Database, StorageError};
pub use axiom_tabs::{Tab, TabError, TabId, TabManager, WindowId, WindowType};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
