//! Session sync error types

use thiserror::Error;

use axiom_tabs::TabId;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The local header vanished from the replicated store; the caller must
    /// re-run the merge from scratch
    #[error("Local session header missing for {0}, reassociation required")]
    MissingHeader(String),

    /// Tabs referenced by a session have no sync node to tombstone
    #[error("Session {session_tag} references tabs without sync nodes: {tab_ids:?}")]
    MissingTabs {
        session_tag: String,
        tab_ids: Vec<TabId>,
    },

    /// A replicated record lacks required fields; only that record is dropped
    #[error("Malformed session record '{tag}': {reason}")]
    MalformedRecord { tag: String, reason: String },

    /// The tab is deliberately not synced
    #[error("Tab {0} is not eligible for sync")]
    IneligibleTab(TabId),

    #[error("Session sync is not running")]
    NotSyncing,

    #[error("Session sync already started")]
    AlreadySyncing,

    #[error("Refusing to delete the local session {0}")]
    LocalSessionDeletion(String),

    #[error("Change processor error: {0}")]
    Processor(String),

    #[error("Storage error: {0}")]
    Storage(#[from] axiom_storage::StorageError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    pub fn malformed(tag: &str, reason: impl Into<String>) -> Self {
        SyncError::MalformedRecord {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that abort a merge attempt rather than a single record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::MissingHeader(_)
                | SyncError::AlreadySyncing
                | SyncError::Storage(_)
                | SyncError::Processor(_)
        )
    }
}
