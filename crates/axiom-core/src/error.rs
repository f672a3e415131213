//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] axiom_storage::StorageError),

    #[error("Tab error: {0}")]
    Tab(#[from] axiom_tabs::TabError),

    #[error("Session sync error: {0}")]
    Sync(#[from] axiom_sessions_sync::SyncError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session sync not started")]
    NotInitialized,
}
